//! Extraction state
//!
//! States an extraction request moves through.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current state of one extraction request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtractionState {
    /// Request accepted, nothing done yet
    #[default]
    Init,
    /// Looking up the cache store
    CacheCheck,
    /// A valid cached result was found
    CacheHit,
    /// No usable cached result
    CacheMiss,
    /// Opening the source for decode
    Decoding,
    /// Consuming decoded blocks
    Reducing,
    /// Persisting the result
    CacheWrite,
    Done,
    Failed,
}

impl ExtractionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExtractionState::Done | ExtractionState::Failed)
    }
}

impl fmt::Display for ExtractionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtractionState::Init => "init",
            ExtractionState::CacheCheck => "cacheCheck",
            ExtractionState::CacheHit => "cacheHit",
            ExtractionState::CacheMiss => "cacheMiss",
            ExtractionState::Decoding => "decoding",
            ExtractionState::Reducing => "reducing",
            ExtractionState::CacheWrite => "cacheWrite",
            ExtractionState::Done => "done",
            ExtractionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
