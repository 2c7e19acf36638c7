//! Waveform types
//!
//! This module defines the value types shared by the decoder, reducer,
//! cache store and pipeline: audio sources, cache keys, reduction
//! parameters, amplitude results and progress events.

use crate::utils::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use url::Url;

/// A single normalized amplitude value (0..=MAX_AMPLITUDE)
pub type Amplitude = u16;

/// Where the audio lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// File on the local filesystem
    Local(PathBuf),
    /// HTTP(S) resource that must be downloaded before decoding
    Remote(Url),
}

/// Identifies the input audio of an extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    location: SourceLocation,
    duration_override_ms: Option<u64>,
}

impl AudioSource {
    /// Parse a caller-supplied path or URL
    ///
    /// `http`/`https` URLs become remote sources, `file://` URLs and plain
    /// paths become local sources. Other URL schemes are rejected.
    pub fn parse(input: &str) -> EngineResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EngineError::Argument("path should be provided".to_string()));
        }

        let location = match Url::parse(input) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {
                SourceLocation::Remote(url)
            }
            Ok(url) if url.scheme() == "file" => {
                let path = url.to_file_path().map_err(|_| {
                    EngineError::Argument(format!("Invalid file URL: {}", input))
                })?;
                SourceLocation::Local(path)
            }
            // Single-letter schemes are Windows drive letters, not URLs
            Ok(url) if url.scheme().len() > 1 => {
                return Err(crate::decode::DecodeError::UnsupportedSource(format!(
                    "Unsupported URL scheme '{}'",
                    url.scheme()
                ))
                .into());
            }
            _ => SourceLocation::Local(PathBuf::from(input)),
        };

        Ok(Self {
            location,
            duration_override_ms: None,
        })
    }

    /// Create a source for a local file
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            location: SourceLocation::Local(path.into()),
            duration_override_ms: None,
        }
    }

    /// Replace the decoded duration reported in results
    pub fn with_duration_override(mut self, duration_ms: Option<u64>) -> Self {
        self.duration_override_ms = duration_ms;
        self
    }

    pub fn location(&self) -> &SourceLocation {
        &self.location
    }

    pub fn duration_override_ms(&self) -> Option<u64> {
        self.duration_override_ms
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.location, SourceLocation::Remote(_))
    }

    /// Normalized string form: absolute path for local files, full URL otherwise
    pub fn identifier(&self) -> String {
        match &self.location {
            SourceLocation::Local(path) => normalize_path(path).to_string_lossy().into_owned(),
            SourceLocation::Remote(url) => url.as_str().to_string(),
        }
    }
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier())
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Identifier selecting one cache entry
///
/// Explicit keys and source-derived keys live in separate namespaces, so a
/// caller key that happens to equal a path never aliases that path's entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key supplied by the caller
    pub fn explicit(key: &str) -> Self {
        Self(format!("key:{}", key))
    }

    /// Key derived from the normalized source identifier
    pub fn for_source(source: &AudioSource) -> Self {
        Self(format!("source:{}", source.identifier()))
    }

    /// Use the explicit key when given, otherwise derive one from the source
    pub fn resolve(explicit: Option<&str>, source: &AudioSource) -> Self {
        match explicit {
            Some(key) => Self::explicit(key),
            None => Self::for_source(source),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable file stem for the on-disk entry
    pub fn file_stem(&self) -> String {
        blake3::hash(self.0.as_bytes()).to_hex().to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the cache is consulted for an extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Return a valid cached entry when present
    Reuse,
    /// Always recompute and overwrite the stored entry
    Refresh,
}

impl CachePolicy {
    pub fn from_use_cache(use_cache: bool) -> Self {
        if use_cache {
            CachePolicy::Reuse
        } else {
            CachePolicy::Refresh
        }
    }
}

/// Aggregation rule applied to each window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionMethod {
    /// Arithmetic mean of absolute sample magnitudes
    #[default]
    Average,
    /// Maximum absolute sample magnitude
    Peak,
}

/// Downsampling granularity and aggregation rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReductionParams {
    pub method: ReductionMethod,
    /// Windows per second; `None` keeps the decoder's native block grouping
    pub samples_per_second: Option<NonZeroU32>,
}

impl ReductionParams {
    /// Build params, rejecting a zero rate
    pub fn new(method: ReductionMethod, samples_per_second: Option<u32>) -> EngineResult<Self> {
        let samples_per_second = match samples_per_second {
            Some(rate) => Some(NonZeroU32::new(rate).ok_or_else(|| {
                EngineError::Argument("samplesPerSecond must be a positive integer".to_string())
            })?),
            None => None,
        };
        Ok(Self {
            method,
            samples_per_second,
        })
    }
}

/// Output of a successful extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmplitudeResult {
    /// Amplitudes for the whole source, one per window
    pub amplitudes: Vec<Amplitude>,
    /// Single amplitude covering the first second of audio
    pub amplitudes_for_first_second: Vec<Amplitude>,
    pub duration_ms: u64,
    /// Normalized identifier of the audio origin
    pub source: String,
}

/// Full result handed to callers of `extract_waveform`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaveformData {
    pub amplitudes_data: Vec<Amplitude>,
    pub amplitudes_for_first_second: Vec<Amplitude>,
    /// Duration in milliseconds
    pub duration: u64,
    pub source: String,
}

impl From<AmplitudeResult> for WaveformData {
    fn from(result: AmplitudeResult) -> Self {
        Self {
            amplitudes_data: result.amplitudes,
            amplitudes_for_first_second: result.amplitudes_for_first_second,
            duration: result.duration_ms,
            source: result.source,
        }
    }
}

/// Kind of work a progress percentage refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressOperation {
    Processing,
    Decoding,
    Downloading,
}

/// Progress notification emitted during an extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Start,
    Stage {
        operation: ProgressOperation,
        percent: u8,
    },
    Stop,
}
