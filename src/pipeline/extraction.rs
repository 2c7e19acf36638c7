//! Extraction pipeline orchestration
//!
//! Runs one request through cache lookup, decode, reduction and cache
//! write, reporting progress along the way. `run` blocks; callers put it on
//! a blocking worker.

use super::progress::{ProgressGate, ProgressReporter};
use super::state::ExtractionState;
use crate::cache::CacheStore;
use crate::decode::{AudioDecoder, DecodeError};
use crate::waveform::{
    reduce_with, AmplitudeResult, AudioSource, CacheKey, CachePolicy, ProgressOperation,
    ReductionParams,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors that end an extraction
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("No audio frames decoded from {0}")]
    EmptyAudio(String),

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Fully resolved inputs of one extraction
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub source: AudioSource,
    pub cache_key: CacheKey,
    pub policy: CachePolicy,
    pub params: ReductionParams,
}

/// Successful pipeline output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub result: AmplitudeResult,
    /// Whether the result was served from the cache store
    pub from_cache: bool,
}

/// Cached and computed results both hold the decoded duration; a caller's
/// override only applies to what is returned.
fn with_duration_override(mut result: AmplitudeResult, source: &AudioSource) -> AmplitudeResult {
    if let Some(duration_ms) = source.duration_override_ms() {
        result.duration_ms = duration_ms;
    }
    result
}

/// Pipeline for a single extraction request
pub struct ExtractionPipeline {
    request_id: Uuid,
    request: ExtractionRequest,
    decoder: Arc<dyn AudioDecoder>,
    store: Option<Arc<CacheStore>>,
    cancel_flag: Arc<AtomicBool>,
    state: RwLock<ExtractionState>,
}

impl ExtractionPipeline {
    /// Create a new pipeline. Without a store, caching is disabled.
    pub fn new(
        request_id: Uuid,
        request: ExtractionRequest,
        decoder: Arc<dyn AudioDecoder>,
        store: Option<Arc<CacheStore>>,
        cancel_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            request_id,
            request,
            decoder,
            store,
            cancel_flag,
            state: RwLock::new(ExtractionState::Init),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Get the current state
    pub fn state(&self) -> ExtractionState {
        *self.state.read()
    }

    /// Run the pipeline to completion
    ///
    /// `reporter` always sees exactly one start and one stop, whatever the
    /// outcome.
    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<Extraction, ExtractionError> {
        tracing::info!(
            "[{}] Extracting waveform from {} (key '{}', {:?})",
            self.request_id,
            self.request.source,
            self.request.cache_key,
            self.request.policy
        );

        let gate = ProgressGate::new(reporter);
        gate.on_start();

        let outcome = self.execute(&gate);
        match &outcome {
            Ok(extraction) => {
                self.transition(ExtractionState::Done);
                tracing::info!(
                    "[{}] Extraction complete: {} amplitudes, {}ms{}",
                    self.request_id,
                    extraction.result.amplitudes.len(),
                    extraction.result.duration_ms,
                    if extraction.from_cache { " (cached)" } else { "" }
                );
            }
            Err(ExtractionError::Cancelled) => {
                self.transition(ExtractionState::Failed);
                tracing::info!("[{}] Extraction cancelled", self.request_id);
            }
            Err(e) => {
                self.transition(ExtractionState::Failed);
                tracing::error!("[{}] Extraction failed: {}", self.request_id, e);
            }
        }

        gate.on_stop();
        outcome
    }

    fn execute(&self, gate: &dyn ProgressReporter) -> Result<Extraction, ExtractionError> {
        let ExtractionRequest {
            source,
            cache_key,
            policy,
            params,
        } = &self.request;

        // 1. Cache lookup
        if let (CachePolicy::Reuse, Some(store)) = (policy, &self.store) {
            self.transition(ExtractionState::CacheCheck);
            match store.get(cache_key) {
                Ok(Some(entry)) if entry.params == *params => {
                    self.transition(ExtractionState::CacheHit);
                    return Ok(Extraction {
                        result: with_duration_override(entry.payload, source),
                        from_cache: true,
                    });
                }
                Ok(Some(entry)) => {
                    tracing::debug!(
                        "[{}] Cached entry for '{}' used {:?}, requested {:?}",
                        self.request_id,
                        cache_key,
                        entry.params,
                        params
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        "[{}] Cache lookup for '{}' failed: {}",
                        self.request_id,
                        cache_key,
                        e
                    );
                }
            }
            self.transition(ExtractionState::CacheMiss);
        }

        self.check_cancelled()?;

        // 2. Decode
        if source.is_remote() && !self.decoder.supports_remote() {
            return Err(DecodeError::UnsupportedSource(format!(
                "Remote sources are not supported by this decoder: {}",
                source
            ))
            .into());
        }
        self.transition(ExtractionState::Decoding);
        let mut stream = self
            .decoder
            .decode(source, gate, &self.cancel_flag)
            .map_err(|e| match e {
                DecodeError::Cancelled => ExtractionError::Cancelled,
                other => ExtractionError::Decode(other),
            })?;
        let total_frames = stream.spec().total_frames.filter(|frames| *frames > 0);
        let bytes = stream.byte_progress();

        // 3. Reduce while the stream is consumed
        self.transition(ExtractionState::Reducing);
        let result = reduce_with(stream.as_mut(), *params, source, |frames| {
            self.check_cancelled()?;
            let fraction = match (total_frames, &bytes) {
                (Some(total), _) => Some(frames as f64 / total as f64),
                (None, Some(bytes)) => Some(bytes.fraction()),
                (None, None) => None,
            };
            if let Some(fraction) = fraction {
                let percent = (fraction * 100.0).clamp(0.0, 99.0) as u8;
                gate.on_stage(ProgressOperation::Decoding, percent);
            }
            Ok(())
        })?;
        drop(stream);
        gate.on_stage(ProgressOperation::Decoding, 100);
        gate.on_stage(ProgressOperation::Processing, 100);

        self.check_cancelled()?;

        // 4. Cache write
        if let Some(store) = &self.store {
            self.transition(ExtractionState::CacheWrite);
            if let Err(e) = store.put(cache_key, *params, &result) {
                tracing::warn!(
                    "[{}] Failed to cache result for '{}': {}",
                    self.request_id,
                    cache_key,
                    e
                );
            }
        }

        Ok(Extraction {
            result: with_duration_override(result, source),
            from_cache: false,
        })
    }

    /// Check if the extraction was cancelled
    fn check_cancelled(&self) -> Result<(), ExtractionError> {
        if self.cancel_flag.load(Ordering::Relaxed) {
            Err(ExtractionError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn transition(&self, next: ExtractionState) {
        let mut state = self.state.write();
        tracing::debug!("[{}] {} -> {}", self.request_id, *state, next);
        *state = next;
    }
}
