//! Extraction command handlers
//!
//! Request-response variants: the caller awaits the final result. Dropping
//! the returned future cancels the extraction.

use super::EngineState;
use crate::config::EngineConfig;
use crate::pipeline::{Extraction, ExtractionPipeline, ExtractionRequest, NoopReporter, ProgressReporter};
use crate::utils::{EngineError, EngineResult};
use crate::waveform::{
    Amplitude, AudioSource, CacheKey, CachePolicy, ReductionMethod, WaveformData,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Caller arguments for an extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractRequest {
    /// Local path, `file://` URL or `http(s)://` URL
    pub path: String,
    pub use_cache: bool,
    pub cache_key: Option<String>,
    pub samples_per_second: Option<u32>,
    pub method: Option<ReductionMethod>,
    /// Replaces the decoded duration in the result
    pub duration_ms: Option<u64>,
}

impl Default for ExtractRequest {
    fn default() -> Self {
        Self {
            path: String::new(),
            use_cache: true,
            cache_key: None,
            samples_per_second: None,
            method: None,
            duration_ms: None,
        }
    }
}

impl ExtractRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Validate the arguments and resolve them against the engine defaults
    pub(crate) fn resolve(&self, config: &EngineConfig) -> EngineResult<ExtractionRequest> {
        if self.path.trim().is_empty() {
            return Err(EngineError::Argument("path is required".into()));
        }
        if self.cache_key.as_deref().is_some_and(str::is_empty) {
            return Err(EngineError::Argument("cacheKey must not be empty".into()));
        }

        let params = config.reduction_params(self.method, self.samples_per_second)?;
        let source = AudioSource::parse(self.path.trim())?.with_duration_override(self.duration_ms);
        let cache_key = CacheKey::resolve(self.cache_key.as_deref(), &source);

        Ok(ExtractionRequest {
            source,
            cache_key,
            policy: CachePolicy::from_use_cache(self.use_cache),
            params,
        })
    }
}

/// Sets the cancel flag when the owning future is dropped
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

async fn run_extraction<R>(
    state: &EngineState,
    request: ExtractRequest,
    reporter: R,
) -> EngineResult<Extraction>
where
    R: ProgressReporter + 'static,
{
    let resolved = request.resolve(state.config())?;
    let request_id = Uuid::new_v4();
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let _guard = CancelOnDrop(cancel_flag.clone());

    let pipeline = ExtractionPipeline::new(
        request_id,
        resolved,
        state.decoder(),
        state.store().cloned(),
        cancel_flag,
    );

    match tokio::task::spawn_blocking(move || pipeline.run(&reporter)).await {
        Ok(result) => result.map_err(EngineError::from),
        Err(e) => {
            tracing::error!("[{}] Extraction task panicked: {}", request_id, e);
            Err(EngineError::Internal(format!("Extraction task panicked: {}", e)))
        }
    }
}

/// Extract the full waveform result
pub async fn extract_waveform(
    state: &EngineState,
    request: ExtractRequest,
) -> EngineResult<WaveformData> {
    extract_waveform_with_progress(state, request, NoopReporter).await
}

/// Extract the full waveform result, reporting progress to `reporter`
pub async fn extract_waveform_with_progress<R>(
    state: &EngineState,
    request: ExtractRequest,
    reporter: R,
) -> EngineResult<WaveformData>
where
    R: ProgressReporter + 'static,
{
    let extraction = run_extraction(state, request, reporter).await?;
    Ok(WaveformData::from(extraction.result))
}

/// Extract only the amplitude sequence
pub async fn extract_waveform_data_only(
    state: &EngineState,
    request: ExtractRequest,
) -> EngineResult<Vec<Amplitude>> {
    extract_waveform_data_only_with_progress(state, request, NoopReporter).await
}

pub async fn extract_waveform_data_only_with_progress<R>(
    state: &EngineState,
    request: ExtractRequest,
    reporter: R,
) -> EngineResult<Vec<Amplitude>>
where
    R: ProgressReporter + 'static,
{
    let extraction = run_extraction(state, request, reporter).await?;
    Ok(extraction.result.amplitudes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{engine, write_tone};
    use crate::commands::clear_all_waveform_cache;
    use crate::pipeline::CallbackReporter;
    use crate::waveform::{ProgressEvent, ProgressOperation};
    use parking_lot::Mutex;
    use tempfile::tempdir;

    fn request(path: &std::path::Path) -> ExtractRequest {
        ExtractRequest {
            samples_per_second: Some(10),
            ..ExtractRequest::new(path.to_string_lossy())
        }
    }

    #[tokio::test]
    async fn test_two_seconds_of_silence() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("silence.wav");
        write_tone(&audio, 2.0, 0.0);
        let state = engine(&dir.path().join("cache"));

        let data = extract_waveform(&state, request(&audio)).await.unwrap();

        assert_eq!(data.amplitudes_data, vec![0; 20]);
        assert_eq!(data.amplitudes_for_first_second, vec![0]);
        assert_eq!(data.duration, 2000);
        assert!(data.source.ends_with("silence.wav"));
    }

    #[tokio::test]
    async fn test_short_source_has_partial_first_second() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("blip.wav");
        write_tone(&audio, 0.25, 0.5);
        let state = engine(&dir.path().join("cache"));

        let data = extract_waveform(&state, request(&audio)).await.unwrap();

        assert!(!data.amplitudes_data.is_empty());
        assert_eq!(data.amplitudes_for_first_second, vec![50]);
        assert_eq!(data.duration, 250);
    }

    #[tokio::test]
    async fn test_data_only_matches_full_projection() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        write_tone(&audio, 1.5, 0.5);
        let state = engine(&dir.path().join("cache"));

        let full = extract_waveform(&state, request(&audio)).await.unwrap();
        let data_only = extract_waveform_data_only(&state, request(&audio))
            .await
            .unwrap();

        assert_eq!(full.amplitudes_data, data_only);
        assert_eq!(data_only.len(), 15);
        assert!(data_only.iter().all(|a| *a == 50));
    }

    #[tokio::test]
    async fn test_reuse_is_idempotent_until_cleared() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        write_tone(&audio, 1.0, 0.3);
        let state = engine(&dir.path().join("cache"));

        let first = extract_waveform(&state, request(&audio)).await.unwrap();

        // A different file at the same path proves the second call is cached
        write_tone(&audio, 1.0, 0.9);
        let second = extract_waveform(&state, request(&audio)).await.unwrap();
        assert_eq!(first, second);

        assert_eq!(clear_all_waveform_cache(&state).unwrap(), 1);
        let third = extract_waveform(&state, request(&audio)).await.unwrap();
        assert_ne!(first.amplitudes_data, third.amplitudes_data);
    }

    #[tokio::test]
    async fn test_use_cache_false_recomputes() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        write_tone(&audio, 1.0, 0.3);
        let state = engine(&dir.path().join("cache"));

        extract_waveform(&state, request(&audio)).await.unwrap();
        write_tone(&audio, 1.0, 0.9);

        let refreshed = extract_waveform(
            &state,
            ExtractRequest {
                use_cache: false,
                ..request(&audio)
            },
        )
        .await
        .unwrap();
        assert!(refreshed.amplitudes_data.iter().all(|a| *a == 90));

        // The refresh overwrote the cached entry
        let reused = extract_waveform(&state, request(&audio)).await.unwrap();
        assert_eq!(reused, refreshed);
    }

    #[tokio::test]
    async fn test_argument_errors_before_work() {
        let dir = tempdir().unwrap();
        let state = engine(&dir.path().join("cache"));

        let err = extract_waveform(&state, ExtractRequest::new("   "))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ARGUMENT_ERROR");

        let err = extract_waveform(
            &state,
            ExtractRequest {
                samples_per_second: Some(0),
                ..ExtractRequest::new("/music/track.mp3")
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "ARGUMENT_ERROR");
    }

    #[tokio::test]
    async fn test_missing_file_reports_not_found() {
        let dir = tempdir().unwrap();
        let state = engine(&dir.path().join("cache"));

        let err = extract_waveform(&state, request(&dir.path().join("missing.wav")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FILE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_duration_override() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        write_tone(&audio, 1.0, 0.5);
        let state = engine(&dir.path().join("cache"));

        let data = extract_waveform(
            &state,
            ExtractRequest {
                duration_ms: Some(1234),
                use_cache: false,
                ..request(&audio)
            },
        )
        .await
        .unwrap();
        assert_eq!(data.duration, 1234);
    }

    #[tokio::test]
    async fn test_duration_override_after_cached_extraction() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        write_tone(&audio, 1.0, 0.5);
        let state = engine(&dir.path().join("cache"));

        let plain = extract_waveform(&state, request(&audio)).await.unwrap();
        assert_eq!(plain.duration, 1000);

        let overridden = extract_waveform(
            &state,
            ExtractRequest {
                duration_ms: Some(1234),
                ..request(&audio)
            },
        )
        .await
        .unwrap();
        assert_eq!(overridden.duration, 1234);
        assert_eq!(overridden.amplitudes_data, plain.amplitudes_data);

        let again = extract_waveform(&state, request(&audio)).await.unwrap();
        assert_eq!(again.duration, 1000);
    }

    #[tokio::test]
    async fn test_progress_reporter_receives_events() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        write_tone(&audio, 2.0, 0.5);
        let state = engine(&dir.path().join("cache"));

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let reporter = CallbackReporter::new(move |event| sink.lock().push(event));

        extract_waveform_with_progress(&state, request(&audio), reporter)
            .await
            .unwrap();

        let events = events.lock();
        assert_eq!(events.first(), Some(&ProgressEvent::Start));
        assert_eq!(events.last(), Some(&ProgressEvent::Stop));
        assert!(events.contains(&ProgressEvent::Stage {
            operation: ProgressOperation::Decoding,
            percent: 100
        }));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: ExtractRequest =
            serde_json::from_str(r#"{"path": "/a.mp3", "samplesPerSecond": 20}"#).unwrap();
        assert!(request.use_cache);
        assert_eq!(request.samples_per_second, Some(20));
        assert_eq!(request.cache_key, None);
    }
}
