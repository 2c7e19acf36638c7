//! Streamed extraction
//!
//! Each request gets its own [`ExtractionStream`] yielding ordered event
//! records: one `start`, any number of `progress`, one terminal `done`.

use super::{EngineState, ExtractRequest};
use crate::pipeline::{ChannelReporter, Extraction, ExtractionError, ExtractionPipeline};
use crate::utils::{EngineError, EngineResult, ErrorResponse};
use crate::waveform::{Amplitude, ProgressEvent, ProgressOperation};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Progress,
    Done,
}

/// One caller-facing event record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub path: String,
    pub event: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<ProgressOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amplitudes_data: Option<Vec<Amplitude>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amplitudes_for_first_second: Option<Vec<Amplitude>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl EventRecord {
    fn new(path: &str, event: EventKind) -> Self {
        Self {
            path: path.to_string(),
            event,
            operation: None,
            progress: None,
            amplitudes_data: None,
            amplitudes_for_first_second: None,
            duration: None,
            source: None,
            error: None,
        }
    }

    fn progress(path: &str, operation: ProgressOperation, percent: u8) -> Self {
        Self {
            operation: Some(operation),
            progress: Some(percent),
            ..Self::new(path, EventKind::Progress)
        }
    }

    fn done(path: &str, projection: Projection, outcome: Result<Extraction, EngineError>) -> Self {
        let mut record = Self::new(path, EventKind::Done);
        match outcome {
            Ok(extraction) => {
                let result = extraction.result;
                record.amplitudes_data = Some(result.amplitudes);
                if projection == Projection::Full {
                    record.amplitudes_for_first_second = Some(result.amplitudes_for_first_second);
                    record.duration = Some(result.duration_ms);
                    record.source = Some(result.source);
                }
            }
            Err(e) => record.error = Some(ErrorResponse::from(&e)),
        }
        record
    }

    pub fn is_done(&self) -> bool {
        self.event == EventKind::Done
    }
}

/// Which fields the terminal record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Projection {
    Full,
    DataOnly,
}

/// Cancellable event stream for one extraction request
///
/// Dropping the stream cancels the extraction if it is still running.
pub struct ExtractionStream {
    request_id: Uuid,
    path: String,
    projection: Projection,
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    result: Option<oneshot::Receiver<Result<Extraction, ExtractionError>>>,
    cancel_flag: Arc<AtomicBool>,
    started: bool,
}

impl ExtractionStream {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Ask the extraction to stop; the stream still ends with `done`
    pub fn cancel(&self) {
        tracing::info!("[{}] Cancelling extraction", self.request_id);
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    /// Next record, or `None` once `done` has been yielded
    pub async fn next_event(&mut self) -> Option<EventRecord> {
        let result = self.result.as_mut()?;

        while let Some(event) = self.events.recv().await {
            match event {
                ProgressEvent::Start if !self.started => {
                    self.started = true;
                    return Some(EventRecord::new(&self.path, EventKind::Start));
                }
                ProgressEvent::Stage { operation, percent } if self.started => {
                    return Some(EventRecord::progress(&self.path, operation, percent));
                }
                _ => {}
            }
        }

        if !self.started {
            self.started = true;
            return Some(EventRecord::new(&self.path, EventKind::Start));
        }

        let outcome = match result.await {
            Ok(outcome) => outcome.map_err(EngineError::from),
            Err(_) => Err(EngineError::Internal(
                "Extraction task ended without a result".into(),
            )),
        };
        self.result = None;
        Some(EventRecord::done(&self.path, self.projection, outcome))
    }

    /// Drain every remaining record
    pub async fn collect(mut self) -> Vec<EventRecord> {
        let mut records = Vec::new();
        while let Some(record) = self.next_event().await {
            records.push(record);
        }
        records
    }
}

impl Drop for ExtractionStream {
    fn drop(&mut self) {
        if self.result.is_some() {
            self.cancel_flag.store(true, Ordering::Relaxed);
        }
    }
}

fn spawn_stream(
    state: &EngineState,
    request: ExtractRequest,
    projection: Projection,
) -> EngineResult<ExtractionStream> {
    let resolved = request.resolve(state.config())?;
    let request_id = Uuid::new_v4();
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let (reporter, events) = ChannelReporter::channel();
    let (result_tx, result_rx) = oneshot::channel();

    let pipeline = ExtractionPipeline::new(
        request_id,
        resolved,
        state.decoder(),
        state.store().cloned(),
        cancel_flag.clone(),
    );

    tokio::task::spawn_blocking(move || {
        let outcome = pipeline.run(&reporter);
        // Closing the channel lets the stream move on to the result
        drop(reporter);
        if result_tx.send(outcome).is_err() {
            tracing::debug!("[{}] Stream dropped before completion", request_id);
        }
    });

    Ok(ExtractionStream {
        request_id,
        path: request.path,
        projection,
        events,
        result: Some(result_rx),
        cancel_flag,
        started: false,
    })
}

/// Start a streamed extraction whose `done` record carries the full result
///
/// Must be called from within a tokio runtime. Argument errors are returned
/// immediately; every later failure arrives as a `done` record with `error`.
pub fn extract_waveform_to_stream(
    state: &EngineState,
    request: ExtractRequest,
) -> EngineResult<ExtractionStream> {
    spawn_stream(state, request, Projection::Full)
}

/// Start a streamed extraction whose `done` record carries only amplitudes
pub fn extract_waveform_data_only_to_stream(
    state: &EngineState,
    request: ExtractRequest,
) -> EngineResult<ExtractionStream> {
    spawn_stream(state, request, Projection::DataOnly)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{engine, write_tone};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn request(path: &std::path::Path) -> ExtractRequest {
        ExtractRequest {
            samples_per_second: Some(10),
            ..ExtractRequest::new(path.to_string_lossy())
        }
    }

    fn assert_well_formed(records: &[EventRecord]) {
        assert!(records.len() >= 2);
        assert_eq!(records[0].event, EventKind::Start);
        assert!(records.last().unwrap().is_done());
        assert_eq!(records.iter().filter(|r| r.event == EventKind::Start).count(), 1);
        assert_eq!(records.iter().filter(|r| r.is_done()).count(), 1);

        let mut last: HashMap<ProgressOperation, u8> = HashMap::new();
        for record in records.iter().filter(|r| r.event == EventKind::Progress) {
            let operation = record.operation.unwrap();
            let percent = record.progress.unwrap();
            assert!(percent <= 100);
            if let Some(previous) = last.insert(operation, percent) {
                assert!(previous <= percent);
            }
        }
    }

    #[tokio::test]
    async fn test_stream_orders_records() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        write_tone(&audio, 3.0, 0.5);
        let state = engine(&dir.path().join("cache"));

        let stream = extract_waveform_to_stream(&state, request(&audio)).unwrap();
        let records = stream.collect().await;

        assert_well_formed(&records);
        let done = records.last().unwrap();
        assert_eq!(done.amplitudes_data.as_ref().map(Vec::len), Some(30));
        assert_eq!(done.amplitudes_for_first_second, Some(vec![50]));
        assert_eq!(done.duration, Some(3000));
        assert!(done.error.is_none());
        assert!(records.iter().all(|r| r.path == audio.to_string_lossy()));
    }

    #[tokio::test]
    async fn test_data_only_stream_omits_metadata() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        write_tone(&audio, 1.0, 0.5);
        let state = engine(&dir.path().join("cache"));

        let records = extract_waveform_data_only_to_stream(&state, request(&audio))
            .unwrap()
            .collect()
            .await;

        let done = records.last().unwrap();
        assert_eq!(done.amplitudes_data, Some(vec![50; 10]));
        assert!(done.duration.is_none());
        assert!(done.source.is_none());
        assert!(done.amplitudes_for_first_second.is_none());
    }

    #[tokio::test]
    async fn test_failure_ends_with_error_record() {
        let dir = tempdir().unwrap();
        let state = engine(&dir.path().join("cache"));

        let records = extract_waveform_to_stream(&state, request(&dir.path().join("missing.wav")))
            .unwrap()
            .collect()
            .await;

        assert_well_formed(&records);
        let done = records.last().unwrap();
        assert!(done.amplitudes_data.is_none());
        assert_eq!(done.error.as_ref().map(|e| e.code.as_str()), Some("FILE_NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_cached_stream_still_well_formed() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        write_tone(&audio, 1.0, 0.5);
        let state = engine(&dir.path().join("cache"));

        let first = extract_waveform_to_stream(&state, request(&audio))
            .unwrap()
            .collect()
            .await;
        let second = extract_waveform_to_stream(&state, request(&audio))
            .unwrap()
            .collect()
            .await;

        assert_well_formed(&second);
        assert_eq!(first.last().unwrap().amplitudes_data, second.last().unwrap().amplitudes_data);
    }

    #[tokio::test]
    async fn test_concurrent_streams_are_independent() {
        let dir = tempdir().unwrap();
        let quiet = dir.path().join("quiet.wav");
        let loud = dir.path().join("loud.wav");
        write_tone(&quiet, 1.0, 0.1);
        write_tone(&loud, 1.0, 0.9);
        let state = engine(&dir.path().join("cache"));

        let a = extract_waveform_to_stream(&state, request(&quiet)).unwrap();
        let b = extract_waveform_to_stream(&state, request(&loud)).unwrap();
        assert_ne!(a.request_id(), b.request_id());

        let (a, b) = tokio::join!(a.collect(), b.collect());
        assert_eq!(a.last().unwrap().amplitudes_data, Some(vec![10; 10]));
        assert_eq!(b.last().unwrap().amplitudes_data, Some(vec![90; 10]));
        assert!(a.iter().all(|r| r.path == quiet.to_string_lossy()));
    }

    #[tokio::test]
    async fn test_argument_error_returned_immediately() {
        let dir = tempdir().unwrap();
        let state = engine(&dir.path().join("cache"));

        let err = extract_waveform_to_stream(&state, ExtractRequest::new(""))
            .err()
            .unwrap();
        assert_eq!(err.code(), "ARGUMENT_ERROR");
    }

    #[tokio::test]
    async fn test_cancelled_stream_reports_cancel_or_result() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("long.wav");
        write_tone(&audio, 20.0, 0.5);
        let state = engine(&dir.path().join("cache"));

        let stream = extract_waveform_to_stream(&state, request(&audio)).unwrap();
        stream.cancel();
        assert!(stream.is_cancelled());
        let records = stream.collect().await;

        assert_well_formed(&records);
        let done = records.last().unwrap();
        match &done.error {
            Some(error) => assert_eq!(error.code, "CANCELLED"),
            None => assert!(done.amplitudes_data.is_some()),
        }
    }

    #[test]
    fn test_record_serializes_sparse_fields() {
        let record = EventRecord::progress("/a.mp3", ProgressOperation::Decoding, 40);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "path": "/a.mp3",
                "event": "progress",
                "operation": "DECODING",
                "progress": 40
            })
        );
    }
}
