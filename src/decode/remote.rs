//! Remote source download
//!
//! Fetches `http(s)` audio into a temporary file before decoding, with a
//! bounded response size and `Downloading` progress.

use super::DecodeError;
use crate::pipeline::ProgressReporter;
use crate::waveform::ProgressOperation;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tempfile::NamedTempFile;
use url::Url;

const CHUNK_SIZE: usize = 64 * 1024;

/// HTTP downloader with shared timeouts
pub struct RemoteFetcher {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl RemoteFetcher {
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self { agent, max_bytes }
    }

    /// Download `url` into a temporary file that lives as long as the handle
    ///
    /// `cancel_flag` is checked before every chunk.
    pub fn download(
        &self,
        url: &Url,
        reporter: &dyn ProgressReporter,
        cancel_flag: &AtomicBool,
    ) -> Result<NamedTempFile, DecodeError> {
        tracing::info!("Downloading remote audio: {}", url);
        reporter.on_stage(ProgressOperation::Downloading, 0);

        let response = self.agent.get(url.as_str()).call().map_err(|e| match e {
            ureq::Error::Status(404, _) => DecodeError::NotFound(url.to_string()),
            ureq::Error::Status(code, _) => {
                DecodeError::Network(format!("HTTP {} for {}", code, url))
            }
            ureq::Error::Transport(transport) => DecodeError::Network(transport.to_string()),
        })?;

        let content_length = response
            .header("Content-Length")
            .and_then(|value| value.parse::<u64>().ok());
        if let Some(length) = content_length {
            if length > self.max_bytes {
                return Err(DecodeError::Network(format!(
                    "Response too large: {} bytes (limit {})",
                    length, self.max_bytes
                )));
            }
        }

        let mut file = tempfile::Builder::new()
            .prefix("waveform-download-")
            .tempfile()?;
        let mut reader = response
            .into_reader()
            .take(self.max_bytes.saturating_add(1));
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total: u64 = 0;

        loop {
            if cancel_flag.load(Ordering::Relaxed) {
                tracing::info!("Download of {} cancelled after {} bytes", url, total);
                return Err(DecodeError::Cancelled);
            }
            let read = reader
                .read(&mut buf)
                .map_err(|e| DecodeError::Network(e.to_string()))?;
            if read == 0 {
                break;
            }
            total += read as u64;
            if total > self.max_bytes {
                return Err(DecodeError::Network(format!(
                    "Response exceeded {} bytes",
                    self.max_bytes
                )));
            }
            file.write_all(&buf[..read])?;

            if let Some(length) = content_length.filter(|length| *length > 0) {
                let percent = (total.saturating_mul(100) / length).min(99) as u8;
                reporter.on_stage(ProgressOperation::Downloading, percent);
            }
        }

        file.flush()?;
        reporter.on_stage(ProgressOperation::Downloading, 100);
        tracing::debug!("Downloaded {} bytes from {}", total, url);
        Ok(file)
    }
}
