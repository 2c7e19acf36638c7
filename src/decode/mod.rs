//! Audio decoding
//!
//! Turns an [`AudioSource`] into a lazy stream of interleaved PCM blocks.
//! Decoding is pluggable through [`AudioDecoder`]; the default
//! implementation is backed by symphonia.

mod remote;
mod symphonia_decoder;

pub use remote::RemoteFetcher;
pub use symphonia_decoder::SymphoniaDecoder;

use crate::pipeline::ProgressReporter;
use crate::waveform::AudioSource;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Decoding errors. All of them end the current extraction.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Audio file not found: {0}")]
    NotFound(String),

    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt audio stream: {0}")]
    CorruptStream(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decoding cancelled")]
    Cancelled,
}

/// Stream-level metadata known before the first block is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frame count reported by the container, if any
    pub total_frames: Option<u64>,
}

/// One decoded block of interleaved `f32` samples
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBlock {
    pub samples: Vec<f32>,
    pub channels: u16,
}

impl PcmBlock {
    pub fn new(samples: Vec<f32>, channels: u16) -> Self {
        Self {
            samples,
            channels: channels.max(1),
        }
    }

    /// Number of frames (samples per channel) in this block
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }
}

/// Read position within a stream's encoded bytes
///
/// Clones share the same counter, so a handle taken before decoding keeps
/// tracking the stream.
#[derive(Debug, Clone)]
pub struct ByteProgress {
    position: Arc<AtomicU64>,
    total: u64,
}

impl ByteProgress {
    pub fn new(total: u64) -> Self {
        Self {
            position: Arc::new(AtomicU64::new(0)),
            total,
        }
    }

    pub fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
    }

    pub fn advance(&self, bytes: u64) {
        self.position.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Fraction of the bytes consumed, in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.position.load(Ordering::Relaxed) as f64 / self.total as f64).clamp(0.0, 1.0)
    }
}

/// Lazy, finite sequence of decoded blocks
pub trait PcmStream: Iterator<Item = Result<PcmBlock, DecodeError>> + Send {
    fn spec(&self) -> StreamSpec;

    /// Byte position of the underlying source, for progress when the frame
    /// count is unknown
    fn byte_progress(&self) -> Option<ByteProgress> {
        None
    }
}

/// Pluggable decoding capability
pub trait AudioDecoder: Send + Sync {
    /// Open `source` for streaming decode.
    ///
    /// Implementations that transfer remote data first report
    /// `Downloading` stages through `reporter`, and stop with
    /// [`DecodeError::Cancelled`] once `cancel_flag` is set.
    fn decode(
        &self,
        source: &AudioSource,
        reporter: &dyn ProgressReporter,
        cancel_flag: &AtomicBool,
    ) -> Result<Box<dyn PcmStream>, DecodeError>;

    /// Whether URL sources can be decoded
    fn supports_remote(&self) -> bool {
        false
    }
}

/// In-memory PCM split into fixed-size blocks
///
/// Useful for decoders that produce all samples up front, or for feeding
/// synthetic audio into the reducer.
pub struct BufferedStream {
    spec: StreamSpec,
    samples: Vec<f32>,
    block_frames: usize,
    position: usize,
}

impl BufferedStream {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16, block_frames: usize) -> Self {
        let channels = channels.max(1);
        let total_frames = (samples.len() / channels as usize) as u64;
        Self {
            spec: StreamSpec {
                sample_rate,
                channels,
                total_frames: Some(total_frames),
            },
            samples,
            block_frames: block_frames.max(1),
            position: 0,
        }
    }
}

impl Iterator for BufferedStream {
    type Item = Result<PcmBlock, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.samples.len() {
            return None;
        }
        let block_len = self.block_frames * self.spec.channels as usize;
        let end = (self.position + block_len).min(self.samples.len());
        let block = PcmBlock::new(self.samples[self.position..end].to_vec(), self.spec.channels);
        self.position = end;
        Some(Ok(block))
    }
}

impl PcmStream for BufferedStream {
    fn spec(&self) -> StreamSpec {
        self.spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_stream_blocks() {
        let samples: Vec<f32> = (0..10).map(|i| i as f32 / 10.0).collect();
        let stream = BufferedStream::new(samples, 8000, 2, 2);
        assert_eq!(stream.spec().total_frames, Some(5));

        let blocks: Vec<PcmBlock> = stream.map(|b| b.unwrap()).collect();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].frames(), 2);
        assert_eq!(blocks[2].frames(), 1);
    }

    #[test]
    fn test_byte_progress_shared_between_clones() {
        let progress = ByteProgress::new(200);
        let handle = progress.clone();
        assert_eq!(handle.fraction(), 0.0);

        progress.advance(50);
        assert_eq!(handle.fraction(), 0.25);
        progress.set_position(400);
        assert_eq!(handle.fraction(), 1.0);

        assert_eq!(ByteProgress::new(0).fraction(), 0.0);
    }
}
