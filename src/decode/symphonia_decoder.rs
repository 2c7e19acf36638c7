//! Symphonia-backed decoder
//!
//! Streams packets from any container/codec symphonia was built with and
//! converts each decoded buffer to interleaved `f32`.

use super::{
    AudioDecoder, ByteProgress, DecodeError, PcmBlock, PcmStream, RemoteFetcher, StreamSpec,
};
use crate::pipeline::ProgressReporter;
use crate::waveform::{AudioSource, SourceLocation};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tempfile::NamedTempFile;

/// Default decoder for local files and, when a fetcher is configured, URLs
#[derive(Default)]
pub struct SymphoniaDecoder {
    remote: Option<RemoteFetcher>,
}

impl SymphoniaDecoder {
    /// Decoder for local files only
    pub fn new() -> Self {
        Self { remote: None }
    }

    /// Decoder that also downloads `http(s)` sources
    pub fn with_remote(fetcher: RemoteFetcher) -> Self {
        Self {
            remote: Some(fetcher),
        }
    }

    fn open_file(
        path: &Path,
        extension: Option<&str>,
        download: Option<NamedTempFile>,
    ) -> Result<SymphoniaStream, DecodeError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => DecodeError::NotFound(path.display().to_string()),
            _ => DecodeError::Io(e),
        })?;
        let len = file.metadata()?.len();
        let progress = ByteProgress::new(len);
        let source = CountingSource {
            file,
            len,
            progress: progress.clone(),
        };
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = extension {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match e {
                Error::Unsupported(msg) => {
                    DecodeError::UnsupportedFormat(format!("{}: {}", path.display(), msg))
                }
                other => DecodeError::CorruptStream(format!("{}: {}", path.display(), other)),
            })?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                DecodeError::UnsupportedFormat(format!("No audio track in {}", path.display()))
            })?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params.sample_rate.ok_or_else(|| {
            DecodeError::UnsupportedFormat(format!("Missing sample rate for {}", path.display()))
        })?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(1);

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| {
                DecodeError::UnsupportedFormat(format!("{}: {}", path.display(), e))
            })?;

        tracing::debug!(
            "Opened {:?}: {}Hz, {} channels, {:?} frames",
            path,
            sample_rate,
            channels,
            codec_params.n_frames
        );

        Ok(SymphoniaStream {
            format,
            decoder,
            track_id,
            spec: StreamSpec {
                sample_rate,
                channels,
                total_frames: codec_params.n_frames,
            },
            sample_buf: None,
            finished: false,
            progress,
            _download: download,
        })
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(
        &self,
        source: &AudioSource,
        reporter: &dyn ProgressReporter,
        cancel_flag: &AtomicBool,
    ) -> Result<Box<dyn PcmStream>, DecodeError> {
        match source.location() {
            SourceLocation::Local(path) => {
                let extension = path.extension().and_then(|ext| ext.to_str());
                Ok(Box::new(Self::open_file(path, extension, None)?))
            }
            SourceLocation::Remote(url) => {
                let fetcher = self.remote.as_ref().ok_or_else(|| {
                    DecodeError::UnsupportedSource(format!(
                        "Remote sources are disabled: {}",
                        url
                    ))
                })?;
                let download = fetcher.download(url, reporter, cancel_flag)?;
                let extension = Path::new(url.path())
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(str::to_string);
                let path = download.path().to_path_buf();
                Ok(Box::new(Self::open_file(
                    &path,
                    extension.as_deref(),
                    Some(download),
                )?))
            }
        }
    }

    fn supports_remote(&self) -> bool {
        self.remote.is_some()
    }
}

/// File handle that publishes its read position
struct CountingSource {
    file: File,
    len: u64,
    progress: ByteProgress,
}

impl Read for CountingSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.file.read(buf)?;
        self.progress.advance(read as u64);
        Ok(read)
    }
}

impl Seek for CountingSource {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let position = self.file.seek(pos)?;
        self.progress.set_position(position);
        Ok(position)
    }
}

impl MediaSource for CountingSource {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len)
    }
}

/// Packet-by-packet decode of one track
struct SymphoniaStream {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: StreamSpec,
    sample_buf: Option<SampleBuffer<f32>>,
    finished: bool,
    progress: ByteProgress,
    /// Keeps a downloaded file alive until decoding ends
    _download: Option<NamedTempFile>,
}

impl Iterator for SymphoniaStream {
    type Item = Result<PcmBlock, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.finished = true;
                    return None;
                }
                Err(Error::ResetRequired) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(DecodeError::CorruptStream(e.to_string())));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(Error::DecodeError(msg)) => {
                    tracing::debug!("Skipping undecodable packet: {}", msg);
                    continue;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(DecodeError::CorruptStream(e.to_string())));
                }
            };

            let spec = *decoded.spec();
            let capacity = decoded.capacity() as u64;
            let channels = spec.channels.count() as u16;

            let needs_new_buffer = self
                .sample_buf
                .as_ref()
                .map_or(true, |buf| (buf.capacity() as u64) < capacity * channels as u64);
            if needs_new_buffer {
                self.sample_buf = Some(SampleBuffer::<f32>::new(capacity, spec));
            }

            let Some(buf) = self.sample_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);
            if buf.samples().is_empty() {
                continue;
            }
            return Some(Ok(PcmBlock::new(buf.samples().to_vec(), channels)));
        }
    }
}

impl PcmStream for SymphoniaStream {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn byte_progress(&self) -> Option<ByteProgress> {
        Some(self.progress.clone())
    }
}
