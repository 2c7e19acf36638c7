//! Engine command handlers
//!
//! The caller-facing API: extraction (blocking result or event stream) and
//! cache maintenance, all operating on a shared [`EngineState`].

pub mod cache;
pub mod extract;
pub mod stream;

pub use cache::{clear_all_waveform_cache, clear_cache};
pub use extract::{
    extract_waveform, extract_waveform_data_only, extract_waveform_data_only_with_progress,
    extract_waveform_with_progress, ExtractRequest,
};
pub use stream::{
    extract_waveform_data_only_to_stream, extract_waveform_to_stream, EventKind, EventRecord,
    ExtractionStream,
};

use crate::cache::CacheStore;
use crate::config::EngineConfig;
use crate::decode::AudioDecoder;
use crate::utils::EngineResult;
use std::sync::Arc;

/// Process-wide engine state shared by every command
#[derive(Clone)]
pub struct EngineState {
    config: Arc<EngineConfig>,
    store: Option<Arc<CacheStore>>,
    decoder: Arc<dyn AudioDecoder>,
}

impl EngineState {
    /// Open the engine with the decoder described by `config`
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let decoder = config.decoder();
        Self::with_decoder(config, decoder)
    }

    /// Open the engine with a caller-provided decoder
    pub fn with_decoder(config: EngineConfig, decoder: Arc<dyn AudioDecoder>) -> EngineResult<Self> {
        config.validate()?;

        let store = if config.cache_enabled {
            Some(Arc::new(CacheStore::open(config.cache_dir.clone())?))
        } else {
            tracing::info!("Waveform cache disabled");
            None
        };

        Ok(Self {
            config: Arc::new(config),
            store,
            decoder,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The cache store, if caching is enabled
    pub fn store(&self) -> Option<&Arc<CacheStore>> {
        self.store.as_ref()
    }

    pub(crate) fn decoder(&self) -> Arc<dyn AudioDecoder> {
        self.decoder.clone()
    }

    /// Close the cache store. In-flight writes finish first; later writes
    /// are rejected.
    pub fn shutdown(&self) {
        if let Some(store) = &self.store {
            store.close();
        }
        tracing::info!("Engine shut down");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::path::Path;

    /// Mono 16-bit WAV of `seconds` at 8 kHz with a constant `level` in 0..=1
    pub fn write_tone(path: &Path, seconds: f32, level: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let value = (level * i16::MAX as f32) as i16;
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(8000.0 * seconds) as usize {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    pub fn engine(cache_dir: &Path) -> EngineState {
        EngineState::new(EngineConfig {
            cache_dir: cache_dir.to_path_buf(),
            ..EngineConfig::default()
        })
        .unwrap()
    }
}
