//! Waveform Extractor - audio amplitude extraction with an on-disk cache.
//!
//! Decodes an audio source, reduces it to a sequence of integer amplitudes
//! and caches the result so repeated requests skip decoding. The
//! [`commands`] module is the caller-facing API.

pub mod cache;
pub mod commands;
pub mod config;
pub mod decode;
pub mod pipeline;
pub mod utils;
pub mod waveform;

pub use commands::{
    clear_all_waveform_cache, clear_cache, extract_waveform, extract_waveform_data_only,
    extract_waveform_data_only_to_stream, extract_waveform_to_stream, EngineState, EventRecord,
    ExtractRequest, ExtractionStream,
};
pub use config::EngineConfig;
pub use utils::{EngineError, EngineResult, ErrorResponse};
pub use waveform::{AmplitudeResult, ReductionMethod, WaveformData};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
///
/// `RUST_LOG` overrides the default filter. Safe to call more than once.
pub fn init_tracing() {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waveform_extractor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Waveform Extractor v{}", env!("CARGO_PKG_VERSION"));
    }
}
