//! Waveform module
//!
//! Value types for waveform extraction and the amplitude reducer that turns
//! decoded PCM into integer amplitudes.

pub mod reducer;
pub mod types;

pub use reducer::{reduce, reduce_with, AmplitudeReducer, Reduction, MAX_AMPLITUDE};
pub use types::{
    Amplitude, AmplitudeResult, AudioSource, CacheKey, CachePolicy, ProgressEvent,
    ProgressOperation, ReductionMethod, ReductionParams, SourceLocation, WaveformData,
};
