//! Amplitude reduction
//!
//! Aggregates decoded PCM into fixed-rate integer amplitudes. Each window
//! holds `1 / samples_per_second` seconds of audio (or one decoded block at
//! native resolution) and is reduced to either the mean or the maximum
//! absolute magnitude, scaled to `0..=MAX_AMPLITUDE`.

use super::types::{Amplitude, AmplitudeResult, AudioSource, ReductionMethod, ReductionParams};
use crate::decode::{DecodeError, PcmBlock, PcmStream};
use crate::pipeline::ExtractionError;

/// Upper bound of normalized amplitudes. Full-scale PCM maps here.
pub const MAX_AMPLITUDE: Amplitude = 100;

/// Running aggregate for one window
#[derive(Debug, Clone, Copy)]
struct WindowAccumulator {
    method: ReductionMethod,
    sum: f64,
    peak: f32,
    frames: u64,
}

impl WindowAccumulator {
    fn new(method: ReductionMethod) -> Self {
        Self {
            method,
            sum: 0.0,
            peak: 0.0,
            frames: 0,
        }
    }

    fn add(&mut self, magnitude: f32) {
        self.sum += magnitude as f64;
        self.peak = self.peak.max(magnitude);
        self.frames += 1;
    }

    fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Emit the window's amplitude and reset
    fn take(&mut self) -> Amplitude {
        let value = match self.method {
            ReductionMethod::Average => self.sum / self.frames.max(1) as f64,
            ReductionMethod::Peak => self.peak as f64,
        };
        *self = Self::new(self.method);
        normalize(value)
    }
}

fn normalize(value: f64) -> Amplitude {
    (value.clamp(0.0, 1.0) * MAX_AMPLITUDE as f64).round() as Amplitude
}

/// Magnitude of one interleaved frame across its channels
fn frame_magnitude(frame: &[f32], method: ReductionMethod) -> f32 {
    let abs = frame
        .iter()
        .map(|s| if s.is_finite() { s.abs() } else { 0.0 });
    match method {
        ReductionMethod::Average => abs.sum::<f32>() / frame.len().max(1) as f32,
        ReductionMethod::Peak => abs.fold(0.0, f32::max),
    }
}

/// Output of [`AmplitudeReducer::finish`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    pub amplitudes: Vec<Amplitude>,
    pub amplitudes_for_first_second: Vec<Amplitude>,
    pub total_frames: u64,
    pub duration_ms: u64,
}

/// Incremental reducer fed one decoded block at a time
///
/// The first-second amplitude is a single 1 Hz window over the same frames,
/// aggregated in its own accumulator and never derived from the main
/// sequence.
pub struct AmplitudeReducer {
    params: ReductionParams,
    sample_rate: u32,
    frames_seen: u64,

    main: WindowAccumulator,
    main_window: u64,
    amplitudes: Vec<Amplitude>,

    first: WindowAccumulator,
    first_second: Option<Amplitude>,
}

impl AmplitudeReducer {
    pub fn new(params: ReductionParams, sample_rate: u32) -> Self {
        Self {
            params,
            sample_rate: sample_rate.max(1),
            frames_seen: 0,
            main: WindowAccumulator::new(params.method),
            main_window: 0,
            amplitudes: Vec::new(),
            first: WindowAccumulator::new(params.method),
            first_second: None,
        }
    }

    /// Frames consumed so far
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Window index of `frame` at the configured rate
    fn window_of(&self, frame: u64, rate: u32) -> u64 {
        (frame as u128 * rate as u128 / self.sample_rate as u128) as u64
    }

    pub fn push_block(&mut self, block: &PcmBlock) {
        let channels = block.channels.max(1) as usize;
        let rate = self.params.samples_per_second.map(|r| r.get());
        let one_second = self.sample_rate as u64;

        for frame in block.samples.chunks_exact(channels) {
            let magnitude = frame_magnitude(frame, self.params.method);

            if let Some(rate) = rate {
                let window = self.window_of(self.frames_seen, rate);
                if window != self.main_window && !self.main.is_empty() {
                    self.amplitudes.push(self.main.take());
                }
                self.main_window = window;
            }
            self.main.add(magnitude);

            if self.first_second.is_none() {
                if self.frames_seen < one_second {
                    self.first.add(magnitude);
                } else {
                    self.close_first_second();
                }
            }

            self.frames_seen += 1;
        }

        // Native resolution: one window per decoded block
        if rate.is_none() && !self.main.is_empty() {
            self.amplitudes.push(self.main.take());
        }
    }

    fn close_first_second(&mut self) {
        if !self.first.is_empty() {
            self.first_second = Some(self.first.take());
        }
    }

    pub fn finish(mut self) -> Reduction {
        if !self.main.is_empty() {
            self.amplitudes.push(self.main.take());
        }
        if self.first_second.is_none() {
            self.close_first_second();
        }
        Reduction {
            amplitudes: self.amplitudes,
            amplitudes_for_first_second: self.first_second.into_iter().collect(),
            total_frames: self.frames_seen,
            duration_ms: self.frames_seen * 1000 / self.sample_rate as u64,
        }
    }
}

/// Reduce a whole stream into an [`AmplitudeResult`]
pub fn reduce(
    stream: &mut dyn PcmStream,
    params: ReductionParams,
    source: &AudioSource,
) -> Result<AmplitudeResult, ExtractionError> {
    reduce_with(stream, params, source, |_| Ok(()))
}

/// Like [`reduce`], calling `on_block` with the frame count after every block
///
/// An error returned from `on_block` stops consuming the stream.
pub fn reduce_with<F>(
    stream: &mut dyn PcmStream,
    params: ReductionParams,
    source: &AudioSource,
    mut on_block: F,
) -> Result<AmplitudeResult, ExtractionError>
where
    F: FnMut(u64) -> Result<(), ExtractionError>,
{
    let spec = stream.spec();
    if spec.sample_rate == 0 {
        return Err(DecodeError::CorruptStream("Stream reports a zero sample rate".into()).into());
    }

    let mut reducer = AmplitudeReducer::new(params, spec.sample_rate);
    for block in &mut *stream {
        let block = block?;
        reducer.push_block(&block);
        on_block(reducer.frames_seen())?;
    }

    let reduction = reducer.finish();
    if reduction.amplitudes.is_empty() {
        return Err(ExtractionError::EmptyAudio(source.identifier()));
    }

    Ok(AmplitudeResult {
        amplitudes: reduction.amplitudes,
        amplitudes_for_first_second: reduction.amplitudes_for_first_second,
        duration_ms: reduction.duration_ms,
        source: source.identifier(),
    })
}
