//! Extraction pipeline module
//!
//! Orchestrates cache lookup, decoding and reduction for one request.

pub mod extraction;
pub mod progress;
pub mod state;

pub use extraction::{Extraction, ExtractionError, ExtractionPipeline, ExtractionRequest};
pub use progress::{CallbackReporter, ChannelReporter, NoopReporter, ProgressReporter};
pub use state::ExtractionState;
