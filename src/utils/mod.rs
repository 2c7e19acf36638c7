//! Utility modules
//!
//! Common utilities and helpers used across the engine.

pub mod error;

pub use error::{EngineError, EngineResult, ErrorResponse};
