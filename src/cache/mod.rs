//! Cache store module
//!
//! Persists extraction results so repeated requests skip decoding.

pub mod store;

pub use store::{CacheEntry, CacheError, CacheStore};
