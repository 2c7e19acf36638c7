//! On-disk amplitude cache
//!
//! One JSON file per entry, named by the blake3 hash of the cache key.
//! Writes go to a temporary file in the same directory and are renamed into
//! place, so readers only ever see complete entries.

use crate::waveform::{AmplitudeResult, AudioSource, CacheKey, ReductionParams};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use thiserror::Error;

const ENTRY_EXTENSION: &str = "json";

/// Cache store errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache store is closed")]
    Closed,
}

/// A persisted extraction result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: CacheKey,
    /// Parameters the payload was reduced with
    pub params: ReductionParams,
    pub payload: AmplitudeResult,
    pub created_at: DateTime<Utc>,
}

/// Directory-backed cache of amplitude results
pub struct CacheStore {
    dir: PathBuf,
    /// Per-entry write locks, keyed by file stem
    key_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Set once the store is closed; writers hold a read guard
    closed: RwLock<bool>,
}

impl CacheStore {
    /// Open (and create if needed) the cache directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        tracing::info!("Opened waveform cache at {:?}", dir);
        Ok(Self {
            dir,
            key_locks: Mutex::new(HashMap::new()),
            closed: RwLock::new(false),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", stem, ENTRY_EXTENSION))
    }

    /// Run `f` while holding the write lock for `stem`
    ///
    /// Lock entries are dropped again once no other caller holds them, so the
    /// map only tracks keys with writes in flight.
    fn with_key_lock<T>(&self, stem: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .key_locks
            .lock()
            .entry(stem.to_string())
            .or_default()
            .clone();

        let outcome = {
            let _guard = lock.lock();
            f()
        };

        // Clones are only taken under the map lock, so a count of two means
        // the map and this call are the only holders.
        let mut locks = self.key_locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(stem);
        }
        outcome
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.key_locks.lock().len()
    }

    /// Read the entry for `key`
    ///
    /// Entries that fail to parse are reported as absent.
    pub fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(&key.file_stem());
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) if &entry.key == key => Ok(Some(entry)),
            Ok(entry) => {
                tracing::warn!(
                    "Cache file {:?} holds key '{}', expected '{}'",
                    path,
                    entry.key,
                    key
                );
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache file {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    /// Store `payload` under `key`, replacing any existing entry
    pub fn put(
        &self,
        key: &CacheKey,
        params: ReductionParams,
        payload: &AmplitudeResult,
    ) -> Result<(), CacheError> {
        let closed = self.closed.read();
        if *closed {
            return Err(CacheError::Closed);
        }

        let stem = key.file_stem();
        self.with_key_lock(&stem, || {
            let entry = CacheEntry {
                key: key.clone(),
                params,
                payload: payload.clone(),
                created_at: Utc::now(),
            };

            let temp = NamedTempFile::new_in(&self.dir)?;
            let mut writer = BufWriter::new(temp);
            serde_json::to_writer(&mut writer, &entry)?;
            writer.flush()?;
            let temp = writer.into_inner().map_err(|e| CacheError::Io(e.into_error()))?;
            temp.as_file().sync_all()?;
            temp.persist(self.entry_path(&stem))
                .map_err(|e| CacheError::Io(e.error))?;
            Ok::<(), CacheError>(())
        })?;

        tracing::debug!("Cached {} amplitudes for '{}'", payload.amplitudes.len(), key);
        Ok(())
    }

    /// Remove the entry for `key`. Returns whether something was removed.
    pub fn evict(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let closed = self.closed.read();
        if *closed {
            return Err(CacheError::Closed);
        }

        let stem = key.file_stem();
        match self.with_key_lock(&stem, || fs::remove_file(self.entry_path(&stem))) {
            Ok(()) => {
                tracing::debug!("Evicted cache entry '{}'", key);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the entry whose key is derived from `source`
    pub fn evict_by_source(&self, source: &AudioSource) -> Result<bool, CacheError> {
        self.evict(&CacheKey::for_source(source))
    }

    /// Remove every entry. Returns the number of entries removed.
    pub fn clear_all(&self) -> Result<usize, CacheError> {
        let closed = self.closed.read();
        if *closed {
            return Err(CacheError::Closed);
        }

        let mut removed = 0;
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            match self.with_key_lock(stem, || fs::remove_file(&path)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!("Cleared {} waveform cache entries", removed);
        Ok(removed)
    }

    /// Number of entries currently on disk
    pub fn entry_count(&self) -> Result<usize, CacheError> {
        let mut count = 0;
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Wait for in-flight writes and refuse new ones
    pub fn close(&self) {
        let mut closed = self.closed.write();
        if !*closed {
            *closed = true;
            tracing::info!("Closed waveform cache at {:?}", self.dir);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }
}
