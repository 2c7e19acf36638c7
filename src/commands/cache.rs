//! Cache command handlers

use super::EngineState;
use crate::utils::{EngineError, EngineResult};
use crate::waveform::{AudioSource, CacheKey};

/// Evict one cache entry, selected by explicit key or by source path
///
/// Exactly one selector must be given. Returns whether an entry was removed;
/// store failures and a disabled cache both report `false`.
pub fn clear_cache(
    state: &EngineState,
    cache_key: Option<&str>,
    audio_path: Option<&str>,
) -> EngineResult<bool> {
    let cache_key = cache_key.filter(|key| !key.is_empty());
    let audio_path = audio_path.map(str::trim).filter(|path| !path.is_empty());

    let key = match (cache_key, audio_path) {
        (Some(key), None) => CacheKey::explicit(key),
        (None, Some(path)) => CacheKey::for_source(&AudioSource::parse(path)?),
        (None, None) => {
            return Err(EngineError::Argument(
                "Either cacheKey or audioPath is required".into(),
            ))
        }
        (Some(_), Some(_)) => {
            return Err(EngineError::Argument(
                "Only one of cacheKey or audioPath may be given".into(),
            ))
        }
    };

    let Some(store) = state.store() else {
        return Ok(false);
    };

    match store.evict(&key) {
        Ok(removed) => {
            tracing::info!("Cleared cache for '{}': {}", key, removed);
            Ok(removed)
        }
        Err(e) => {
            tracing::warn!("Failed to clear cache for '{}': {}", key, e);
            Ok(false)
        }
    }
}

/// Remove every cached waveform. Returns the number of entries removed;
/// a store failure is logged and counts as nothing removed.
pub fn clear_all_waveform_cache(state: &EngineState) -> EngineResult<usize> {
    let Some(store) = state.store() else {
        return Ok(0);
    };

    match store.clear_all() {
        Ok(removed) => {
            tracing::info!("Cleared {} cached waveforms", removed);
            Ok(removed)
        }
        Err(e) => {
            tracing::warn!("Failed to clear waveform cache: {}", e);
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{engine, write_tone};
    use crate::commands::{extract_waveform, ExtractRequest};
    use tempfile::tempdir;

    #[test]
    fn test_selector_validation() {
        let dir = tempdir().unwrap();
        let state = engine(dir.path());

        let err = clear_cache(&state, None, None).unwrap_err();
        assert_eq!(err.code(), "ARGUMENT_ERROR");

        let err = clear_cache(&state, Some("k"), Some("/a.mp3")).unwrap_err();
        assert_eq!(err.code(), "ARGUMENT_ERROR");

        let err = clear_cache(&state, Some(""), Some("  ")).unwrap_err();
        assert_eq!(err.code(), "ARGUMENT_ERROR");
    }

    #[test]
    fn test_absent_entry_is_false() {
        let dir = tempdir().unwrap();
        let state = engine(dir.path());
        assert!(!clear_cache(&state, Some("nothing"), None).unwrap());
        assert!(!clear_cache(&state, None, Some("/music/none.mp3")).unwrap());
    }

    #[tokio::test]
    async fn test_clear_by_key_and_by_path() {
        let dir = tempdir().unwrap();
        let audio = dir.path().join("tone.wav");
        write_tone(&audio, 1.0, 0.5);
        let state = engine(&dir.path().join("cache"));
        let path = audio.to_string_lossy().to_string();

        extract_waveform(&state, ExtractRequest::new(path.clone()))
            .await
            .unwrap();
        extract_waveform(
            &state,
            ExtractRequest {
                cache_key: Some("tone".into()),
                ..ExtractRequest::new(path.clone())
            },
        )
        .await
        .unwrap();

        assert!(clear_cache(&state, Some("tone"), None).unwrap());
        assert!(!clear_cache(&state, Some("tone"), None).unwrap());
        assert!(clear_cache(&state, None, Some(&path)).unwrap());
        assert_eq!(clear_all_waveform_cache(&state).unwrap(), 0);
    }

    #[test]
    fn test_closed_store_reports_false() {
        let dir = tempdir().unwrap();
        let state = engine(dir.path());
        state.shutdown();
        assert!(!clear_cache(&state, Some("k"), None).unwrap());
        assert_eq!(clear_all_waveform_cache(&state).unwrap(), 0);
    }
}
