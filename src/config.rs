//! Engine configuration
//!
//! Loaded from an optional JSON file; missing fields fall back to defaults.

use crate::decode::{AudioDecoder, RemoteFetcher, SymphoniaDecoder};
use crate::utils::{EngineError, EngineResult};
use crate::waveform::{ReductionMethod, ReductionParams};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Environment variable overriding `cacheDir`
pub const CACHE_DIR_ENV: &str = "WAVEFORM_EXTRACTOR_CACHE_DIR";

const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 512 * 1024 * 1024;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub cache_dir: PathBuf,
    pub cache_enabled: bool,
    /// None keeps the decoder's native block resolution
    pub default_samples_per_second: Option<u32>,
    pub default_method: ReductionMethod,
    pub allow_remote: bool,
    pub max_download_bytes: u64,
    pub download_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache_enabled: true,
            default_samples_per_second: None,
            default_method: ReductionMethod::default(),
            allow_remote: true,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file, then apply environment overrides
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Argument(format!("Failed to read config {:?}: {}", path, e))
        })?;
        let config: EngineConfig = serde_json::from_str(&content).map_err(|e| {
            EngineError::Argument(format!("Failed to parse config {:?}: {}", path, e))
        })?;
        let config = config.with_env_overrides();
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `WAVEFORM_EXTRACTOR_CACHE_DIR` if set and non-empty
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|dir| !dir.is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.default_samples_per_second == Some(0) {
            return Err(EngineError::Argument(
                "defaultSamplesPerSecond must be greater than zero".into(),
            ));
        }
        if self.cache_enabled && self.cache_dir.as_os_str().is_empty() {
            return Err(EngineError::Argument("cacheDir must not be empty".into()));
        }
        Ok(())
    }

    /// Reduction parameters for a request, filling gaps from the defaults
    pub fn reduction_params(
        &self,
        method: Option<ReductionMethod>,
        samples_per_second: Option<u32>,
    ) -> EngineResult<ReductionParams> {
        ReductionParams::new(
            method.unwrap_or(self.default_method),
            samples_per_second.or(self.default_samples_per_second),
        )
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Build the default decoder for this configuration
    pub fn decoder(&self) -> Arc<dyn AudioDecoder> {
        if self.allow_remote {
            Arc::new(SymphoniaDecoder::with_remote(RemoteFetcher::new(
                self.download_timeout(),
                self.max_download_bytes,
            )))
        } else {
            Arc::new(SymphoniaDecoder::new())
        }
    }
}

fn default_cache_dir() -> PathBuf {
    ProjectDirs::from("", "", "waveform-extractor")
        .map(|dirs| dirs.cache_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("waveform-extractor"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.cache_enabled);
        assert!(config.allow_remote);
        assert_eq!(config.default_samples_per_second, None);
        assert_eq!(config.default_method, ReductionMethod::Average);
        assert_eq!(config.max_download_bytes, 512 * 1024 * 1024);
        assert_eq!(config.download_timeout(), Duration::from_secs(30));
        assert!(!config.cache_dir.as_os_str().is_empty());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cache_dir = dir.path().join("cache");
        std::fs::write(
            &path,
            format!(
                r#"{{"cacheDir": {:?}, "defaultMethod": "peak", "defaultSamplesPerSecond": 20}}"#,
                cache_dir.to_string_lossy()
            ),
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.default_method, ReductionMethod::Peak);
        assert_eq!(config.default_samples_per_second, Some(20));
        assert!(config.cache_enabled);
        if std::env::var_os(CACHE_DIR_ENV).is_none() {
            assert_eq!(config.cache_dir, cache_dir);
        }
    }

    #[test]
    fn test_zero_default_rate_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"defaultSamplesPerSecond": 0}"#).unwrap();

        let err = EngineConfig::load(&path).unwrap_err();
        assert_eq!(err.code(), "ARGUMENT_ERROR");
    }

    #[test]
    fn test_unparseable_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(EngineConfig::load(&path).is_err());
        assert!(EngineConfig::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_reduction_params_fall_back_to_defaults() {
        let config = EngineConfig {
            default_samples_per_second: Some(50),
            default_method: ReductionMethod::Peak,
            ..EngineConfig::default()
        };

        let params = config.reduction_params(None, None).unwrap();
        assert_eq!(params.method, ReductionMethod::Peak);
        assert_eq!(params.samples_per_second.map(|n| n.get()), Some(50));

        let params = config
            .reduction_params(Some(ReductionMethod::Average), Some(10))
            .unwrap();
        assert_eq!(params.method, ReductionMethod::Average);
        assert_eq!(params.samples_per_second.map(|n| n.get()), Some(10));

        assert!(config.reduction_params(None, Some(0)).is_err());
    }

    #[test]
    fn test_remote_capability_follows_config() {
        let config = EngineConfig {
            allow_remote: false,
            ..EngineConfig::default()
        };
        assert!(!config.decoder().supports_remote());
        assert!(EngineConfig::default().decoder().supports_remote());
    }
}
