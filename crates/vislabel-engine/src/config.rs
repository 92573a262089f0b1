use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_STORAGE_ROOT: &str = "./datasets";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_REGION: &str = "cn-beijing";
pub const DEFAULT_TARGET_BYTES: u64 = 300 * 1024;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_ARK_MODEL: &str = "doubao-1-5-vision-pro-250328";
/// Reported to the annotation host; the spelling matches what the host has
/// already stored for earlier predictions.
pub const DEFAULT_MODEL_VERSION: &str = "Doubao-1.5-Vison-Pro";

/// Storage and batch settings for [`crate::VisionBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Directory that the static file server exposes at `base_url`.
    pub storage_root: PathBuf,
    pub base_url: String,
    pub target_bytes: u64,
    pub model_version: String,
}

impl BackendConfig {
    pub fn new(storage_root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            storage_root: storage_root.into(),
            base_url: base_url.into(),
            target_bytes: DEFAULT_TARGET_BYTES,
            model_version: DEFAULT_MODEL_VERSION.to_string(),
        }
    }

    pub fn with_target_bytes(mut self, target_bytes: u64) -> Self {
        self.target_bytes = target_bytes;
        self
    }

    pub fn from_env() -> Result<Self> {
        let storage_root =
            non_empty_env("LOCAL_STORAGE_PATH").unwrap_or_else(|| DEFAULT_STORAGE_ROOT.to_string());
        let base_url =
            non_empty_env("LOCAL_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut config = Self::new(storage_root, base_url);
        if let Some(raw) = non_empty_env("VISLABEL_TARGET_BYTES") {
            config.target_bytes = raw
                .parse()
                .with_context(|| format!("VISLABEL_TARGET_BYTES is not a byte count: {raw}"))?;
        }
        if let Some(version) = non_empty_env("VISLABEL_MODEL_VERSION") {
            config.model_version = version;
        }
        Ok(config)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.storage_root.join("processed")
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_ROOT, DEFAULT_BASE_URL)
    }
}

/// Connection settings for the Ark chat-completions endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct ArkClientConfig {
    pub api_key: String,
    pub region: String,
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
}

impl ArkClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            region: DEFAULT_REGION.to_string(),
            api_base: ark_api_base_for_region(DEFAULT_REGION),
            model: DEFAULT_ARK_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn from_env() -> Result<Self> {
        let api_key = non_empty_env("ARK_API_KEY").context("ARK_API_KEY is not set")?;
        let mut config = Self::new(api_key);
        if let Some(region) = non_empty_env("TOS_REGION") {
            config.api_base = ark_api_base_for_region(&region);
            config.region = region;
        }
        if let Some(base) = non_empty_env("ARK_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty_env("ARK_MODEL") {
            config.model = model;
        }
        if let Some(raw) = non_empty_env("ARK_TIMEOUT_SECS") {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("ARK_TIMEOUT_SECS is not a number of seconds: {raw}"))?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

impl std::fmt::Debug for ArkClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArkClientConfig")
            .field("api_key", &"<redacted>")
            .field("region", &self.region)
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

pub fn ark_api_base_for_region(region: &str) -> String {
    format!("https://ark.{}.volces.com/api/v3", region.trim())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::{ark_api_base_for_region, ArkClientConfig, BackendConfig};

    #[test]
    fn backend_config_defaults_match_deployment() {
        let config = BackendConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.target_bytes, 307_200);
        assert_eq!(config.model_version, "Doubao-1.5-Vison-Pro");
        assert_eq!(
            config.processed_dir(),
            PathBuf::from("./datasets").join("processed")
        );
    }

    #[test]
    fn ark_config_defaults_and_redacted_debug() {
        let config = ArkClientConfig::new("secret-key");
        assert_eq!(config.region, "cn-beijing");
        assert_eq!(config.api_base, "https://ark.cn-beijing.volces.com/api/v3");
        assert_eq!(config.timeout, Duration::from_secs(120));
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn api_base_follows_region() {
        assert_eq!(
            ark_api_base_for_region(" cn-shanghai "),
            "https://ark.cn-shanghai.volces.com/api/v3"
        );
    }
}
