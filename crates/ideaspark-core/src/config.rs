//! Application configuration management.
//!
//! Configuration comes from three places, in increasing priority:
//! built-in defaults, the environment (optionally seeded from a `.env`
//! file), and an overrides file at `~/.config/ideaspark/config.json`.
//!
//! The backend base URL depends on the build profile: development builds
//! talk to a backend on the developer machine, production builds talk to
//! `https://api.ideaspark.com`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Application name used for config/data directory paths
const APP_NAME: &str = "ideaspark";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Production backend.
const PRODUCTION_BASE_URL: &str = "https://api.ideaspark.com";

/// Port and context path of the development backend.
const DEV_BACKEND_PORT: u16 = 8080;
const DEV_BACKEND_PATH: &str = "/api";

/// Host an Android emulator uses to reach the development machine.
const ANDROID_EMULATOR_HOST: &str = "10.0.2.2";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const DEFAULT_DEVICE_INFO: &str = "IdeaSpark Mobile v1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildProfile {
    #[default]
    Development,
    Production,
}

impl BuildProfile {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Some(Self::Development),
            "prod" | "production" | "release" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Keys for the third-party AI providers. This crate never uses them; they
/// are carried so the AI screens get them from the same configuration source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderKeys {
    pub cerebras_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub build: BuildProfile,
    /// Explicit backend URL. When unset the URL is derived from the build profile.
    pub api_base_url: Option<String>,
    /// Host of the development backend, as reported by the packager (`host` or `host:port`).
    pub dev_host: Option<String>,
    /// Whether the app runs inside an Android emulator.
    pub android_emulator: bool,
    pub device_info: String,
    pub request_timeout_secs: u64,
    /// Service name under which secrets are stored in the OS keychain.
    pub keyring_service: String,
    #[serde(skip_serializing)]
    pub provider_keys: ProviderKeys,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build: BuildProfile::default(),
            api_base_url: None,
            dev_host: None,
            android_emulator: false,
            device_info: DEFAULT_DEVICE_INFO.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            keyring_service: APP_NAME.to_string(),
            provider_keys: ProviderKeys::default(),
        }
    }
}

impl Config {
    /// Config pointing at a fixed backend URL. Used by embedding hosts that
    /// resolve the URL themselves, and by tests.
    pub fn with_base_url(url: impl Into<String>) -> Self {
        Self {
            api_base_url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Build a config from the environment, loading `.env` first if present.
    pub fn from_env() -> Self {
        // Missing .env is the normal case on device builds
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(build) = lookup("IDEASPARK_BUILD").as_deref().and_then(BuildProfile::parse) {
            config.build = build;
        }
        config.api_base_url = lookup("IDEASPARK_API_BASE_URL").filter(|v| !v.trim().is_empty());
        config.dev_host = lookup("IDEASPARK_DEV_HOST").filter(|v| !v.trim().is_empty());
        config.android_emulator = lookup("IDEASPARK_ANDROID_EMULATOR")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        if let Some(info) = lookup("IDEASPARK_DEVICE_INFO") {
            config.device_info = info;
        }
        config.provider_keys = ProviderKeys {
            cerebras_api_key: lookup("CEREBRAS_API_KEY"),
            gemini_api_key: lookup("GEMINI_API_KEY"),
        };
        config
    }

    /// Load the environment config and apply the on-disk overrides file, if any.
    pub fn load() -> Result<Self> {
        let env_config = Self::from_env();
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(env_config);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        // Provider keys are never written to disk
        config.provider_keys = env_config.provider_keys;
        debug!(path = %path.display(), "Loaded config overrides");
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the fallback credential file.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find local data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Resolve the backend base URL, without a trailing slash.
    pub fn base_url(&self) -> String {
        if let Some(ref url) = self.api_base_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.build {
            BuildProfile::Production => PRODUCTION_BASE_URL.to_string(),
            BuildProfile::Development => format!(
                "http://{}:{}{}",
                self.resolve_dev_host(),
                DEV_BACKEND_PORT,
                DEV_BACKEND_PATH
            ),
        }
    }

    fn resolve_dev_host(&self) -> String {
        let host = self
            .dev_host
            .as_deref()
            .and_then(|h| h.split(':').next())
            .filter(|h| !h.is_empty())
            .unwrap_or("localhost");

        let is_loopback = host == "localhost" || host == "127.0.0.1";
        if self.android_emulator && is_loopback {
            ANDROID_EMULATOR_HOST.to_string()
        } else {
            host.to_string()
        }
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
