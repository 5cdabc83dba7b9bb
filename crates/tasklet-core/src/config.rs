//! Configuration management for tasklet.
//!
//! Loads configuration from ${TASKLET_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable overriding `auth.domain`.
pub const DOMAIN_ENV: &str = "TASKLET_AUTH0_DOMAIN";
/// Environment variable overriding `auth.client_id`.
pub const CLIENT_ID_ENV: &str = "TASKLET_AUTH0_CLIENT_ID";

pub mod paths {
    //! Path resolution for tasklet configuration and data directories.
    //!
    //! TASKLET_HOME resolution order:
    //! 1. TASKLET_HOME environment variable (if set)
    //! 2. ~/.config/tasklet (default)

    use std::path::PathBuf;

    /// Returns the tasklet home directory.
    pub fn tasklet_home() -> PathBuf {
        if let Ok(home) = std::env::var("TASKLET_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".tasklet"),
            |h| h.join(".config").join("tasklet"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        tasklet_home().join("config.toml")
    }

    /// Returns the path to the file-backed credential store.
    pub fn credentials_path() -> PathBuf {
        tasklet_home().join("credentials.json")
    }

    /// Returns the directory for log files.
    pub fn logs_dir() -> PathBuf {
        tasklet_home().join("logs")
    }
}

/// Identity provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// When false the app runs as a local development user and never signs in.
    pub enabled: bool,
    /// Auth0 tenant domain, e.g. `acme.eu.auth0.com`.
    pub domain: String,
    /// Native application client id (public).
    pub client_id: String,
    /// Full base URL override (scheme included). Takes precedence over `domain`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Optional API audience for the interactive flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// Where the provider sends the browser after logout (must be allow-listed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logout_return_to: Option<String>,
    pub callback_port: u16,
    pub callback_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            domain: "YOUR_TENANT_REGION.auth0.com".to_string(),
            client_id: "YOUR_CLIENT_ID".to_string(),
            base_url: None,
            audience: None,
            logout_return_to: None,
            callback_port: 8765,
            callback_timeout_secs: 120,
            request_timeout_secs: 30,
        }
    }
}

impl AuthConfig {
    /// Returns the provider base URL without a trailing slash.
    pub fn effective_base_url(&self) -> String {
        match self.base_url.as_deref() {
            Some(url) if !url.trim().is_empty() => url.trim().trim_end_matches('/').to_string(),
            _ => format!("https://{}", self.domain.trim().trim_end_matches('/')),
        }
    }

    /// False while the tenant still carries the template placeholders.
    pub fn is_configured(&self) -> bool {
        let has_tenant = self.base_url.as_deref().is_some_and(|u| !u.trim().is_empty())
            || !(self.domain.trim().is_empty() || self.domain.starts_with("YOUR_"));
        let has_client = !(self.client_id.trim().is_empty() || self.client_id.starts_with("YOUR_"));
        has_tenant && has_client
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Credential store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Platform secure storage.
    #[default]
    Keyring,
    /// 0600 JSON file under TASKLET_HOME.
    File,
    /// In-process only.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Service name that groups keyring entries.
    pub keyring_service: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Keyring,
            keyring_service: "tasklet".to_string(),
        }
    }
}

/// Remote list source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemsConfig {
    pub endpoint: String,
    pub limit: u32,
}

impl Default for ItemsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://jsonplaceholder.typicode.com/todos".to_string(),
            limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Write to a rolling file under `logs/` instead of stderr.
    pub file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: false,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub items: ItemsConfig,
    pub log: LogConfig,
}

impl Config {
    /// Loads configuration from the default config path, then applies
    /// environment overrides.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&paths::config_path())?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Applies tenant overrides from a variable lookup (normally the process env).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(domain) = lookup(DOMAIN_ENV).filter(|v| !v.trim().is_empty()) {
            self.auth.domain = domain.trim().to_string();
        }
        if let Some(client_id) = lookup(CLIENT_ID_ENV).filter(|v| !v.trim().is_empty()) {
            self.auth.client_id = client_id.trim().to_string();
        }
    }

    /// Creates a default config file at the given path.
    ///
    /// # Errors
    /// Returns an error if the file already exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

/// Returns the default config template with comments.
///
/// Embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}
