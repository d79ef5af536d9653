use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

/// Delays between a completed entry and the transition it schedules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Entry complete → confirmation phase.
    #[serde(default = "TimingConfig::default_confirm_delay")]
    pub confirm_delay_ms: u64,
    /// Mismatch shown → full reset.
    #[serde(default = "TimingConfig::default_error_reset")]
    pub error_reset_ms: u64,
    /// Match shown → success navigation.
    #[serde(default = "TimingConfig::default_success_redirect")]
    pub success_redirect_ms: u64,
}

impl TimingConfig {
    fn default_confirm_delay() -> u64 { 1500 }
    fn default_error_reset() -> u64 { 820 }
    fn default_success_redirect() -> u64 { 500 }

    pub fn confirm_delay(&self) -> Duration {
        Duration::from_millis(self.confirm_delay_ms)
    }

    pub fn error_reset(&self) -> Duration {
        Duration::from_millis(self.error_reset_ms)
    }

    pub fn success_redirect(&self) -> Duration {
        Duration::from_millis(self.success_redirect_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            confirm_delay_ms: 1500,
            error_reset_ms: 820,
            success_redirect_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "PromptConfig::default_confirm")]
    pub confirm: String,
}

impl PromptConfig {
    fn default_confirm() -> String { "Confirma tu PIN".into() }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            confirm: Self::default_confirm(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    #[serde(default = "NavigationConfig::default_success_target")]
    pub success_target: String,
}

impl NavigationConfig {
    fn default_success_target() -> String { "success.html".into() }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            success_target: Self::default_success_target(),
        }
    }
}

/// Where attempt records go.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Log each record through tracing and keep nothing.
    #[default]
    Log,
    /// Append JSON lines to a local file.
    Jsonl { path: PathBuf },
    /// Firestore REST API.
    Firestore(FirestoreConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FirestoreConfig {
    pub project_id: String,
    pub api_key: String,
    #[serde(default = "FirestoreConfig::default_database")]
    pub database: String,
    #[serde(default = "FirestoreConfig::default_collection")]
    pub collection: String,
    #[serde(default = "FirestoreConfig::default_timeout")]
    pub timeout_ms: u64,
}

impl FirestoreConfig {
    fn default_database() -> String { "(default)".into() }
    fn default_collection() -> String { "pins".into() }
    fn default_timeout() -> u64 { 10_000 }

    pub fn documents_url(&self) -> String {
        format!(
            "https://firestore.googleapis.com/v1/projects/{}/databases/{}/documents/{}",
            self.project_id, self.database, self.collection
        )
    }
}

impl Config {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("pinpad")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&contents).with_context(|| "parsing config TOML")
    }
}

pub fn socket_path() -> PathBuf {
    // PINPAD_SOCK overrides for testing and for running several instances.
    if let Ok(path) = std::env::var("PINPAD_SOCK") {
        return PathBuf::from(path);
    }
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pinpad.sock")
}
