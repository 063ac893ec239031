use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

use crate::sql_gateway::injector::DEFAULT_TENANT_COLUMN;
use crate::sql_gateway::DEFAULT_MAX_ROWS;
use crate::tools::sql_query::SQL_QUERY_TOOL_NAME;
use crate::tools::time_info::{DEFAULT_TIME_API_URL, DEFAULT_TIME_ZONE, TIME_INFO_TOOL_NAME};

pub const APP_DIR_NAME: &str = "fin-assistant";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to access settings file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

// ============ Sections ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    pub model: String,
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f64,
    pub request_timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            temperature: 0.3,
            request_timeout_secs: 60,
        }
    }
}

impl ModelSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    pub max_tool_calls: usize,
    pub max_retries_per_tool: u32,
    pub enabled_tools: Vec<String>,
    /// Ask the model to rewrite the user's message before answering it
    pub rewrite_user_message: bool,
    /// Replaces the built-in financial assistant prompt when set
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_tool_calls: 10,
            max_retries_per_tool: 2,
            enabled_tools: default_enabled_tools(),
            rewrite_user_message: true,
            system_prompt: None,
        }
    }
}

pub fn default_enabled_tools() -> Vec<String> {
    vec![SQL_QUERY_TOOL_NAME.to_string(), TIME_INFO_TOOL_NAME.to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub tenant_column: String,
    /// Tables that are never constrained by tenant
    pub unscoped_tables: Vec<String>,
    pub max_rows: usize,
    pub query_timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: get_data_dir().join("finance.db"),
            tenant_column: DEFAULT_TENANT_COLUMN.to_string(),
            unscoped_tables: Vec::new(),
            max_rows: DEFAULT_MAX_ROWS,
            query_timeout_secs: 30,
        }
    }
}

impl DatabaseSettings {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            request_timeout_secs: 180,
        }
    }
}

impl ServerSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeApiSettings {
    pub base_url: String,
    pub time_zone: String,
    pub timeout_secs: u64,
}

impl Default for TimeApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_TIME_API_URL.to_string(),
            time_zone: DEFAULT_TIME_ZONE.to_string(),
            timeout_secs: 10,
        }
    }
}

impl TimeApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

// ============ App Settings ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub log_level: String,
    pub model: ModelSettings,
    pub agent: AgentSettings,
    pub database: DatabaseSettings,
    pub server: ServerSettings,
    pub time_api: TimeApiSettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            model: ModelSettings::default(),
            agent: AgentSettings::default(),
            database: DatabaseSettings::default(),
            server: ServerSettings::default(),
            time_api: TimeApiSettings::default(),
        }
    }
}

impl AppSettings {
    /// Reject values that would make the gateway or the loop unsafe to run.
    pub fn validate(&self) -> Result<(), SettingsError> {
        validate_identifier(&self.database.tenant_column)?;
        for table in &self.database.unscoped_tables {
            validate_identifier(table)?;
        }
        if self.database.max_rows == 0 {
            return Err(SettingsError::Invalid("database.max_rows must be at least 1".into()));
        }
        if self.agent.max_tool_calls == 0 {
            return Err(SettingsError::Invalid("agent.max_tool_calls must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(SettingsError::Invalid(format!(
                "model.temperature must be between 0 and 2, got {}",
                self.model.temperature
            )));
        }
        Ok(())
    }
}

/// Plain SQL identifier: letter or underscore, then letters, digits or underscores.
pub fn validate_identifier(name: &str) -> Result<(), SettingsError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SettingsError::Invalid(format!(
            "'{}' is not a valid SQL identifier",
            name
        )));
    }
    Ok(())
}

// ============ Paths ============

pub fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join("settings.json")
}

pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

/// Load settings from `path`. A missing file yields defaults; a malformed one is an error.
pub async fn load_settings(path: &Path) -> Result<AppSettings, SettingsError> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = ?path, "no settings file found, using defaults");
            return Ok(AppSettings::default());
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let settings: AppSettings =
        serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    settings.validate()?;
    tracing::info!(path = ?path, "settings loaded");
    Ok(settings)
}

pub async fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), SettingsError> {
    let io_err = |source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let contents = serde_json::to_string_pretty(settings).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, contents).await.map_err(io_err)?;

    tracing::info!(path = ?path, "settings saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: AppSettings =
            serde_json::from_str(r#"{"agent": {"max_tool_calls": 4}, "database": {"tenant_column": "user_id"}}"#)
                .unwrap();
        assert_eq!(settings.agent.max_tool_calls, 4);
        assert_eq!(settings.agent.max_retries_per_tool, 2);
        assert_eq!(settings.agent.enabled_tools, default_enabled_tools());
        assert!(settings.agent.rewrite_user_message);
        assert_eq!(settings.database.tenant_column, "user_id");
        assert_eq!(settings.database.max_rows, DEFAULT_MAX_ROWS);
        assert_eq!(settings.model.model, DEFAULT_MODEL);
        assert_eq!(settings.server.port, 8000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("tenant_key").is_ok());
        assert!(validate_identifier("_t1").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("tenant key").is_err());
        assert!(validate_identifier("t; DROP TABLE x").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut settings = AppSettings::default();
        settings.database.max_rows = 0;
        assert!(settings.validate().is_err());

        let mut settings = AppSettings::default();
        settings.agent.max_tool_calls = 0;
        assert!(settings.validate().is_err());
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(settings, AppSettings::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut settings = AppSettings::default();
        settings.agent.enabled_tools.push("account_tool".to_string());
        settings.time_api.time_zone = "Europe/Madrid".to_string();

        save_settings(&path, &settings).await.unwrap();
        let loaded = load_settings(&path).await.unwrap();
        assert_eq!(loaded, settings);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(matches!(
            load_settings(&path).await,
            Err(SettingsError::Parse { .. })
        ));
    }
}
