//! Command-line argument parsing and launch configuration.
//!
//! This module handles CLI argument parsing using clap, and applies
//! launch-time overrides on top of the settings file.

use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

use crate::settings::{get_config_path, AppSettings, SettingsError};

/// CLI arguments for fin-assistant
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "fin-assistant", about = "Ask the financial assistant a question")]
pub struct CliArgs {
    /// Settings file (defaults to the user config directory)
    #[arg(long, value_name = "PATH", env = "FIN_ASSISTANT_CONFIG")]
    pub config: Option<PathBuf>,
    /// Tenant whose data the assistant may read
    #[arg(long, value_name = "ID", env = "FIN_ASSISTANT_TENANT")]
    pub tenant: Option<i64>,
    /// Question to ask (string or @path/to/file)
    #[arg(long, value_name = "TEXT_OR_@FILE", env = "FIN_ASSISTANT_MESSAGE")]
    pub message: Option<String>,
    /// Create missing tables and exit unless a message is given
    #[arg(long, env = "FIN_ASSISTANT_INIT_DB")]
    pub init_db: bool,
    /// Load demo rows into empty tables
    #[arg(long, env = "FIN_ASSISTANT_SEED_DEMO")]
    pub seed_demo: bool,
    /// SQLite database path
    #[arg(long, value_name = "PATH", env = "FIN_ASSISTANT_DATABASE")]
    pub database: Option<PathBuf>,
    /// Model name, e.g. gemini-2.0-flash
    #[arg(long, value_name = "MODEL", env = "FIN_ASSISTANT_MODEL")]
    pub model: Option<String>,
    /// Override the system prompt (string or @path/to/file)
    #[arg(long, value_name = "PROMPT_OR_@FILE", env = "FIN_ASSISTANT_SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,
    /// Maximum tool calls per question
    #[arg(long, value_name = "INT", env = "FIN_ASSISTANT_MAX_TOOL_CALLS")]
    pub max_tool_calls: Option<usize>,
    /// Comma-separated list of tools to enable
    #[arg(long, value_delimiter = ',', env = "FIN_ASSISTANT_TOOLS")]
    pub tools: Option<Vec<String>>,
    /// Enable/disable the message-rewrite step
    #[arg(long, value_name = "BOOL", env = "FIN_ASSISTANT_REWRITE", value_parser = clap::builder::BoolishValueParser::new())]
    pub rewrite: Option<bool>,
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", env = "FIN_ASSISTANT_LOG")]
    pub log_level: Option<String>,
}

impl CliArgs {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(get_config_path)
    }
}

/// Read a value that may be either a literal string or a @path reference to a file
pub fn read_value_or_file(raw: &str) -> Result<String, SettingsError> {
    match raw.strip_prefix('@') {
        Some(path) => fs::read_to_string(Path::new(path)).map_err(|source| SettingsError::Io {
            path: PathBuf::from(path),
            source,
        }),
        None => Ok(raw.to_string()),
    }
}

/// Apply launch flags to loaded settings. Flags win over the file.
pub fn apply_cli_overrides(args: &CliArgs, settings: &mut AppSettings) -> Result<(), SettingsError> {
    if let Some(path) = &args.database {
        settings.database.path = path.clone();
    }
    if let Some(model) = &args.model {
        settings.model.model = model.clone();
    }
    if let Some(prompt) = &args.system_prompt {
        settings.agent.system_prompt = Some(read_value_or_file(prompt)?);
    }
    if let Some(max) = args.max_tool_calls {
        settings.agent.max_tool_calls = max;
    }
    if let Some(tools) = &args.tools {
        settings.agent.enabled_tools = tools
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
    }
    if let Some(rewrite) = args.rewrite {
        settings.agent.rewrite_user_message = rewrite;
    }
    if let Some(level) = &args.log_level {
        settings.log_level = level.clone();
    }
    settings.validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from([
            "fin-assistant",
            "--tenant",
            "7",
            "--message",
            "How much did I spend?",
            "--tools",
            "execute_sql_query, account_tool",
            "--rewrite",
            "no",
            "--seed-demo",
        ]);
        assert_eq!(args.tenant, Some(7));
        assert_eq!(args.message.as_deref(), Some("How much did I spend?"));
        assert_eq!(args.rewrite, Some(false));
        assert!(args.seed_demo);
        assert!(!args.init_db);

        let mut settings = AppSettings::default();
        apply_cli_overrides(&args, &mut settings).unwrap();
        assert_eq!(settings.agent.enabled_tools, vec!["execute_sql_query", "account_tool"]);
        assert!(!settings.agent.rewrite_user_message);
    }

    #[test]
    fn test_overrides_are_validated() {
        let args = CliArgs {
            max_tool_calls: Some(0),
            ..CliArgs::default()
        };
        let mut settings = AppSettings::default();
        assert!(apply_cli_overrides(&args, &mut settings).is_err());
    }

    #[test]
    fn test_read_value_or_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        fs::write(&path, "from file").unwrap();

        assert_eq!(read_value_or_file("inline").unwrap(), "inline");
        assert_eq!(
            read_value_or_file(&format!("@{}", path.display())).unwrap(),
            "from file"
        );
        assert!(read_value_or_file("@/definitely/not/here.txt").is_err());
    }
}
