//! Configuration management.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default base URL for a local LM Studio style server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:1234/v1";

/// System prompt for the agent.
pub const SYSTEM_PROMPT: &str = "You are a local coding agent running on the user's machine.\n\
You have tools to read, write, and edit files, run shell commands and Python snippets, and search code.\n\
Always use the provided tools for actions. Do not only describe what to do.\n\
Be precise with file paths; all paths are relative to the working directory.\n\
Ask for clarification if a task is ambiguous.\n\
Destructive actions require user confirmation through the safety system.";

const fn default_command_timeout() -> u64 {
    30
}

const fn default_max_output_lines() -> usize {
    200
}

const fn default_max_history_messages() -> usize {
    40
}

const fn default_max_turns() -> usize {
    25
}

const fn default_max_tokens() -> u32 {
    4096
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

/// Application configuration.
///
/// Loaded from the config file, then overridden by CLI flags; every field has
/// a default so a missing file is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the OpenAI-compatible server.
    pub base_url: String,

    /// Model id; auto-detected from the server when unset.
    pub model: Option<String>,

    /// Working directory all tool paths are resolved against.
    pub cwd: Option<PathBuf>,

    /// Skip confirmation prompts for destructive tools.
    pub yolo: bool,

    /// Default timeout for run_command/run_python, in seconds.
    pub command_timeout_seconds: u64,

    /// Maximum stdout/stderr lines kept from tool output.
    pub max_output_lines: usize,

    /// Maximum messages retained in conversation history.
    pub max_history_messages: usize,

    /// Maximum tool-dispatch round-trips per user request.
    pub max_turns: usize,

    /// Maximum tokens per completion.
    pub max_tokens: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: None,
            cwd: None,
            yolo: false,
            command_timeout_seconds: default_command_timeout(),
            max_output_lines: default_max_output_lines(),
            max_history_messages: default_max_history_messages(),
            max_turns: default_max_turns(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Config {
    /// Load configuration from the default path, falling back to defaults if
    /// the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply CLI flag overrides on top of the file configuration.
    pub fn apply_cli(&mut self, cli: &crate::cli::Cli) {
        if let Some(url) = &cli.url {
            self.base_url = url.clone();
        }
        if let Some(model) = &cli.model {
            self.model = Some(model.clone());
        }
        if let Some(cwd) = &cli.cwd {
            self.cwd = Some(cwd.clone());
        }
        if cli.yolo {
            self.yolo = true;
        }
        if let Some(timeout) = cli.command_timeout {
            self.command_timeout_seconds = timeout.max(1);
        }
        if let Some(max_turns) = cli.max_turns {
            self.max_turns = max_turns.max(1);
        }
    }

    /// Working directory to sandbox tools in: configured, or the process cwd.
    ///
    /// # Errors
    ///
    /// Returns an error if no directory is configured and the process cwd is
    /// unavailable.
    pub fn working_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.cwd {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    /// Get the configuration file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Get the config directory path (`~/.config/anvil/`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
            return Ok(PathBuf::from(xdg_config_home).join("anvil"));
        }

        if cfg!(target_os = "macos") {
            if let Ok(home) = std::env::var("HOME") {
                return Ok(PathBuf::from(home).join(".config").join("anvil"));
            }
        }

        let base = directories::BaseDirs::new()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

        Ok(base.config_dir().join("anvil"))
    }
}
