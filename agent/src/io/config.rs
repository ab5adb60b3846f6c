//! Agent configuration stored under `.agent/config.toml`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default config location relative to the workspace root.
pub const DEFAULT_CONFIG_PATH: &str = ".agent/config.toml";

/// Agent configuration (TOML).
///
/// Built once at process start and passed by reference to every component.
/// Missing fields default to the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Persisted state document, relative to the workspace root.
    pub state_file: PathBuf,

    /// Maximum number of recovery rounds for one step sequence. `0` disables recovery.
    pub max_recovery_depth: u32,

    /// Wall-clock limit for one synchronous command, in seconds.
    pub command_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub command_output_limit_bytes: usize,

    /// Interpreter used to create environments and when no venv is active.
    pub python: String,

    pub oracle: OracleConfig,

    pub ide: IdeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub temperature: f32,
    /// Anthropic Messages API backend, used for `high` complexity.
    pub high: BackendConfig,
    /// OpenAI-compatible backend, also the fallback for every other tier.
    pub mid: BackendConfig,
    /// OpenAI-compatible local inference server.
    pub local: BackendConfig,
}

/// One oracle backend. `endpoint` and `model` are required when a table is given.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key, if the backend needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    4096
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdeConfig {
    /// Base URL of the IDE control API.
    pub api_url: String,
    /// Answer IDE calls locally instead of over HTTP.
    pub mock: bool,
    /// Name of the terminal created for `run_terminal` steps.
    pub terminal_name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("state.json"),
            max_recovery_depth: 3,
            command_timeout_secs: 30 * 60,
            command_output_limit_bytes: 100_000,
            python: default_python(),
            oracle: OracleConfig::default(),
            ide: IdeConfig::default(),
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            temperature: 0.2,
            high: BackendConfig {
                endpoint: "https://api.anthropic.com/v1/messages".to_string(),
                model: "claude-3-5-sonnet-latest".to_string(),
                api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
                max_tokens: default_max_tokens(),
            },
            mid: BackendConfig {
                endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-4".to_string(),
                api_key_env: Some("OPENAI_API_KEY".to_string()),
                max_tokens: default_max_tokens(),
            },
            local: BackendConfig {
                endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
                model: "llama3".to_string(),
                api_key_env: None,
                max_tokens: default_max_tokens(),
            },
        }
    }
}

impl Default for IdeConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8765".to_string(),
            mock: false,
            terminal_name: "Agent Terminal".to_string(),
        }
    }
}

fn default_python() -> String {
    if cfg!(windows) {
        "python".to_string()
    } else {
        "python3".to_string()
    }
}

/// Configuration that cannot be used. The CLI maps it to a distinct exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidConfigError {
    pub reason: String,
}

impl fmt::Display for InvalidConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid config: {}", self.reason)
    }
}

impl std::error::Error for InvalidConfigError {}

fn invalid(reason: &str) -> anyhow::Error {
    InvalidConfigError {
        reason: reason.to_string(),
    }
    .into()
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.state_file.as_os_str().is_empty() {
            return Err(invalid("state_file must be non-empty"));
        }
        if self.command_timeout_secs == 0 {
            return Err(invalid("command_timeout_secs must be > 0"));
        }
        if self.command_output_limit_bytes == 0 {
            return Err(invalid("command_output_limit_bytes must be > 0"));
        }
        if self.python.trim().is_empty() {
            return Err(invalid("python must be non-empty"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(invalid("oracle.timeout_secs must be > 0"));
        }
        for (name, backend) in [
            ("high", &self.oracle.high),
            ("mid", &self.oracle.mid),
            ("local", &self.oracle.local),
        ] {
            if backend.endpoint.trim().is_empty() || backend.model.trim().is_empty() {
                return Err(invalid(&format!(
                    "oracle.{name} needs a non-empty endpoint and model"
                )));
            }
        }
        if self.ide.terminal_name.trim().is_empty() {
            return Err(invalid("ide.terminal_name must be non-empty"));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Apply environment overrides (`CURSOR_API_URL`, `USE_MOCK_RESPONSES`).
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        if let Some(url) = lookup("CURSOR_API_URL").filter(|v| !v.trim().is_empty()) {
            debug!(url = %url, "ide api url from environment");
            self.ide.api_url = url;
        }
        if let Some(flag) = lookup("USE_MOCK_RESPONSES") {
            self.ide.mock = flag.trim().eq_ignore_ascii_case("true");
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `AgentConfig::default()`.
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = AgentConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: AgentConfig = toml::from_str(&contents).map_err(|err| InvalidConfigError {
        reason: format!("parse {}: {err}", path.display()),
    })?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &AgentConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
