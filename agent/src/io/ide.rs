//! IDE control: open files, drive a terminal, and push file edits.
//!
//! The HTTP client speaks a small JSON API (`POST open`, `POST terminal/create`,
//! `POST terminal/{id}/execute`, `POST modify`). In mock mode every call is
//! answered locally so runs work without an IDE attached.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::io::config::AgentConfig;
use crate::io::files::FileAccess;
use crate::io::process::ProcessRunner;

/// Terminal id handed out in mock mode.
pub const MOCK_TERMINAL_ID: &str = "mock-terminal-1";

const IDE_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// IDE operations the executor depends on. Failures are values, not errors.
pub trait IdeControl {
    fn open(&self, path: &str) -> bool;
    fn create_terminal(&self, name: &str) -> Option<String>;
    fn run_in_terminal(&self, terminal_id: &str, command: &str) -> bool;
    fn modify(&self, path: &str, content: &str) -> bool;
}

pub struct HttpIdeClient {
    client: reqwest::blocking::Client,
    base_url: String,
    files: FileAccess,
    runner: ProcessRunner,
    mock: bool,
}

impl HttpIdeClient {
    pub fn from_config(cfg: &AgentConfig, workdir: &Path) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(IDE_REQUEST_TIMEOUT)
            .build()
            .context("build ide http client")?;
        Ok(Self {
            client,
            base_url: cfg.ide.api_url.trim_end_matches('/').to_string(),
            files: FileAccess::new(workdir),
            runner: ProcessRunner::new(
                workdir,
                cfg.command_timeout(),
                cfg.command_output_limit_bytes,
            ),
            mock: cfg.ide.mock,
        })
    }

    fn absolute(&self, path: &str) -> PathBuf {
        self.files.resolve(path)
    }

    fn post(&self, endpoint: &str, body: Value) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(url = %url, "ide request");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .with_context(|| format!("POST {url}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("ide api error {status} for {endpoint}"));
        }
        response
            .json::<Value>()
            .with_context(|| format!("decode ide response for {endpoint}"))
    }

    fn post_ok(&self, endpoint: &str, body: Value) -> bool {
        match self.post(endpoint, body) {
            Ok(_) => true,
            Err(err) => {
                warn!(endpoint, err = %format!("{err:#}"), "ide request failed");
                false
            }
        }
    }
}

impl IdeControl for HttpIdeClient {
    fn open(&self, path: &str) -> bool {
        if self.mock {
            return self.files.exists(path);
        }
        let full = self.absolute(path);
        self.post_ok("open", json!({ "path": full.display().to_string() }))
    }

    fn create_terminal(&self, name: &str) -> Option<String> {
        if self.mock {
            return Some(MOCK_TERMINAL_ID.to_string());
        }
        match self.post("terminal/create", json!({ "name": name })) {
            Ok(body) => terminal_id(&body),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "create terminal failed");
                None
            }
        }
    }

    fn run_in_terminal(&self, terminal_id: &str, command: &str) -> bool {
        if self.mock {
            return match self.runner.run(command, None) {
                Ok(output) => output.success(),
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "mock terminal command failed");
                    false
                }
            };
        }
        self.post_ok(
            &format!("terminal/{terminal_id}/execute"),
            json!({ "command": command }),
        )
    }

    fn modify(&self, path: &str, content: &str) -> bool {
        if self.mock {
            return self.files.modify(path, content);
        }
        let full = self.absolute(path);
        self.post_ok("modify", json!({ "path": full.display().to_string(), "content": content }))
    }
}

/// Terminal id from a `terminal/create` response (string or number).
fn terminal_id(body: &Value) -> Option<String> {
    match body.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
