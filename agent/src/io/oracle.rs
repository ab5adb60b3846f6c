//! Instruction oracle: routes prompts to language-model backends.
//!
//! `ask` never fails. Backend errors fall back to the mid tier, and when that
//! fails too the caller receives [`SENTINEL_RESPONSE`], which parses as an
//! empty step list.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::routing::{Tier, fallback_tier, select_tier};
use crate::core::types::Complexity;
use crate::io::config::{AgentConfig, BackendConfig};

/// Returned when every backend in the chain failed.
pub const SENTINEL_RESPONSE: &str = r#"{"steps": [], "error": "all oracle backends failed"}"#;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One prompt pair plus the routing hints for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub complexity: Complexity,
    pub prefer_local: bool,
}

impl OracleRequest {
    pub fn new(
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        complexity: Complexity,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            complexity,
            prefer_local: false,
        }
    }

    pub fn prefer_local(mut self, prefer_local: bool) -> Self {
        self.prefer_local = prefer_local;
        self
    }
}

/// Anything that answers prompts with raw text.
pub trait Oracle {
    fn ask(&self, request: &OracleRequest) -> String;
}

/// A single model endpoint.
pub trait Backend {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Production oracle over the three configured backends.
pub struct OracleClient {
    /// Present only when the high tier has a credential.
    high: Option<Box<dyn Backend>>,
    mid: Box<dyn Backend>,
    local: Box<dyn Backend>,
}

impl OracleClient {
    /// Build HTTP backends from config. API keys are read from the
    /// environment here, once.
    pub fn from_config(cfg: &AgentConfig) -> Result<Self> {
        let timeout = Duration::from_secs(cfg.oracle.timeout_secs);
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build oracle http client")?;
        let temperature = cfg.oracle.temperature;

        let high = match read_api_key(&cfg.oracle.high) {
            Some(api_key) => Some(Box::new(AnthropicBackend {
                client: client.clone(),
                config: cfg.oracle.high.clone(),
                api_key,
                temperature,
            }) as Box<dyn Backend>),
            None => {
                debug!("high tier has no credential, disabled");
                None
            }
        };
        let mid = Box::new(ChatCompletionsBackend {
            client: client.clone(),
            api_key: read_api_key(&cfg.oracle.mid),
            config: cfg.oracle.mid.clone(),
            temperature,
        });
        let local = Box::new(ChatCompletionsBackend {
            client,
            api_key: read_api_key(&cfg.oracle.local),
            config: cfg.oracle.local.clone(),
            temperature,
        });
        Ok(Self::with_backends(high, mid, local))
    }

    pub fn with_backends(
        high: Option<Box<dyn Backend>>,
        mid: Box<dyn Backend>,
        local: Box<dyn Backend>,
    ) -> Self {
        Self { high, mid, local }
    }

    fn backend(&self, tier: Tier) -> Option<&dyn Backend> {
        match tier {
            Tier::High => self.high.as_deref(),
            Tier::Mid => Some(self.mid.as_ref()),
            Tier::Local => Some(self.local.as_ref()),
        }
    }
}

impl Oracle for OracleClient {
    #[instrument(skip_all, fields(complexity = %request.complexity, prefer_local = request.prefer_local))]
    fn ask(&self, request: &OracleRequest) -> String {
        let mut tier = select_tier(
            request.complexity,
            request.prefer_local,
            self.high.is_some(),
        );
        loop {
            info!(tier = tier.as_str(), "querying oracle backend");
            let outcome = match self.backend(tier) {
                Some(backend) => backend.complete(&request.system_prompt, &request.user_prompt),
                None => Err(anyhow!("{} tier is not configured", tier.as_str())),
            };
            match outcome {
                Ok(text) => {
                    debug!(tier = tier.as_str(), chars = text.len(), "oracle answered");
                    return text;
                }
                Err(err) => match fallback_tier(tier) {
                    Some(next) => {
                        warn!(
                            tier = tier.as_str(),
                            fallback = next.as_str(),
                            err = %format!("{err:#}"),
                            "oracle backend failed, falling back"
                        );
                        tier = next;
                    }
                    None => {
                        warn!(tier = tier.as_str(), err = %format!("{err:#}"), "all oracle backends failed");
                        return SENTINEL_RESPONSE.to_string();
                    }
                },
            }
        }
    }
}

fn read_api_key(backend: &BackendConfig) -> Option<String> {
    let var = backend.api_key_env.as_deref()?;
    std::env::var(var).ok().filter(|key| !key.trim().is_empty())
}

/// Anthropic Messages API.
struct AnthropicBackend {
    client: reqwest::blocking::Client,
    config: BackendConfig,
    api_key: String,
    temperature: f32,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

impl Backend for AnthropicBackend {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.temperature,
            "system": system_prompt,
            "messages": [{"role": "user", "content": user_prompt}],
        });
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .with_context(|| format!("send request to {}", self.config.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(anyhow!("anthropic api error {status}: {text}"));
        }
        let parsed: MessagesResponse = response.json().context("decode anthropic response")?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(anyhow!("anthropic response carried no text"));
        }
        Ok(text)
    }
}

/// OpenAI-compatible chat completions (remote or local server).
struct ChatCompletionsBackend {
    client: reqwest::blocking::Client,
    config: BackendConfig,
    api_key: Option<String>,
    temperature: f32,
}

impl Backend for ChatCompletionsBackend {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });
        let mut builder = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .with_context(|| format!("send request to {}", self.config.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(anyhow!("chat completions error {status}: {text}"));
        }
        let parsed: Value = response.json().context("decode chat completions response")?;
        chat_message_content(&parsed)
    }
}

fn chat_message_content(response: &Value) -> Result<String> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("chat completions response missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Backend that answers with a fixed result and logs its name.
    struct Fake {
        name: &'static str,
        reply: Option<&'static str>,
        calls: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Backend for Fake {
        fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            self.calls.borrow_mut().push(self.name);
            self.reply
                .map(str::to_string)
                .ok_or_else(|| anyhow!("{} is down", self.name))
        }
    }

    fn client(
        high: Option<Option<&'static str>>,
        mid: Option<&'static str>,
        local: Option<&'static str>,
    ) -> (OracleClient, Rc<RefCell<Vec<&'static str>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let fake = |name, reply| -> Box<dyn Backend> {
            Box::new(Fake {
                name,
                reply,
                calls: Rc::clone(&calls),
            })
        };
        let client = OracleClient::with_backends(
            high.map(|reply| fake("high", reply)),
            fake("mid", mid),
            fake("local", local),
        );
        (client, calls)
    }

    fn request(complexity: Complexity) -> OracleRequest {
        OracleRequest::new("system", "user", complexity)
    }

    #[test]
    fn high_complexity_goes_to_high_tier() {
        let (oracle, calls) = client(Some(Some("H")), Some("M"), Some("L"));
        assert_eq!(oracle.ask(&request(Complexity::High)), "H");
        assert_eq!(*calls.borrow(), vec!["high"]);
    }

    #[test]
    fn high_complexity_without_credential_uses_mid_tier() {
        let (oracle, calls) = client(None, Some("M"), Some("L"));
        assert_eq!(oracle.ask(&request(Complexity::High)), "M");
        assert_eq!(*calls.borrow(), vec!["mid"]);
    }

    #[test]
    fn high_tier_failure_falls_back_to_mid() {
        let (oracle, calls) = client(Some(None), Some("M"), Some("L"));
        assert_eq!(oracle.ask(&request(Complexity::High)), "M");
        assert_eq!(*calls.borrow(), vec!["high", "mid"]);
    }

    #[test]
    fn local_preference_falls_back_to_mid() {
        let (oracle, calls) = client(None, Some("M"), None);
        let answer = oracle.ask(&request(Complexity::Medium).prefer_local(true));
        assert_eq!(answer, "M");
        assert_eq!(*calls.borrow(), vec!["local", "mid"]);
    }

    #[test]
    fn total_failure_returns_sentinel() {
        let (oracle, calls) = client(None, None, None);
        assert_eq!(oracle.ask(&request(Complexity::Low)), SENTINEL_RESPONSE);
        assert_eq!(*calls.borrow(), vec!["local", "mid"]);
    }

    #[test]
    fn mid_tier_failure_does_not_retry_itself() {
        let (oracle, calls) = client(None, None, Some("L"));
        assert_eq!(oracle.ask(&request(Complexity::Medium)), SENTINEL_RESPONSE);
        assert_eq!(*calls.borrow(), vec!["mid"]);
    }

    #[test]
    fn sentinel_parses_as_empty_steps() {
        assert!(crate::core::parser::parse_steps(SENTINEL_RESPONSE).is_empty());
    }

    #[test]
    fn chat_content_is_extracted() {
        let response = json!({"choices": [{"message": {"role": "assistant", "content": "{}"}}]});
        assert_eq!(chat_message_content(&response).expect("content"), "{}");
        assert!(chat_message_content(&json!({"choices": []})).is_err());
    }
}
