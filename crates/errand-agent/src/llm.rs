//! Chat-completion backends and the ordered fallback gateway.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Default OpenAI-compatible endpoint.
pub const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

/// Backend settings. The credential only comes from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,

    /// Models tried in order when choosing the next browser action
    pub models: Vec<String>,

    /// Models tried in order when drafting a plan
    pub planner_models: Vec<String>,

    /// Per-backend deadline for decisions
    pub timeout_ms: u64,

    /// Per-backend deadline for planning
    pub planner_timeout_ms: u64,

    /// Sent as `HTTP-Referer`; OpenRouter uses it for attribution
    pub referer: String,

    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let decision_models: Vec<String> = [
            "google/gemini-2.0-flash-001",
            "mistralai/mistral-7b-instruct",
            "nousresearch/hermes-3-llama-3.1-405b",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let planner_models = [
            "google/gemini-2.0-flash-001",
            "nousresearch/hermes-3-llama-3.1-405b",
            "mistralai/mistral-7b-instruct",
            "nvidia/llama-3.1-nemotron-70b-instruct:free",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            api_base: OPENROUTER_API_BASE.into(),
            models: decision_models,
            planner_models,
            timeout_ms: 20_000,
            planner_timeout_ms: 10_000,
            referer: "http://localhost:3000".into(),
            api_key: None,
        }
    }
}

impl LlmConfig {
    /// Pick up `OPENROUTER_API_KEY` and an optional `ERRAND_API_BASE` override.
    pub fn with_env(mut self) -> Self {
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            if !key.trim().is_empty() {
                self.api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(base) = std::env::var("ERRAND_API_BASE") {
            if !base.trim().is_empty() {
                self.api_base = base.trim().trim_end_matches('/').to_string();
            }
        }
        self
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// A model that turns messages into a reply.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Identifier used in logs and failure records.
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

// =============================================================================
// OpenRouter
// =============================================================================

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// One model behind an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenRouterBackend {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    referer: String,
}

impl OpenRouterBackend {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
            referer: String::new(),
        }
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = referer.into();
        self
    }
}

#[async_trait]
impl ChatBackend for OpenRouterBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let mut request = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "messages": messages }));
        if !self.referer.is_empty() {
            request = request.header("HTTP-Referer", &self.referer);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Backend {
                backend: self.model.clone(),
                message: format!("HTTP {}: {}", status, truncate(&body, 200)),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::Backend {
                backend: self.model.clone(),
                message: "reply had no content".into(),
            })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// A backend that did not produce a usable reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub backend: String,
    pub reason: String,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.reason)
    }
}

/// An accepted reply and the failures that preceded it.
#[derive(Debug, Clone)]
pub struct Completion<T> {
    pub value: T,
    pub backend: String,
    pub failures: Vec<BackendFailure>,
}

/// Ordered backends tried one after another until a reply is accepted.
#[derive(Clone)]
pub struct Gateway {
    backends: Vec<Arc<dyn ChatBackend>>,
    timeout: Duration,
}

impl Gateway {
    pub fn new(backends: Vec<Arc<dyn ChatBackend>>, timeout: Duration) -> Self {
        Self { backends, timeout }
    }

    /// One OpenRouter backend per model, or `None` without a credential.
    pub fn openrouter(config: &LlmConfig, models: &[String], timeout_ms: u64) -> Option<Self> {
        let api_key = config.api_key.as_ref()?;
        let http = reqwest::Client::new();
        let backends = models
            .iter()
            .map(|model| {
                Arc::new(
                    OpenRouterBackend::new(http.clone(), &config.api_base, api_key, model)
                        .with_referer(&config.referer),
                ) as Arc<dyn ChatBackend>
            })
            .collect();
        Some(Self::new(backends, Duration::from_millis(timeout_ms)))
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// First reply any backend produces.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion<String>> {
        self.complete_with(messages, |text| Ok(text.to_string())).await
    }

    /// First reply that `accept` turns into a value. A rejected reply counts
    /// as that backend failing and the next one is tried.
    pub async fn complete_with<T, F>(&self, messages: &[ChatMessage], accept: F) -> Result<Completion<T>>
    where
        F: Fn(&str) -> std::result::Result<T, String> + Send + Sync,
        T: Send,
    {
        let mut failures = Vec::new();
        for backend in &self.backends {
            let name = backend.name().to_string();
            debug!("asking {}", name);
            let reason = match tokio::time::timeout(self.timeout, backend.complete(messages)).await {
                Ok(Ok(text)) => match accept(&text) {
                    Ok(value) => {
                        return Ok(Completion {
                            value,
                            backend: name,
                            failures,
                        })
                    }
                    Err(reason) => format!("unusable reply: {}", reason),
                },
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {}ms", self.timeout.as_millis()),
            };
            warn!("backend {} failed: {}", name, reason);
            failures.push(BackendFailure {
                backend: name,
                reason,
            });
        }
        Err(Error::Exhausted {
            tried: failures.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedBackend;

    fn gateway(backends: Vec<Arc<ScriptedBackend>>) -> Gateway {
        Gateway::new(
            backends.into_iter().map(|b| b as Arc<dyn ChatBackend>).collect(),
            Duration::from_secs(20),
        )
    }

    #[tokio::test]
    async fn test_first_backend_wins() {
        let a = ScriptedBackend::always("a", "hello");
        let b = ScriptedBackend::always("b", "unused");
        let reply = gateway(vec![a.clone(), b.clone()])
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap();
        assert_eq!(reply.value, "hello");
        assert_eq!(reply.backend, "a");
        assert!(reply.failures.is_empty());
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_past_errors() {
        let a = ScriptedBackend::failing("a");
        let b = ScriptedBackend::always("b", "ok");
        let reply = gateway(vec![a, b]).complete(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(reply.backend, "b");
        assert_eq!(reply.failures.len(), 1);
        assert_eq!(reply.failures[0].backend, "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_backend_times_out() {
        let a = ScriptedBackend::hanging("slow");
        let b = ScriptedBackend::always("b", "ok");
        let reply = gateway(vec![a, b]).complete(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(reply.backend, "b");
        assert!(reply.failures[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_rejected_reply_tries_next() {
        let a = ScriptedBackend::always("a", "not a number");
        let b = ScriptedBackend::always("b", "42");
        let reply = gateway(vec![a, b])
            .complete_with(&[ChatMessage::user("n?")], |t| t.trim().parse::<u32>().map_err(|e| e.to_string()))
            .await
            .unwrap();
        assert_eq!(reply.value, 42);
        assert_eq!(reply.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_all_failing_is_exhausted() {
        let err = gateway(vec![ScriptedBackend::failing("a"), ScriptedBackend::failing("b")])
            .complete(&[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Exhausted { tried: 2 }));
    }

    #[test]
    fn test_no_credential_no_gateway() {
        let config = LlmConfig::default();
        assert!(Gateway::openrouter(&config, &config.models, 1000).is_none());
    }

    #[test]
    fn test_default_models() {
        let config = LlmConfig::default();
        assert_eq!(config.models.len(), 3);
        assert_eq!(config.planner_models.len(), 4);
        assert!(config.planner_models[3].ends_with(":free"));
    }
}
