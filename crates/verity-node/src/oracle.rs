//! HTTP reasoning oracle.
//!
//! Speaks two wire protocols:
//!
//! - OpenAI-compatible `POST {base}/chat/completions` (`openai`, `openrouter`)
//! - Anthropic `POST {base}/v1/messages` (`anthropic`)
//!
//! Every request runs at temperature 0. Only the provider envelope is
//! unwrapped here; schema validation belongs to the core parser.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::debug;
use verity_core::{BoxFuture, Oracle, OracleError};

use crate::config::OracleSettings;

/// Overall deadline for one oracle call.
const ORACLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Response budget for Anthropic, which requires one.
const ANTHROPIC_MAX_TOKENS: u32 = 1_024;

/// Longest error body carried into an [`OracleError`].
const MAX_ERROR_BODY: usize = 500;

/// Supported provider protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// OpenRouter (OpenAI-compatible).
    OpenRouter,
    /// OpenAI.
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
}

impl ProviderKind {
    /// Parses a provider name (case-insensitive).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openrouter" => Some(Self::OpenRouter),
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            _ => None,
        }
    }

    /// Base URL used when `LLM_BASE_URL` is unset.
    #[must_use]
    pub const fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com",
        }
    }

    /// Model used when `LLM_MODEL` is unset.
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenRouter => "openai/gpt-4o-mini",
            Self::OpenAi => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-haiku-latest",
        }
    }
}

/// [`Oracle`] backed by a hosted chat model.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    client: reqwest::Client,
    settings: OracleSettings,
}

impl HttpOracle {
    /// Creates an oracle client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(settings: OracleSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(ORACLE_TIMEOUT)
            .build()
            .context("failed to build oracle HTTP client")?;
        Ok(Self { client, settings })
    }

    fn endpoint(&self) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        match self.settings.provider {
            ProviderKind::Anthropic => format!("{base}/v1/messages"),
            ProviderKind::OpenRouter | ProviderKind::OpenAi => format!("{base}/chat/completions"),
        }
    }

    fn request_body(&self, prompt: &str) -> Value {
        let messages = json!([{ "role": "user", "content": prompt }]);
        match self.settings.provider {
            ProviderKind::Anthropic => json!({
                "model": self.settings.model,
                "max_tokens": ANTHROPIC_MAX_TOKENS,
                "temperature": 0,
                "messages": messages,
            }),
            ProviderKind::OpenRouter | ProviderKind::OpenAi => json!({
                "model": self.settings.model,
                "temperature": 0,
                "messages": messages,
            }),
        }
    }

    async fn send(&self, prompt: &str) -> Result<String, OracleError> {
        let mut request = self
            .client
            .post(self.endpoint())
            .json(&self.request_body(prompt));
        request = match self.settings.provider {
            ProviderKind::Anthropic => request
                .header("x-api-key", &self.settings.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            ProviderKind::OpenAi => request.bearer_auth(&self.settings.api_key),
            ProviderKind::OpenRouter => request
                .bearer_auth(&self.settings.api_key)
                .header("HTTP-Referer", "https://github.com/verity-rs/verity")
                .header("X-Title", "verity"),
        };

        debug!(model = %self.settings.model, "sending oracle request");
        let response = request
            .send()
            .await
            .map_err(|err| OracleError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Rejected {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let envelope: Value = response
            .json()
            .await
            .map_err(|err| OracleError::Transport(format!("invalid response envelope: {err}")))?;
        extract_text(self.settings.provider, &envelope)
    }
}

impl Oracle for HttpOracle {
    fn complete<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String, OracleError>> {
        Box::pin(self.send(prompt))
    }
}

/// Pulls the assistant text out of a provider response envelope.
fn extract_text(provider: ProviderKind, envelope: &Value) -> Result<String, OracleError> {
    let text = match provider {
        ProviderKind::Anthropic => envelope
            .get("content")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<String>()
            }),
        ProviderKind::OpenRouter | ProviderKind::OpenAi => envelope
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string),
    };
    text.filter(|text| !text.trim().is_empty())
        .ok_or(OracleError::EmptyResponse)
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
