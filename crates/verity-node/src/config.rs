//! Environment-driven node configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::TimeDelta;
use verity_core::VerifierConfig;

use crate::oracle::ProviderKind;

/// Default batch concurrency.
const DEFAULT_BATCH_CONCURRENCY: usize = 3;

/// Default pacing between batch candidates.
const DEFAULT_BATCH_PACING: Duration = Duration::from_millis(500);

/// Reasoning oracle settings.
#[derive(Debug, Clone)]
pub struct OracleSettings {
    /// Provider protocol.
    pub provider: ProviderKind,
    /// Model identifier.
    pub model: String,
    /// API key; may be empty for local gateways.
    pub api_key: String,
    /// Base URL of the provider API.
    pub base_url: String,
}

/// Node configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Oracle settings.
    pub oracle: OracleSettings,
    /// Core verifier settings.
    pub verifier: VerifierConfig,
    /// Candidates verified at once by `batch`.
    pub batch_concurrency: usize,
}

impl NodeConfig {
    /// Reads configuration from environment variables.
    ///
    /// Unset or blank variables take their defaults; unparseable values are
    /// errors.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let provider = match get("LLM_PROVIDER") {
            Some(value) => ProviderKind::parse(&value)
                .with_context(|| format!("unsupported LLM_PROVIDER '{value}'"))?,
            None => ProviderKind::OpenRouter,
        };
        let oracle = OracleSettings {
            provider,
            model: get("LLM_MODEL").unwrap_or_else(|| provider.default_model().to_string()),
            api_key: get("LLM_API_KEY").unwrap_or_default(),
            base_url: get("LLM_BASE_URL").unwrap_or_else(|| provider.default_base_url().to_string()),
        };

        let mut verifier = VerifierConfig::default().with_pacing(DEFAULT_BATCH_PACING);
        if let Some(value) = get("VERITY_CONCURRENCY") {
            verifier.concurrency = parse(&value, "VERITY_CONCURRENCY")?;
        }
        if let Some(value) = get("VERITY_SOURCE_TIMEOUT_SECS") {
            verifier.source_timeout =
                Duration::from_secs(parse(&value, "VERITY_SOURCE_TIMEOUT_SECS")?);
        }
        if let Some(value) = get("VERITY_ARCHIVE_TIMEOUT_SECS") {
            verifier.archive_timeout =
                Duration::from_secs(parse(&value, "VERITY_ARCHIVE_TIMEOUT_SECS")?);
        }
        if let Some(value) = get("VERITY_VERDICT_RETRIES") {
            verifier.verdict_retries = parse(&value, "VERITY_VERDICT_RETRIES")?;
        }
        if let Some(value) = get("VERITY_MATERIAL_GAP_DAYS") {
            verifier.material_gap = TimeDelta::days(parse(&value, "VERITY_MATERIAL_GAP_DAYS")?);
        }
        verifier.validate().context("invalid verifier configuration")?;

        let batch_concurrency = match get("VERITY_BATCH_CONCURRENCY") {
            Some(value) => parse(&value, "VERITY_BATCH_CONCURRENCY")?,
            None => DEFAULT_BATCH_CONCURRENCY,
        };
        anyhow::ensure!(
            batch_concurrency >= 1,
            "VERITY_BATCH_CONCURRENCY must be >= 1"
        );

        Ok(Self {
            oracle,
            verifier,
            batch_concurrency,
        })
    }
}

fn parse<T>(value: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("failed to parse {key}='{value}'"))
}
