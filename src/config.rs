use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;

use crate::error::ConfigurationError;
use crate::llm::RetryPolicy;
use crate::models::ReportPeriod;

/// Remote model providers the pipeline can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenAi,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
        }
    }

    fn key_variable(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderKind::Gemini),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(ConfigurationError::UnknownProvider(other.to_string())),
        }
    }
}

/// Connection settings for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    /// Model used for grading (and, for Gemini, for transcription)
    pub model: String,
    /// Speech-to-text model (OpenAI only)
    pub transcription_model: String,
    pub base_url: String,
    pub temperature: f64,
    pub request_timeout: Duration,
}

impl ProviderConfig {
    pub fn gemini(api_key: String, model: String) -> Self {
        Self {
            kind: ProviderKind::Gemini,
            api_key,
            model,
            transcription_model: String::new(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            temperature: 0.1,
            request_timeout: Duration::from_secs(300),
        }
    }

    pub fn openai(api_key: String, model: String, transcription_model: String) -> Self {
        Self {
            kind: ProviderKind::OpenAi,
            api_key,
            model,
            transcription_model,
            base_url: "https://api.openai.com".to_string(),
            temperature: 0.1,
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Agent name normalization rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizerConfig {
    /// Upper-cased alias -> canonical agent name
    pub agent_aliases: BTreeMap<String, String>,
}

impl NormalizerConfig {
    /// Read `AGENT_ALIASES` only; needs no provider credentials
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let agent_aliases = match lookup("AGENT_ALIASES").filter(|v| !v.trim().is_empty()) {
            Some(raw) => parse_aliases(&raw)?,
            None => BTreeMap::new(),
        };
        Ok(Self { agent_aliases })
    }
}

/// Evidence grounding thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct GroundingConfig {
    /// Share of an evidence item that must match one passage of the content
    /// for it to count as a paraphrase: its word trigrams for word-separated
    /// text, its longest shared character run for CJK text
    pub min_paraphrase_overlap: f64,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            min_paraphrase_overlap: 0.6,
        }
    }
}

/// Run-wide configuration, built once at startup and passed down explicitly
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Providers in fallback order; never empty
    pub providers: Vec<ProviderConfig>,
    /// Maximum number of records in flight at once
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Cancel the run after this long and report what finished
    pub run_timeout: Option<Duration>,
    pub normalizer: NormalizerConfig,
    pub grounding: GroundingConfig,
    /// Interactions dated outside this period are reported FAILED without
    /// any remote call
    pub period: Option<ReportPeriod>,
}

impl PipelineConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from any key lookup (environment, `.env` contents, tests).
    ///
    /// Blank values are treated as unset. Every credential a selected
    /// provider needs is checked here, before any processing starts.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let primary = match get("PRIMARY_PROVIDER") {
            Some(name) => name.parse()?,
            None => ProviderKind::Gemini,
        };
        let fallback = get("FALLBACK_PROVIDER")
            .map(|name| name.parse::<ProviderKind>())
            .transpose()?
            .filter(|kind| *kind != primary);

        let mut providers = Vec::new();
        for kind in std::iter::once(primary).chain(fallback) {
            let api_key = get(kind.key_variable()).ok_or(ConfigurationError::MissingCredential {
                provider: kind.name(),
                variable: kind.key_variable(),
            })?;
            let provider = match kind {
                ProviderKind::Gemini => ProviderConfig::gemini(
                    api_key,
                    get("GEMINI_MODEL_NAME").unwrap_or_else(|| "gemini-2.5-flash".to_string()),
                ),
                ProviderKind::OpenAi => ProviderConfig::openai(
                    api_key,
                    get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                    get("OPENAI_TRANSCRIPTION_MODEL").unwrap_or_else(|| "whisper-1".to_string()),
                ),
            };
            providers.push(provider);
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_retries: parse_or("MAX_RETRIES", get("MAX_RETRIES"), defaults.max_retries)?,
            initial_backoff: Duration::from_millis(parse_or(
                "INITIAL_BACKOFF_MS",
                get("INITIAL_BACKOFF_MS"),
                defaults.initial_backoff.as_millis() as u64,
            )?),
            max_backoff: Duration::from_millis(parse_or(
                "MAX_BACKOFF_MS",
                get("MAX_BACKOFF_MS"),
                defaults.max_backoff.as_millis() as u64,
            )?),
            multiplier: defaults.multiplier,
        };

        let concurrency = parse_or("PIPELINE_CONCURRENCY", get("PIPELINE_CONCURRENCY"), 4usize)?;
        let run_timeout = get("RUN_TIMEOUT_SECS")
            .map(|v| parse_value::<u64>("RUN_TIMEOUT_SECS", &v))
            .transpose()?
            .map(Duration::from_secs);

        let normalizer = NormalizerConfig::from_lookup(&lookup)?;

        let period = parse_period(get("TARGET_START_DATE"), get("TARGET_END_DATE"))?;

        let config = Self {
            providers,
            concurrency,
            retry,
            run_timeout,
            normalizer,
            grounding: GroundingConfig::default(),
            period,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that CLI overrides could have broken
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.providers.is_empty() {
            return Err(ConfigurationError::InvalidValue {
                key: "PRIMARY_PROVIDER",
                value: String::new(),
                reason: "at least one provider is required".to_string(),
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigurationError::InvalidValue {
                key: "PIPELINE_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(period) = self.period {
            if period.start > period.end {
                return Err(ConfigurationError::InvalidValue {
                    key: "TARGET_START_DATE",
                    value: period.start.to_string(),
                    reason: format!("is after TARGET_END_DATE {}", period.end),
                });
            }
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigurationError>
where
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigurationError::InvalidValue {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T: FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigurationError>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => parse_value(key, &v),
        None => Ok(default),
    }
}

/// Parse `ALIAS=Canonical,ALIAS2=Canonical2`
fn parse_aliases(raw: &str) -> Result<BTreeMap<String, String>, ConfigurationError> {
    let mut aliases = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (alias, canonical) = pair
            .split_once('=')
            .map(|(a, c)| (a.trim(), c.trim()))
            .filter(|(a, c)| !a.is_empty() && !c.is_empty())
            .ok_or_else(|| ConfigurationError::InvalidValue {
                key: "AGENT_ALIASES",
                value: pair.to_string(),
                reason: "expected ALIAS=Name".to_string(),
            })?;
        aliases.insert(alias.to_uppercase(), canonical.to_string());
    }
    Ok(aliases)
}

fn parse_period(
    start: Option<String>,
    end: Option<String>,
) -> Result<Option<ReportPeriod>, ConfigurationError> {
    let parse_date = |key: &'static str, value: String| {
        NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|e| {
            ConfigurationError::InvalidValue {
                key,
                value,
                reason: e.to_string(),
            }
        })
    };

    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => Ok(Some(ReportPeriod {
            start: parse_date("TARGET_START_DATE", start)?,
            end: parse_date("TARGET_END_DATE", end)?,
        })),
        (Some(_), None) => Err(ConfigurationError::InvalidValue {
            key: "TARGET_END_DATE",
            value: String::new(),
            reason: "required when TARGET_START_DATE is set".to_string(),
        }),
        (None, Some(_)) => Err(ConfigurationError::InvalidValue {
            key: "TARGET_START_DATE",
            value: String::new(),
            reason: "required when TARGET_END_DATE is set".to_string(),
        }),
    }
}
