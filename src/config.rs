//! # Configuration
//!
//! Pipeline settings loaded from environment variables (and an optional `.env`
//! file). A `Config` is built once, validated, and then shared read-only with
//! every stage through an `Arc`.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;
use crate::invoker::RetryPolicy;
use crate::state::StageKind;

// =============================================================================
// PROVIDER
// =============================================================================

/// Text-generation backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum LlmProvider {
    /// Local Ollama server
    #[default]
    Ollama,
    /// Google Gemini API
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "ollama",
            LlmProvider::Gemini => "gemini",
        }
    }

    /// Fallback model list used when `LLM_MODELS` is not set
    pub fn default_models(&self) -> Vec<String> {
        let models: &[&str] = match self {
            LlmProvider::Ollama => &["llama3.2"],
            LlmProvider::Gemini => &["gemini-2.0-flash", "gemini-1.5-flash", "gemini-flash"],
        };
        models.iter().map(|m| m.to_string()).collect()
    }

    /// Per-stage primary models used when no override is set
    pub fn default_stage_models(&self) -> BTreeMap<StageKind, String> {
        match self {
            LlmProvider::Ollama => BTreeMap::new(),
            LlmProvider::Gemini => {
                BTreeMap::from([(StageKind::Draft, "gemini-1.5-flash".to_string())])
            }
        }
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(LlmProvider::Ollama),
            "gemini" | "google" => Ok(LlmProvider::Gemini),
            other => Err(format!("unknown provider '{other}' (expected ollama or gemini)")),
        }
    }
}

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================

/// Main configuration for the research pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: LlmProvider,

    /// Ordered fallback models shared by every stage
    pub models: Vec<String>,

    /// Optional primary model per stage, tried before `models`
    pub stage_models: BTreeMap<StageKind, String>,

    /// Ollama server URL (default: http://localhost:11434)
    pub ollama_host: String,

    /// Temperature for LLM responses (0.0 = deterministic, 2.0 = most random)
    pub temperature: f64,

    /// Maximum hits requested per search query
    pub max_search_results: usize,

    /// Upper bound on searches in flight during the research stage
    pub max_concurrent_searches: usize,

    /// Citation style requested from the citation stage (e.g. APA, MLA)
    pub citation_style: String,

    /// Run the refinement pass after the first draft
    pub refine_draft: bool,

    /// Retry policy applied to every endpoint
    pub retry: RetryPolicy,

    /// Whole-run deadline; `None` disables it
    pub run_timeout: Option<Duration>,

    pub tavily_api_key: Option<String>,
    pub tavily_timeout: Duration,

    pub gemini_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_provider(LlmProvider::default())
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================

impl Config {
    /// Defaults for the given provider, including its model roster.
    pub fn for_provider(provider: LlmProvider) -> Self {
        Self {
            provider,
            models: provider.default_models(),
            stage_models: provider.default_stage_models(),
            ollama_host: "http://localhost:11434".to_string(),
            temperature: 0.7,
            max_search_results: 10,
            max_concurrent_searches: 4,
            citation_style: "APA".to_string(),
            refine_draft: true,
            retry: RetryPolicy::default(),
            run_timeout: None,
            tavily_api_key: None,
            tavily_timeout: Duration::from_secs(30),
            gemini_api_key: None,
        }
    }

    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    ///
    /// # Example
    /// ```ignore
    /// let config = Config::from_env()?;
    /// config.validate()?;
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        // Missing .env is fine
        let _ = dotenvy::dotenv();
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let provider = match var("LLM_PROVIDER") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError::InvalidValue {
                name: "LLM_PROVIDER",
                value: raw.clone(),
                reason,
            })?,
            None => LlmProvider::default(),
        };

        let mut config = Config::for_provider(provider);

        if let Some(raw) = var("LLM_MODELS") {
            config.models = split_list(&raw);
        }

        for (stage, name) in STAGE_MODEL_VARS {
            if let Some(model) = var(name) {
                config.stage_models.insert(stage, model.trim().to_string());
            }
        }

        if let Some(host) = var("OLLAMA_API_BASE_URL") {
            config.ollama_host = host;
        }
        if let Some(temperature) = parse_var(&var, "TEMPERATURE")? {
            config.temperature = temperature;
        }
        if let Some(n) = parse_var(&var, "MAX_SEARCH_RESULTS")? {
            config.max_search_results = n;
        }
        if let Some(n) = parse_var(&var, "MAX_CONCURRENT_SEARCHES")? {
            config.max_concurrent_searches = n;
        }
        if let Some(n) = parse_var(&var, "MAX_ATTEMPTS_PER_ENDPOINT")? {
            config.retry.max_attempts = n;
        }
        if let Some(ms) = parse_var(&var, "RETRY_BASE_DELAY_MS")? {
            config.retry.backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var(&var, "RETRY_MAX_DELAY_MS")? {
            config.retry.backoff_max = Duration::from_millis(ms);
        }
        if let Some(style) = var("CITATION_STYLE") {
            config.citation_style = style.trim().to_string();
        }
        if let Some(raw) = var("REFINE_DRAFT") {
            config.refine_draft = parse_bool("REFINE_DRAFT", &raw)?;
        }
        if let Some(secs) = parse_var::<u64, _>(&var, "RUN_TIMEOUT_SECS")? {
            // 0 disables the deadline
            config.run_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = parse_var(&var, "TAVILY_TIMEOUT_SECS")? {
            config.tavily_timeout = Duration::from_secs(secs);
        }
        config.tavily_api_key = var("TAVILY_API_KEY");
        config.gemini_api_key = var("GEMINI_API_KEY").or_else(|| var("GOOGLE_API_KEY"));

        debug!(provider = %config.provider, models = ?config.models, "Configuration loaded");
        Ok(config)
    }

    /// Validate the configuration before any run starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                name: "TEMPERATURE",
                value: self.temperature.to_string(),
                reason: "must be between 0.0 and 2.0".to_string(),
            });
        }

        if self.max_search_results == 0 {
            return Err(ConfigError::Invalid(
                "MAX_SEARCH_RESULTS must be at least 1".to_string(),
            ));
        }

        if self.max_concurrent_searches == 0 {
            return Err(ConfigError::Invalid(
                "MAX_CONCURRENT_SEARCHES must be at least 1".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "MAX_ATTEMPTS_PER_ENDPOINT must be at least 1".to_string(),
            ));
        }

        if self.retry.backoff_base > self.retry.backoff_max {
            return Err(ConfigError::Invalid(
                "RETRY_BASE_DELAY_MS cannot exceed RETRY_MAX_DELAY_MS".to_string(),
            ));
        }

        if self.models.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "at least one model is required (LLM_MODELS)".to_string(),
            ));
        }

        if self.citation_style.trim().is_empty() {
            return Err(ConfigError::Invalid("CITATION_STYLE cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Check the API keys the selected collaborators need.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        if self.tavily_api_key.is_none() {
            return Err(ConfigError::MissingVar("TAVILY_API_KEY"));
        }
        if self.provider == LlmProvider::Gemini && self.gemini_api_key.is_none() {
            return Err(ConfigError::MissingVar("GEMINI_API_KEY"));
        }
        Ok(())
    }

    /// Ordered endpoint list for a stage: its primary model (if any) followed
    /// by the shared fallback list, without duplicates.
    pub fn endpoints_for(&self, stage: StageKind) -> Vec<String> {
        let mut endpoints: Vec<String> = Vec::with_capacity(self.models.len() + 1);
        let candidates = self.stage_models.get(&stage).into_iter().chain(self.models.iter());

        for model in candidates {
            let model = model.trim();
            if !model.is_empty() && !endpoints.iter().any(|e| e == model) {
                endpoints.push(model.to_string());
            }
        }
        endpoints
    }
}

const STAGE_MODEL_VARS: [(StageKind, &str); 5] = [
    (StageKind::Research, "RESEARCH_MODEL"),
    (StageKind::Draft, "DRAFTING_MODEL"),
    (StageKind::FactCheck, "FACT_CHECK_MODEL"),
    (StageKind::Citation, "CITATION_MODEL"),
    (StageKind::Improve, "IMPROVE_MODEL"),
];

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_var<T, V>(var: &V, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    var(name)
        .map(|raw| {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                name,
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

// =============================================================================
// UNIT TESTS
// =============================================================================
