use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::config::helpers::{optional_env, parse_extra_headers, parse_optional_env};
use crate::error::ConfigError;
use crate::llm::catalog::{DirectProvider, Vendor};

pub const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Router configuration.
///
/// The gateway credential is mandatory: every model in the catalog is reachable
/// through the gateway, so it is the backstop for vendors without a direct key.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub gateway_api_key: SecretString,
    pub anthropic_api_key: Option<SecretString>,
    pub openai_api_key: Option<SecretString>,
    /// Initial policy mode. Can be flipped at runtime on the router.
    pub premium_mode: bool,
    /// Retries per candidate model after the first attempt.
    pub max_retries: u32,
    /// Backoff before retry `n` is `base_retry_delay * 2^n`.
    pub base_retry_delay: Duration,
    /// Vendors to keep when filtering candidate lists. Empty means no filter.
    pub preferred_providers: Vec<Vendor>,
    pub gateway_base_url: String,
    pub anthropic_base_url: String,
    pub openai_base_url: String,
    pub request_timeout: Duration,
    /// Attribution headers sent with every gateway request.
    pub gateway_extra_headers: Vec<(String, String)>,
}

impl RouterConfig {
    pub fn new(gateway_api_key: impl Into<String>) -> Self {
        Self {
            gateway_api_key: SecretString::from(gateway_api_key.into()),
            anthropic_api_key: None,
            openai_api_key: None,
            premium_mode: false,
            max_retries: DEFAULT_MAX_RETRIES,
            base_retry_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            preferred_providers: Vec::new(),
            gateway_base_url: DEFAULT_OPENROUTER_BASE_URL.to_string(),
            anthropic_base_url: DEFAULT_ANTHROPIC_BASE_URL.to_string(),
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            gateway_extra_headers: Vec::new(),
        }
    }

    pub fn with_anthropic_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_openai_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_premium_mode(mut self, enabled: bool) -> Self {
        self.premium_mode = enabled;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    pub fn with_preferred_providers(mut self, vendors: Vec<Vendor>) -> Self {
        self.preferred_providers = vendors;
        self
    }

    pub fn with_gateway_base_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_base_url = url.into();
        self
    }

    pub fn with_anthropic_base_url(mut self, url: impl Into<String>) -> Self {
        self.anthropic_base_url = url.into();
        self
    }

    pub fn with_openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.openai_base_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_gateway_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.gateway_extra_headers.push((name.into(), value.into()));
        self
    }

    /// Direct adapters that have a credential configured.
    pub fn direct_providers(&self) -> Vec<DirectProvider> {
        let mut direct = Vec::new();
        if self.anthropic_api_key.is_some() {
            direct.push(DirectProvider::Anthropic);
        }
        if self.openai_api_key.is_some() {
            direct.push(DirectProvider::OpenAi);
        }
        direct
    }

    /// Load configuration from the environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::resolve()
    }

    /// Build from process environment variables only.
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let gateway_api_key =
            optional_env("OPENROUTER_API_KEY")?.ok_or_else(|| ConfigError::MissingRequired {
                key: "OPENROUTER_API_KEY".to_string(),
                hint: "Set OPENROUTER_API_KEY to an OpenRouter API key".to_string(),
            })?;

        let mut config = Self::new(gateway_api_key);
        config.anthropic_api_key = optional_env("ANTHROPIC_API_KEY")?.map(SecretString::from);
        config.openai_api_key = optional_env("OPENAI_API_KEY")?.map(SecretString::from);
        config.premium_mode = parse_optional_env("ROUTER_PREMIUM_MODE", false)?;
        config.max_retries = parse_optional_env("ROUTER_MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
        config.base_retry_delay = Duration::from_millis(parse_optional_env(
            "ROUTER_RETRY_BASE_DELAY_MS",
            DEFAULT_RETRY_BASE_DELAY_MS,
        )?);
        config.request_timeout = Duration::from_secs(parse_optional_env(
            "ROUTER_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?);

        if let Some(raw) = optional_env("ROUTER_PREFERRED_PROVIDERS")? {
            config.preferred_providers = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<Vendor>().map_err(|e| ConfigError::InvalidValue {
                        key: "ROUTER_PREFERRED_PROVIDERS".to_string(),
                        message: e,
                    })
                })
                .collect::<Result<_, _>>()?;
        }

        if let Some(url) = optional_env("OPENROUTER_BASE_URL")? {
            config.gateway_base_url = url;
        }
        if let Some(url) = optional_env("ANTHROPIC_BASE_URL")? {
            config.anthropic_base_url = url;
        }
        if let Some(url) = optional_env("OPENAI_BASE_URL")? {
            config.openai_base_url = url;
        }
        if let Some(raw) = optional_env("OPENROUTER_EXTRA_HEADERS")? {
            config.gateway_extra_headers = parse_extra_headers("OPENROUTER_EXTRA_HEADERS", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway_api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "OPENROUTER_API_KEY".to_string(),
                hint: "The gateway credential must not be empty".to_string(),
            });
        }
        for (key, value) in [
            ("OPENROUTER_BASE_URL", &self.gateway_base_url),
            ("ANTHROPIC_BASE_URL", &self.anthropic_base_url),
            ("OPENAI_BASE_URL", &self.openai_base_url),
        ] {
            validate_base_url(key, value)?;
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "ROUTER_REQUEST_TIMEOUT_SECS".to_string(),
                message: "timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

fn validate_base_url(key: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{value}' is not a valid URL: {e}"),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("unsupported URL scheme '{other}'"),
        }),
    }
}
