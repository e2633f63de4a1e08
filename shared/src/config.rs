use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::capabilities::RetryPolicy;
use crate::gemini::{
    GeminiClient, DEFAULT_AI_TIMEOUT_MS, DEFAULT_DEEP_MODEL, DEFAULT_FAST_MODEL,
    DEFAULT_GEMINI_URL, DEFAULT_THINKING_BUDGET,
};
use crate::geocoding::{Geocoder, DEFAULT_GEOCODER_URL};

pub const DEFAULT_GEOCODER_TIMEOUT_MS: u64 = 15_000;
pub const MAX_CONFIG_TIMEOUT_MS: u64 = crate::capabilities::MAX_TIMEOUT_MS;
pub const MAX_CONFIG_RETRIES: u32 = 10;
pub const MAX_CONFIG_BACKOFF_MS: u64 = 60_000;

/// Environment variables checked for the Gemini key, in order.
pub const API_KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field}: invalid URL '{value}': {reason}")]
    InvalidUrl {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("{field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("no Gemini API key configured (set gemini.api_key, GEMINI_API_KEY or API_KEY)")]
    MissingApiKey,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub geocoder: GeocoderConfig,
    pub gemini: GeminiConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeocoderConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEOCODER_URL.to_string(),
            timeout_ms: DEFAULT_GEOCODER_TIMEOUT_MS,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub fast_model: String,
    pub deep_model: String,
    pub thinking_budget: u32,
    pub timeout_ms: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEMINI_URL.to_string(),
            api_key: None,
            fast_model: DEFAULT_FAST_MODEL.to_string(),
            deep_model: DEFAULT_DEEP_MODEL.to_string(),
            thinking_budget: DEFAULT_THINKING_BUDGET,
            timeout_ms: DEFAULT_AI_TIMEOUT_MS,
        }
    }
}

impl AppConfig {
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.gemini.api_key = Some(SecretString::new(key.into()));
        self
    }

    /// Fills the API key from the environment when one is set there. An
    /// environment key wins over the file.
    #[must_use]
    pub fn with_env_overrides<F>(self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = API_KEY_ENV_VARS
            .iter()
            .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()));
        match from_env {
            Some(key) => self.with_api_key(key),
            None => self,
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.gemini
            .api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().trim().is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_base_url("geocoder.base_url", &self.geocoder.base_url)?;
        parse_base_url("gemini.base_url", &self.gemini.base_url)?;
        check_timeout("geocoder.timeout_ms", self.geocoder.timeout_ms)?;
        check_timeout("gemini.timeout_ms", self.gemini.timeout_ms)?;

        let retry = &self.geocoder.retry;
        if retry.max_retries > MAX_CONFIG_RETRIES {
            return Err(ConfigError::InvalidValue {
                field: "geocoder.retry.max_retries",
                reason: format!("must be at most {MAX_CONFIG_RETRIES}"),
            });
        }
        if retry.initial_backoff_ms > MAX_CONFIG_BACKOFF_MS {
            return Err(ConfigError::InvalidValue {
                field: "geocoder.retry.initial_backoff_ms",
                reason: format!("must be at most {MAX_CONFIG_BACKOFF_MS}"),
            });
        }
        if retry.max_backoff_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "geocoder.retry.max_backoff_ms",
                reason: "must be positive when set".to_string(),
            });
        }

        for (field, model) in [
            ("gemini.fast_model", &self.gemini.fast_model),
            ("gemini.deep_model", &self.gemini.deep_model),
        ] {
            if model.trim().is_empty() || model.contains('/') {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("'{model}' is not a model name"),
                });
            }
        }
        if self.gemini.thinking_budget == 0 {
            return Err(ConfigError::InvalidValue {
                field: "gemini.thinking_budget",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Validates the configuration and builds the clients the app talks
    /// through.
    pub fn into_services(self) -> Result<Services, ConfigError> {
        self.validate()?;
        let geocoder = self.build_geocoder()?;
        let ai = self.into_gemini_client()?;
        Ok(Services { geocoder, ai })
    }

    fn build_geocoder(&self) -> Result<Geocoder, ConfigError> {
        Ok(Geocoder::new(
            parse_base_url("geocoder.base_url", &self.geocoder.base_url)?,
            self.geocoder.timeout_ms,
            self.geocoder.retry.clone(),
        ))
    }

    fn into_gemini_client(self) -> Result<GeminiClient, ConfigError> {
        let base_url = parse_base_url("gemini.base_url", &self.gemini.base_url)?;
        let api_key = self
            .gemini
            .api_key
            .filter(|k| !k.expose_secret().trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        Ok(GeminiClient::new(base_url, api_key)
            .with_models(self.gemini.fast_model, self.gemini.deep_model)
            .with_thinking_budget(self.gemini.thinking_budget)
            .with_timeout_ms(self.gemini.timeout_ms))
    }
}

/// The geocoder and Gemini clients built from an [`AppConfig`]. Installed
/// into the model with [`crate::Event::Configure`].
#[derive(Debug, Clone, PartialEq)]
pub struct Services {
    pub geocoder: Geocoder,
    pub ai: GeminiClient,
}

fn check_timeout(field: &'static str, timeout_ms: u64) -> Result<(), ConfigError> {
    if timeout_ms == 0 || timeout_ms > MAX_CONFIG_TIMEOUT_MS {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("must be between 1 and {MAX_CONFIG_TIMEOUT_MS}"),
        });
    }
    Ok(())
}

/// Parses a service root. The path always ends in `/` so endpoints can be
/// joined onto it.
fn parse_base_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        field,
        value: value.to_string(),
        reason,
    };
    let mut url = Url::parse(value.trim()).map_err(|e| invalid(e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("missing host".to_string()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("must not carry a query or fragment".to_string()));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
