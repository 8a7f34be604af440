//! Provider profiles loaded from TOML.
//!
//! ```toml
//! provider = "zai"
//! model = "glm-4.7-flash"
//! base_url = "https://api.z.ai/api/paas/v4"
//! api_key_env = "ZHIPU_API_KEY"
//! temperature = 0.7
//! max_tokens = 2000
//! ```
//!
//! The key itself never lives in the file; `api_key_env` names the
//! environment variable to read it from.

use std::fs;
use std::path::Path;

use anyhow::Context;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::client::{API_KEY_ENV, Config, DEFAULT_MODEL, DEFAULT_PROVIDER, RetryConfig};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderProfile {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub base_url: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_provider() -> String {
    DEFAULT_PROVIDER.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_key_env() -> String {
    API_KEY_ENV.to_string()
}

const fn default_max_retries() -> u32 {
    3
}

impl Default for ProviderProfile {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            temperature: None,
            max_tokens: None,
            timeout_seconds: None,
            max_retries: default_max_retries(),
        }
    }
}

impl ProviderProfile {
    /// Parses a profile from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML or out-of-range values.
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let profile: Self = toml::from_str(contents).context("Failed to parse provider profile")?;
        profile.validate()?;
        Ok(profile)
    }

    /// Reads and parses a profile file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        debug!("Loading provider profile from {}", path.display());
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read provider profile {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model.trim().is_empty() {
            anyhow::bail!("Profile model cannot be empty");
        }
        if self.api_key_env.trim().is_empty() {
            anyhow::bail!("Profile api_key_env cannot be empty");
        }
        if let Some(base_url) = &self.base_url {
            url::Url::parse(base_url)
                .with_context(|| format!("Invalid base_url '{base_url}'"))?;
        }
        if let Some(temp) = self.temperature
            && !(0.0..=2.0).contains(&temp)
        {
            anyhow::bail!("Temperature must be between 0.0 and 2.0, got {temp}");
        }
        Ok(())
    }

    /// Builds a [`Config`], reading the key from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the key variable is unset or blank.
    pub fn into_config(self) -> anyhow::Result<Config> {
        self.into_config_with(|name| std::env::var(name).ok())
    }

    /// Builds a [`Config`], resolving the key through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if `lookup` yields nothing or only whitespace.
    pub fn into_config_with<F>(self, lookup: F) -> anyhow::Result<Config>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let api_key = lookup(&self.api_key_env)
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "API key not found: environment variable {} is unset or empty",
                    self.api_key_env
                )
            })?;

        let mut config = Config::new(self.provider, self.model)
            .with_api_key(api_key)
            .with_retry_config(RetryConfig {
                max_retries: self.max_retries,
                ..RetryConfig::default()
            });
        config.base_url = self.base_url;
        config.temperature = self.temperature;
        config.max_tokens = self.max_tokens;
        config.timeout_seconds = self.timeout_seconds;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_parse_full_profile() {
        let profile = ProviderProfile::from_toml_str(
            r#"
            provider = "zai"
            model = "glm-4.7-flash"
            base_url = "https://api.z.ai/api/paas/v4/"
            api_key_env = "MY_GLM_KEY"
            temperature = 0.7
            max_tokens = 2000
            timeout_seconds = 120
            max_retries = 0
            "#,
        )
        .unwrap();

        assert_eq!(profile.api_key_env, "MY_GLM_KEY");
        assert_eq!(profile.max_tokens, Some(2000));
        assert_eq!(profile.max_retries, 0);
    }

    #[test]
    fn test_empty_profile_uses_defaults() {
        let profile = ProviderProfile::from_toml_str("").unwrap();
        assert_eq!(profile, ProviderProfile::default());
        assert_eq!(profile.api_key_env, "ZHIPU_API_KEY");
        assert_eq!(profile.model, "glm-4.7-flash");
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ProviderProfile::from_toml_str("temperature = 3.5").is_err());
        assert!(ProviderProfile::from_toml_str("model = \"\"").is_err());
        assert!(ProviderProfile::from_toml_str("base_url = \"not a url\"").is_err());
        assert!(ProviderProfile::from_toml_str("model = [").is_err());
    }

    #[test]
    fn test_into_config_resolves_key() {
        let profile = ProviderProfile {
            base_url: Some("http://localhost:9999/v4/".to_string()),
            temperature: Some(0.2),
            ..ProviderProfile::default()
        };

        let config = profile
            .into_config_with(|name| (name == "ZHIPU_API_KEY").then(|| "k-123".to_string()))
            .unwrap();

        assert_eq!(config.api_key.unwrap().expose_secret(), "k-123");
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.retry_config.max_retries, 3);
    }

    #[test]
    fn test_into_config_missing_or_blank_key() {
        let err = ProviderProfile::default()
            .into_config_with(|_| None)
            .unwrap_err();
        assert!(err.to_string().contains("ZHIPU_API_KEY"));

        assert!(
            ProviderProfile::default()
                .into_config_with(|_| Some("  ".to_string()))
                .is_err()
        );
    }
}
