//! Configuration for the validator and its HTTP collaborators.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

fn default_timeout_secs() -> u64 {
    30
}

/// Validator configuration.
///
/// Serialized with the kebab-case keys used by deployed configuration
/// files, e.g. `server-error-message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ValidatorConfig {
    /// Shown when the validation service cannot answer.
    pub server_error_message: String,
    /// Shown when the validation service rejects the credential.
    pub invalid_id_error_message: String,
    /// Prefix; the assertion hash is appended.
    pub online_validation_endpoint: String,
    /// Prefix; the serial number is appended.
    pub fetch_profile_image_endpoint: String,
    /// Returns the key id list; `?{id}` returns a single PEM.
    pub sync_keys_endpoint: String,
    /// Per-request timeout for every HTTP call.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ValidatorConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: ValidatorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let messages = [
            ("server-error-message", &self.server_error_message),
            ("invalid-id-error-message", &self.invalid_id_error_message),
        ];
        for (field, value) in messages {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field));
            }
        }

        let endpoints = [
            ("online-validation-endpoint", &self.online_validation_endpoint),
            ("fetch-profile-image-endpoint", &self.fetch_profile_image_endpoint),
            ("sync-keys-endpoint", &self.sync_keys_endpoint),
        ];
        for (field, value) in endpoints {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField(field));
            }
            let url = url::Url::parse(value).map_err(|e| ConfigError::InvalidEndpoint {
                field,
                reason: e.to_string(),
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidEndpoint {
                    field,
                    reason: format!("unsupported scheme '{}'", url.scheme()),
                });
            }
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::MissingField("request-timeout-secs"));
        }

        Ok(())
    }
}
