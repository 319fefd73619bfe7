//! External collaborators: key distribution, online validation and profile
//! images.
//!
//! The validator only depends on the traits below. [`HttpServiceClient`]
//! implements all three against the configured HTTP endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::config::ValidatorConfig;
use crate::error::ServiceError;

const MAX_IMAGE_PREALLOCATION: u64 = 1 << 20;

/// Source of issuer public keys.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Authoritative list of currently valid key ids.
    async fn list_key_ids(&self) -> Result<Vec<u64>, ServiceError>;

    /// PEM-encoded public key for `id`.
    async fn fetch_key(&self, id: u64) -> Result<String, ServiceError>;
}

/// Successful answer from the online validation service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OnlineValidation {
    #[serde(rename = "serialNumber", default)]
    pub serial_number: Option<String>,
}

#[async_trait]
pub trait ValidationService: Send + Sync {
    /// `Err(ServiceError::Rejected)` means the credential is invalid; any
    /// other error means the service could not answer.
    async fn validate(&self, assertion_hash: &str) -> Result<OnlineValidation, ServiceError>;
}

#[async_trait]
pub trait ImageService: Send + Sync {
    /// Download the profile image for `serial_number`, reporting progress as
    /// a fraction in `0.0..=1.0`.
    async fn fetch_image(
        &self,
        serial_number: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<Vec<u8>, ServiceError>;
}

/// HTTP implementation of every collaborator.
pub struct HttpServiceClient {
    client: Client,
    sync_keys_endpoint: String,
    online_validation_endpoint: String,
    fetch_profile_image_endpoint: String,
}

impl HttpServiceClient {
    pub fn new(config: &ValidatorConfig) -> Result<Self, ServiceError> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = ClientBuilder::new()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .user_agent(format!("digital-id-validator/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ServiceError::Unavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            sync_keys_endpoint: config.sync_keys_endpoint.clone(),
            online_validation_endpoint: config.online_validation_endpoint.clone(),
            fetch_profile_image_endpoint: config.fetch_profile_image_endpoint.clone(),
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, ServiceError> {
        self.client.get(url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTP request failed");
            ServiceError::Unavailable(format!("Request to {} failed: {}", url, e))
        })
    }
}

fn unavailable_status(url: &str, status: StatusCode) -> ServiceError {
    warn!(url = %url, status = %status, "HTTP: Non-success status");
    ServiceError::Unavailable(format!("HTTP {} from {}", status, url))
}

#[async_trait]
impl KeySource for HttpServiceClient {
    #[instrument(skip(self))]
    async fn list_key_ids(&self) -> Result<Vec<u64>, ServiceError> {
        let url = &self.sync_keys_endpoint;
        let response = self.get(url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable_status(url, status));
        }

        let ids = response.json::<Vec<u64>>().await.map_err(|e| {
            ServiceError::Unavailable(format!("Failed to parse key list from {}: {}", url, e))
        })?;

        info!(count = ids.len(), "Key list received");
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn fetch_key(&self, id: u64) -> Result<String, ServiceError> {
        let url = format!("{}?{}", self.sync_keys_endpoint, id);
        let response = self.get(&url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable_status(&url, status));
        }

        response.text().await.map_err(|e| {
            ServiceError::Unavailable(format!("Failed to read key {} from {}: {}", id, url, e))
        })
    }
}

#[async_trait]
impl ValidationService for HttpServiceClient {
    #[instrument(skip(self))]
    async fn validate(&self, assertion_hash: &str) -> Result<OnlineValidation, ServiceError> {
        let url = format!("{}{}", self.online_validation_endpoint, assertion_hash);
        let response = self.get(&url).await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.json::<OnlineValidation>().await.unwrap_or_else(|e| {
                    debug!(error = %e, "Validation response carried no serial number");
                    OnlineValidation::default()
                });
                Ok(body)
            }
            StatusCode::FORBIDDEN => Err(ServiceError::Rejected),
            status => Err(unavailable_status(&url, status)),
        }
    }
}

#[async_trait]
impl ImageService for HttpServiceClient {
    #[instrument(skip(self, progress))]
    async fn fetch_image(
        &self,
        serial_number: &str,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<Vec<u8>, ServiceError> {
        let url = format!("{}{}", self.fetch_profile_image_endpoint, serial_number);
        let mut response = self.get(&url).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable_status(&url, status));
        }

        let total = response.content_length().filter(|len| *len > 0);
        // Content-Length is server-controlled; never preallocate more than this.
        let capacity = total.map_or(0, |len| len.min(MAX_IMAGE_PREALLOCATION));
        let mut image = Vec::with_capacity(capacity as usize);

        while let Some(chunk) = response.chunk().await.map_err(|e| {
            ServiceError::Unavailable(format!("Image download from {} failed: {}", url, e))
        })? {
            image.extend_from_slice(&chunk);
            if let Some(total) = total {
                progress((image.len() as f64 / total as f64).min(1.0));
            }
        }

        progress(1.0);
        debug!(bytes = image.len(), "Profile image downloaded");
        Ok(image)
    }
}
