use std::time::Duration;

use serde_json::{json, Value};

use crate::config::Config;
use crate::errors::AppError;

/// Client for the Thumbtack partner API.
///
/// Only the staging "create test lead" call is used; production leads arrive
/// through the webhook endpoints.
#[derive(Clone)]
pub struct ThumbtackClient {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl ThumbtackClient {
    /// Creates a new `ThumbtackClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the partner API, without a trailing slash.
    /// * `credentials` - Partner `(user, password)` for Basic auth, if configured.
    pub fn new(base_url: String, credentials: Option<(String, String)>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Thumbtack client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let credentials = config
            .thumbtack_partner_credentials()
            .map(|(user, password)| (user.to_string(), password.to_string()));
        Self::new(config.thumbtack_base_url.clone(), credentials)
    }

    /// Asks the staging API to fabricate a lead for testing.
    ///
    /// # Returns
    ///
    /// * `Result<Value, AppError>` - The lead in the webhook payload shape.
    pub async fn create_test_lead(&self) -> Result<Value, AppError> {
        let (user, password) = self.credentials.as_ref().ok_or_else(|| {
            AppError::BadRequest("marketplace partner credentials not configured".to_string())
        })?;

        let url = format!("{}/v1/test/create-lead", self.base_url);
        tracing::info!("Requesting test lead from Thumbtack: {}", url);

        let response = self
            .client
            .post(&url)
            .basic_auth(user, Some(password))
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Thumbtack request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Thumbtack returned {}: {}",
                status, error_text
            )));
        }

        let lead = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Thumbtack response: {}", e))
        })?;

        tracing::info!("Received test lead from Thumbtack");
        Ok(lead)
    }
}
