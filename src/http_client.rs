//! HTTP client abstraction for the model backend.
//!
//! A trait over the transport so the model client can be tested without a
//! running backend.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

/// Transport used by [`crate::model_client::ModelClient`].
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body and returns the response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails, the server answers with a
    /// non-success status, or the body cannot be read.
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<String>;
}

/// Production transport backed by reqwest.
///
/// No request timeout is configured; a hung backend blocks the session.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<String> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.text().await?)
    }
}
