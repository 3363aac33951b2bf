//! Bulk-messages API client

use engage_common::config::ApiConfig;
use engage_common::types::{CampaignId, OrganizationId};
use engage_common::{Error, Result};
use engage_storage::models::TargetingFilters;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How requests authenticate against the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiAuth {
    None,
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `x-api-key: <key>`
    ApiKey(String),
}

impl ApiAuth {
    /// Bearer token wins over an API key when both are configured
    pub fn from_config(config: &ApiConfig) -> Self {
        match (&config.bearer_token, &config.api_key) {
            (Some(token), _) if !token.is_empty() => ApiAuth::Bearer(token.clone()),
            (_, Some(key)) if !key.is_empty() => ApiAuth::ApiKey(key.clone()),
            _ => ApiAuth::None,
        }
    }
}

/// Commands a campaign accepts from the list view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CampaignCommand {
    Start,
    Pause,
    Resume,
    Cancel,
    Delete,
}

impl CampaignCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignCommand::Start => "start",
            CampaignCommand::Pause => "pause",
            CampaignCommand::Resume => "resume",
            CampaignCommand::Cancel => "cancel",
            CampaignCommand::Delete => "delete",
        }
    }

    /// Generic message shown when the server gives none
    pub fn fallback_message(&self) -> &'static str {
        match self {
            CampaignCommand::Start => "Failed to start campaign",
            CampaignCommand::Pause => "Failed to pause campaign",
            CampaignCommand::Resume => "Failed to resume campaign",
            CampaignCommand::Cancel => "Failed to cancel campaign",
            CampaignCommand::Delete => "Failed to delete campaign",
        }
    }
}

impl std::fmt::Display for CampaignCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct EstimateResponse {
    estimate: u64,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Client for `/api/{org}/bulk-messages`
#[derive(Debug, Clone)]
pub struct BulkMessageApi {
    client: Client,
    base_url: String,
    auth: ApiAuth,
}

impl BulkMessageApi {
    /// Create a client from configuration
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Self::with_auth(
            &config.base_url,
            ApiAuth::from_config(config),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Create a client with explicit auth
    pub fn with_auth(base_url: &str, auth: ApiAuth, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn url(&self, organization_id: OrganizationId, path: &str) -> String {
        format!(
            "{}/api/{}/bulk-messages{}",
            self.base_url, organization_id, path
        )
    }

    /// Build a request with the configured auth header
    fn build_request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.client.request(method, url);
        match &self.auth {
            ApiAuth::None => request,
            ApiAuth::Bearer(token) => request.bearer_auth(token),
            ApiAuth::ApiKey(key) => request.header("x-api-key", key),
        }
    }

    /// Ask the server how many customers the filters currently match
    pub async fn estimate_recipients(
        &self,
        organization_id: OrganizationId,
        filters: &TargetingFilters,
    ) -> Result<u64> {
        let url = self.url(organization_id, "/estimate-recipients");

        let response = self
            .build_request(Method::POST, &url)
            .json(filters)
            .send()
            .await
            .map_err(|e| Error::Http(format!("Estimate request failed: {}", e)))?;

        let response = Self::check(response).await?;
        let body: EstimateResponse = response
            .json()
            .await
            .map_err(|e| Error::Http(format!("Failed to parse estimate response: {}", e)))?;

        debug!(%organization_id, estimate = body.estimate, "Recipient estimate received");
        Ok(body.estimate)
    }

    /// Issue a lifecycle command for a campaign
    pub async fn execute(
        &self,
        organization_id: OrganizationId,
        campaign_id: CampaignId,
        command: CampaignCommand,
    ) -> Result<()> {
        let (method, url) = match command {
            CampaignCommand::Delete => (
                Method::DELETE,
                self.url(organization_id, &format!("/{}", campaign_id)),
            ),
            other => (
                Method::POST,
                self.url(organization_id, &format!("/{}/{}", campaign_id, other)),
            ),
        };

        let response = self
            .build_request(method, &url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("{} request failed: {}", command, e)))?;

        Self::check(response).await?;
        debug!(%campaign_id, %command, "Campaign command accepted");
        Ok(())
    }

    /// Turn a non-success response into `Error::Api`, keeping the server's message
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_else(|e| {
            warn!("Failed to read error response body: {}", e);
            String::new()
        });
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.or(b.message))
            .filter(|m| !m.trim().is_empty());

        error!(status = status.as_u16(), body = %body, "Bulk-messages API request failed");

        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }
}
