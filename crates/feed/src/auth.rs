//! Feed authorization and the daily-credential gate.
//!
//! The access token must be refreshed every trading day through the admin
//! panel; the pipeline refuses to open a session while the refresh date in
//! the credentials file is not today's IST date. This is a deliberate safety
//! gate, not an error state.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;

use crate::error::FeedError;

/// Placeholder value the admin panel writes before the first daily refresh.
const TOKEN_PLACEHOLDER: &str = "update-daily-in-admin-panel";

/// Contents of the credentials JSON document.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    #[serde(rename = "ACCESS_TOKEN", default)]
    pub access_token: String,
    #[serde(rename = "TOKEN_UPDATE_DATE", default)]
    pub token_update_date: String,
}

impl Credentials {
    /// Reads the credentials file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or not valid JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials file {}", path.display()))?;
        serde_json::from_str(&raw).context("Failed to parse credentials file")
    }

    /// Whether the token was refreshed for the given trading date.
    #[must_use]
    pub fn is_fresh(&self, today: NaiveDate) -> bool {
        !self.access_token.is_empty()
            && self.access_token != TOKEN_PLACEHOLDER
            && self.token_update_date == today.format("%Y-%m-%d").to_string()
    }
}

#[derive(Debug, Deserialize)]
struct AuthorizeResponse {
    data: AuthorizeData,
}

#[derive(Debug, Deserialize)]
struct AuthorizeData {
    authorized_redirect_uri: String,
}

/// Requests a session-scoped streaming endpoint from the feed service.
///
/// # Errors
///
/// Returns [`FeedError::Auth`] if the request fails or the response does not
/// carry an endpoint.
pub async fn authorize_feed(
    client: &reqwest::Client,
    authorize_url: &str,
    access_token: &str,
) -> Result<String, FeedError> {
    let response = client
        .get(authorize_url)
        .header("Accept", "application/json")
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| FeedError::Auth(e.to_string()))?;

    if !response.status().is_success() {
        return Err(FeedError::Auth(format!(
            "authorize endpoint returned {}",
            response.status()
        )));
    }

    let body: AuthorizeResponse = response
        .json()
        .await
        .map_err(|e| FeedError::Auth(format!("malformed authorize response: {e}")))?;

    tracing::info!("Feed authorization succeeded");
    Ok(body.data.authorized_redirect_uri)
}
