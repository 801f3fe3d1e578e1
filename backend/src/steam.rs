use std::time::Duration;

use async_trait::async_trait;
use games_core::GameMetadata;
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("steam request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid steam app id {0:?}")]
    InvalidId(String),
}

/// Source of display fields for a game, keyed by store app id.
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    async fn lookup(&self, steam_id: &str) -> Result<Option<GameMetadata>, LookupError>;
}

/// Steam storefront `appdetails` endpoint. One attempt per call, no retry.
#[derive(Clone, Debug)]
pub struct SteamStoreClient {
    base_url: String,
    client: Client,
}

impl SteamStoreClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LookupError> {
        Ok(Self {
            base_url: base_url.into(),
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl MetadataLookup for SteamStoreClient {
    async fn lookup(&self, steam_id: &str) -> Result<Option<GameMetadata>, LookupError> {
        let steam_id = steam_id.trim();
        if steam_id.is_empty() || !steam_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(LookupError::InvalidId(steam_id.to_string()));
        }

        let url = format!(
            "{}/api/appdetails?appids={}",
            self.base_url.trim_end_matches('/'),
            steam_id
        );
        let resp = self.client.get(url).send().await?.error_for_status()?;
        let body: Value = resp.json().await?;
        Ok(parse_app_details(&body, steam_id))
    }
}

/// `{"<id>": {"success": true, "data": {"name": .., "header_image": ..}}}`
pub fn parse_app_details(body: &Value, steam_id: &str) -> Option<GameMetadata> {
    let entry = body.get(steam_id)?;
    if entry.get("success").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    let data = entry.get("data")?;
    let text = |field: &str| {
        data.get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty())
    };
    Some(GameMetadata {
        name: text("name"),
        icon: text("header_image"),
    })
}
