use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::session::TokenPair;
use super::store::TokenStore;
use crate::api::ApiError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Exchanges the stored refresh token for a new token pair.
///
/// Refreshes are serialized: concurrent callers that all saw the same
/// rejected access token share the result of a single exchange.
pub struct RefreshClient {
    http: Client,
    url: String,
    store: Arc<TokenStore>,
    in_flight: Mutex<()>,
}

impl RefreshClient {
    pub fn new(http: Client, url: String, store: Arc<TokenStore>) -> Self {
        Self {
            http,
            url,
            store,
            in_flight: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Exchange the refresh token now.
    ///
    /// Returns the new access token, or `None` after clearing every stored
    /// token when the exchange fails for any reason.
    pub async fn refresh(&self) -> Option<String> {
        let _guard = self.in_flight.lock().await;
        self.exchange_and_store().await
    }

    /// Refresh after the backend rejected `rejected_token`.
    ///
    /// If another caller already replaced that token while this one waited,
    /// the replacement is returned without another exchange.
    pub async fn refresh_after(&self, rejected_token: &str) -> Option<String> {
        let _guard = self.in_flight.lock().await;

        if let Some(current) = self.store.access_token() {
            if current != rejected_token {
                debug!("Access token already refreshed by a concurrent request");
                return Some(current);
            }
        }

        self.exchange_and_store().await
    }

    async fn exchange_and_store(&self) -> Option<String> {
        let Some(refresh_token) = self.store.refresh_token() else {
            debug!("No refresh token stored, skipping refresh");
            return None;
        };

        let pair = match self.exchange(&refresh_token).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.clear();
                return None;
            }
        };

        if let Err(e) = self.store.store_pair(&pair.access_token, &pair.refresh_token) {
            warn!(error = %e, "Failed to store refreshed tokens, clearing session");
            self.clear();
            return None;
        }

        info!("Access token refreshed");
        Some(pair.access_token)
    }

    async fn exchange(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        debug!(url = %self.url, "Requesting token refresh");

        let response = self
            .http
            .post(&self.url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let response = ApiError::check_response(response).await?;

        let body = response.text().await.map_err(ApiError::from_transport)?;
        let pair: TokenPair = serde_json::from_str(&body)
            .map_err(|e| ApiError::InvalidResponse(format!("refresh response: {}", e)))?;

        if pair.access_token.is_empty() || pair.refresh_token.is_empty() {
            return Err(ApiError::InvalidResponse(
                "refresh response contained an empty token".to_string(),
            ));
        }
        Ok(pair)
    }

    fn clear(&self) {
        if let Err(e) = self.store.clear_tokens() {
            warn!(error = %e, "Failed to clear tokens after refresh failure");
        }
    }
}
