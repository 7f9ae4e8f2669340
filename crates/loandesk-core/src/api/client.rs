//! API client for communicating with the loan platform backend.
//!
//! Every call that needs authorization goes through `ApiClient::fetch`:
//! the stored access token is attached as a bearer credential, and a
//! 401/403 answer triggers exactly one token refresh and one retry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::{header, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::ApiError;
use crate::auth::{AuthenticatedUser, RefreshClient, TokenStore};
use crate::config::{Config, Endpoints};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    user: Option<AuthenticatedUser>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest<'a> {
    refresh_token: &'a str,
}

/// Per-request extras supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers; `Authorization` is always replaced by the gateway
    pub headers: header::HeaderMap,
    pub query: Vec<(String, String)>,
    body: Option<Vec<u8>>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `body` as the JSON request body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| ApiError::InvalidRequest(format!("body is not serializable: {}", e)))?;
        self.body = Some(bytes);
        Ok(self)
    }

    pub fn header(mut self, name: header::HeaderName, value: header::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

/// API client for the loan platform backend.
/// Clone is cheap - the HTTP client, token store and refresh client are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    endpoints: Endpoints,
    store: Arc<TokenStore>,
    refresher: Arc<RefreshClient>,
}

impl ApiClient {
    /// Create a new API client. `timeout` bounds every network call.
    pub fn new(
        base_url: &str,
        endpoints: Endpoints,
        store: Arc<TokenStore>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let refresher = Arc::new(RefreshClient::new(
            client.clone(),
            Self::join_url(&base_url, &endpoints.refresh),
            Arc::clone(&store),
        ));

        Ok(Self {
            client,
            base_url,
            endpoints,
            store,
            refresher,
        })
    }

    pub fn from_config(config: &Config, store: Arc<TokenStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            &config.api_url()?,
            config.endpoints(),
            store,
            config.request_timeout(),
        )?)
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn refresher(&self) -> &RefreshClient {
        &self.refresher
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn url(&self, path: &str) -> String {
        Self::join_url(&self.base_url, path)
    }

    fn join_url(base_url: &str, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", base_url, path.trim_start_matches('/'))
    }

    /// Caller headers first, then JSON content type if the caller set none,
    /// then the bearer credential, which always wins.
    fn build_headers(
        caller: &header::HeaderMap,
        token: &str,
    ) -> Result<header::HeaderMap, ApiError> {
        let mut headers = caller.clone();
        if !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/json"),
            );
        }
        let bearer = header::HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ApiError::InvalidRequest("stored access token is not a valid header value".to_string()))?;
        headers.insert(header::AUTHORIZATION, bearer);
        Ok(headers)
    }

    async fn send(
        &self,
        method: &Method,
        url: &str,
        token: &str,
        options: &RequestOptions,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(Self::build_headers(&options.headers, token)?);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        if let Some(ref body) = options.body {
            request = request.body(body.clone());
        }

        debug!(method = %method, url = %url, "Sending request");
        request.send().await.map_err(ApiError::from_transport)
    }

    async fn parse_body<T: DeserializeOwned>(
        url: &str,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let text = response.text().await.map_err(ApiError::from_transport)?;
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        serde_json::from_str(text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e)))
    }

    fn is_auth_rejection(status: StatusCode) -> bool {
        status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
    }

    /// Perform an authenticated request and decode the JSON response.
    ///
    /// Fails with `MissingToken` before any network call when no access token
    /// is stored, with `Refresh` when a 401/403 could not be healed, and with
    /// `Http` for any other non-2xx answer (including a retry that is still
    /// rejected).
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let token = self.store.access_token().ok_or(ApiError::MissingToken)?;
        let url = self.url(path);

        let mut response = self.send(&method, &url, &token, &options).await?;

        if Self::is_auth_rejection(response.status()) {
            warn!(url = %url, status = response.status().as_u16(), "Authorization rejected, refreshing token");

            let new_token = self
                .refresher
                .refresh_after(&token)
                .await
                .ok_or(ApiError::Refresh)?;

            response = self.send(&method, &url, &new_token, &options).await?;
        }

        let response = ApiError::check_response(response).await?;
        Self::parse_body(&url, response).await
    }

    // ===== Convenience Verbs =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.fetch(Method::GET, path, RequestOptions::new()).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.fetch(Method::POST, path, RequestOptions::new().json(body)?)
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.fetch(Method::PUT, path, RequestOptions::new().json(body)?)
            .await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.fetch(Method::PATCH, path, RequestOptions::new().json(body)?)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.fetch(Method::DELETE, path, RequestOptions::new()).await
    }

    // ===== Session Lifecycle =====

    /// Sign in and store the returned token pair.
    ///
    /// Returns the user when the backend embeds it in the login response.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<AuthenticatedUser>, ApiError> {
        let url = self.url(&self.endpoints.login);

        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { email, password })
            .send()
            .await
            .map_err(ApiError::from_transport)?;

        let response = ApiError::check_response(response).await?;
        let login: LoginResponse = Self::parse_body(&url, response).await?;

        self.store
            .store_pair(&login.access_token, &login.refresh_token)?;

        info!("Login successful");
        Ok(login.user)
    }

    /// Sign out. The backend is told on a best-effort basis; local tokens are
    /// always cleared.
    pub async fn logout(&self) -> Result<(), ApiError> {
        if let Some(refresh_token) = self.store.refresh_token() {
            let url = self.url(&self.endpoints.logout);
            let mut request = self
                .client
                .post(&url)
                .json(&LogoutRequest { refresh_token: &refresh_token });
            if let Some(token) = self.store.access_token() {
                request = request.bearer_auth(token);
            }

            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = response.status().as_u16(), "Backend rejected logout");
                }
                Ok(_) => debug!("Backend session revoked"),
                Err(e) => warn!(error = %e, "Failed to reach backend for logout"),
            }
        }

        self.store.clear_tokens()?;
        info!("Logged out");
        Ok(())
    }

    /// Fetch the account behind the current access token.
    pub async fn current_user(&self) -> Result<AuthenticatedUser, ApiError> {
        self.get(&self.endpoints.me).await
    }
}
