//! Refresh-token grant against the provider's token endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::RefreshError;
use crate::oauth::{OAuthConfig, TokenGrant, parse_token_response};

/// Exchanges a refresh token for a new grant.
#[async_trait]
pub trait RefreshClient: Send + Sync + std::fmt::Debug {
    /// Issue one refresh. Never retries.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError>;
}

/// Shared refresh client, constructed once at startup.
pub type SharedRefreshClient = Arc<dyn RefreshClient>;

#[derive(Debug, Serialize)]
struct TokenRefreshRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
    scope: &'a str,
}

/// Refresh client backed by the provider's token endpoint.
#[derive(Debug, Clone)]
pub struct HttpRefreshClient {
    client: reqwest::Client,
    config: OAuthConfig,
}

impl HttpRefreshClient {
    pub fn new(client: reqwest::Client, config: OAuthConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl RefreshClient for HttpRefreshClient {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError> {
        if refresh_token.is_empty() {
            return Err(RefreshError::NoRefreshToken);
        }

        let request_body = TokenRefreshRequest {
            grant_type: "refresh_token",
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
            refresh_token,
            scope: &self.config.scope,
        };

        let response = self
            .client
            .post(&self.config.token_url)
            .form(&request_body)
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let result = parse_token_response(status, &body);
        if let Err(ref e) = result {
            tracing::warn!(status = status.as_u16(), error = %e, "Token refresh rejected");
        }
        result
    }
}
