//! Per-provider OAuth client credentials and the HTTP-backed refresher
//!
//! Credentials are loaded once at startup and never rotated: if a provider
//! issues a new refresh token alongside an access token, it is ignored and
//! the configured one keeps being used.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use provider::{ProviderKind, RefreshError, RefreshedToken, TokenRefresher};
use tracing::{info, instrument, warn};

use crate::token::refresh_access_token;

/// Everything needed to run the refresh-token grant against one provider.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub refresh_token: Secret<String>,
}

/// `TokenRefresher` that performs the real token endpoint exchange.
///
/// Holds one shared `reqwest::Client` and the credentials of every configured
/// provider. A provider without credentials fails with `NotConfigured`.
pub struct OAuthRefresher {
    client: reqwest::Client,
    timeout: Duration,
    credentials: HashMap<ProviderKind, ProviderCredentials>,
}

impl OAuthRefresher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            credentials: HashMap::new(),
        }
    }

    /// Register (or replace) the credentials for a provider.
    pub fn with_provider(mut self, provider: ProviderKind, credentials: ProviderCredentials) -> Self {
        self.credentials.insert(provider, credentials);
        self
    }
}

impl TokenRefresher for OAuthRefresher {
    fn refresh(
        &self,
        provider: ProviderKind,
    ) -> Pin<Box<dyn Future<Output = provider::Result<RefreshedToken>> + Send + '_>> {
        Box::pin(self.exchange(provider))
    }
}

impl OAuthRefresher {
    #[instrument(skip(self), fields(provider = %provider))]
    async fn exchange(&self, provider: ProviderKind) -> provider::Result<RefreshedToken> {
        let credentials = self
            .credentials
            .get(&provider)
            .ok_or(RefreshError::NotConfigured(provider))?;

        match refresh_access_token(&self.client, credentials, self.timeout).await {
            Ok(token) => {
                info!(expires_in = token.expires_in, "access token refreshed");
                Ok(token)
            }
            Err(e) => {
                warn!(error = %e, "access token refresh failed");
                Err(e)
            }
        }
    }
}
