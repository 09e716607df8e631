//! Refresh-token exchange
//!
//! POSTs `{refresh_token, client_id, client_secret, grant_type}` as a form to
//! the provider's token endpoint. Creator reports some failures (revoked or
//! unknown refresh token) as HTTP 200 with an `error` field, so a success
//! status alone does not mean a token was issued.

use std::time::Duration;

use provider::{RefreshError, RefreshedToken, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::REFRESH_GRANT_TYPE;
use crate::credentials::ProviderCredentials;

/// Token endpoint response body.
///
/// `expires_in` is a delta in seconds; the cache turns it into an absolute
/// expiry when it stores the token.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Exchange a refresh token for a new access token.
pub async fn refresh_access_token(
    client: &reqwest::Client,
    credentials: &ProviderCredentials,
    timeout: Duration,
) -> Result<RefreshedToken> {
    let response = client
        .post(&credentials.token_url)
        .timeout(timeout)
        .form(&[
            ("refresh_token", credentials.refresh_token.expose().as_str()),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose().as_str()),
            ("grant_type", REFRESH_GRANT_TYPE),
        ])
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                RefreshError::Timeout(timeout)
            } else {
                RefreshError::Transport(e.to_string())
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(RefreshError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let body = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

    into_refreshed(status.as_u16(), body)
}

/// Validate a parsed response body and extract the issued token.
fn into_refreshed(status: u16, body: TokenResponse) -> Result<RefreshedToken> {
    if let Some(error) = body.error {
        return Err(RefreshError::Rejected { status, body: error });
    }
    let access_token = body
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RefreshError::InvalidResponse("missing access_token".into()))?;
    let expires_in = body
        .expires_in
        .ok_or_else(|| RefreshError::InvalidResponse("missing expires_in".into()))?;

    debug!(expires_in, "token endpoint issued access token");
    Ok(RefreshedToken {
        access_token,
        expires_in,
    })
}
