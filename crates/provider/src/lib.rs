//! Provider identities and the token refresh seam
//!
//! The relay talks to exactly two OAuth-protected systems: the Creator data
//! platform and the DropStore file store. `ProviderKind` names them and knows
//! how each expects its bearer token to be presented. `TokenRefresher` is the
//! trait the token cache calls to mint a new access token; production wires in
//! the HTTP implementation from `relay-auth`, tests substitute fakes.

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// The closed set of providers the relay authenticates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Low-code data platform holding the records and their file fields
    Creator,
    /// Cloud file store receiving relayed documents
    DropStore,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::Creator, ProviderKind::DropStore];

    /// Stable identifier for logs, metrics labels and health output.
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Creator => "creator",
            ProviderKind::DropStore => "drop_store",
        }
    }

    /// Authorization scheme the provider's resource APIs expect.
    ///
    /// Creator does not accept the standard `Bearer` scheme on its record
    /// endpoints.
    pub fn auth_scheme(&self) -> &'static str {
        match self {
            ProviderKind::Creator => "Zoho-oauthtoken",
            ProviderKind::DropStore => "Bearer",
        }
    }

    /// Full `Authorization` header value for an access token.
    pub fn authorization_value(&self, access_token: &str) -> String {
        format!("{} {access_token}", self.auth_scheme())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A freshly issued access token.
///
/// `expires_in` is the provider-reported lifetime in seconds, relative to the
/// moment the response was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in: u64,
}

/// Why a refresh attempt failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    #[error("token endpoint request failed: {0}")]
    Transport(String),

    #[error("token endpoint timed out after {0:?}")]
    Timeout(Duration),

    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    #[error("no credentials configured for {0}")]
    NotConfigured(ProviderKind),
}

/// Result alias for refresh operations.
pub type Result<T> = std::result::Result<T, RefreshError>;

/// Exchanges a provider's long-lived refresh token for a new access token.
///
/// Uses `Pin<Box<dyn Future>>` so the cache can hold an `Arc<dyn TokenRefresher>`.
pub trait TokenRefresher: Send + Sync {
    fn refresh(
        &self,
        provider: ProviderKind,
    ) -> Pin<Box<dyn Future<Output = Result<RefreshedToken>> + Send + '_>>;
}
