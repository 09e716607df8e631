//! Error types for token cache operations

use provider::{ProviderKind, RefreshError};

/// Errors from token cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("token refresh failed for {provider}: {source}")]
    TokenRefresh {
        provider: ProviderKind,
        source: RefreshError,
    },
}

impl Error {
    /// Provider whose token could not be obtained.
    pub fn provider(&self) -> ProviderKind {
        match self {
            Error::TokenRefresh { provider, .. } => *provider,
        }
    }

    /// Whether the token endpoint call ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::TokenRefresh {
                source: RefreshError::Timeout(_),
                ..
            }
        )
    }
}

/// Result alias for token cache operations.
pub type Result<T> = std::result::Result<T, Error>;
