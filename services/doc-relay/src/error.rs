//! Relay failure taxonomy
//!
//! Every relay ends in a `RelayReceipt` or exactly one of these. Callers
//! branch on the variant (or `kind()`), never on the message text.

use provider::ProviderKind;
use thiserror::Error;

/// Why a relay request failed.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("missing or invalid parameters: {0}")]
    Validation(String),

    #[error("token refresh failed for {provider}: {detail}")]
    TokenRefresh {
        provider: ProviderKind,
        detail: String,
        timeout: bool,
    },

    #[error("download failed: {detail}")]
    Download { detail: String, timeout: bool },

    #[error("invalid content: {0}")]
    InvalidContent(String),

    #[error("upload to {provider} failed: {detail}")]
    Upload {
        provider: ProviderKind,
        detail: String,
        timeout: bool,
    },

    #[error("staging error: {0}")]
    Staging(String),
}

impl RelayError {
    /// Stable label used in error bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "validation_error",
            RelayError::TokenRefresh { .. } => "token_refresh_error",
            RelayError::Download { .. } => "download_error",
            RelayError::InvalidContent(_) => "invalid_content_error",
            RelayError::Upload { .. } => "upload_error",
            RelayError::Staging(_) => "staging_error",
        }
    }

    /// Whether the failing step ran out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            RelayError::TokenRefresh { timeout, .. }
            | RelayError::Download { timeout, .. }
            | RelayError::Upload { timeout, .. } => *timeout,
            _ => false,
        }
    }

    pub(crate) fn download(err: reqwest::Error) -> Self {
        RelayError::Download {
            timeout: err.is_timeout(),
            detail: err.to_string(),
        }
    }

    pub(crate) fn upload(provider: ProviderKind, err: reqwest::Error) -> Self {
        RelayError::Upload {
            provider,
            timeout: err.is_timeout(),
            detail: err.to_string(),
        }
    }

    pub(crate) fn staging(context: &str, err: std::io::Error) -> Self {
        RelayError::Staging(format!("{context}: {err}"))
    }
}

impl From<token_cache::Error> for RelayError {
    fn from(err: token_cache::Error) -> Self {
        RelayError::TokenRefresh {
            provider: err.provider(),
            timeout: err.is_timeout(),
            detail: err.to_string(),
        }
    }
}
