//! OAuth refresh-token exchange for the relay's providers
//!
//! Both providers issue long-lived refresh tokens out of band; at runtime the
//! relay only ever performs the `grant_type=refresh_token` exchange:
//! 1. `ProviderCredentials` carries the endpoint, client id/secret and refresh token
//! 2. `token::refresh_access_token()` POSTs the form and parses `{access_token, expires_in}`
//! 3. `OAuthRefresher` maps each `ProviderKind` to its credentials and implements
//!    `provider::TokenRefresher` for the token cache

pub mod constants;
pub mod credentials;
pub mod token;

pub use constants::*;
pub use credentials::{OAuthRefresher, ProviderCredentials};
pub use token::{TokenResponse, refresh_access_token};
