//! Process-wide access token cache
//!
//! Holds one `TokenRecord` per provider and hands out access tokens that are
//! valid for at least the skew margin. Expired or missing tokens are refreshed
//! through an injected `provider::TokenRefresher`.
//!
//! Token lifecycle per provider:
//! 1. Startup → uninitialized (no access token)
//! 2. First `get_valid_token()` → refresh → valid
//! 3. Time passes → expired (not an explicit transition)
//! 4. Next `get_valid_token()` or background cycle → refresh → valid
//! 5. Refresh failure → record left exactly as it was
//!
//! Refreshes are single-flight: callers that arrive while a refresh is in
//! flight await that same refresh and share its result, whether it succeeded
//! or failed. Reading a record never waits on the token endpoint.

pub mod cache;
pub mod error;
pub mod refresh;

pub use cache::{DEFAULT_SKEW, TokenCache, TokenRecord, TokenState};
pub use error::{Error, Result};
pub use refresh::spawn_refresh_task;
