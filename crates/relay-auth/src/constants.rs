//! Default OAuth token endpoints
//!
//! Used when the config file leaves `token_url` unset. Regional Creator
//! deployments (EU, IN, AU) must override the Creator endpoint.

/// Creator accounts server token endpoint (US data center)
pub const CREATOR_TOKEN_ENDPOINT: &str = "https://accounts.zoho.com/oauth/v2/token";

/// DropStore token endpoint
pub const DROP_STORE_TOKEN_ENDPOINT: &str = "https://api.dropboxapi.com/oauth2/token";

/// Grant type for every exchange this service performs
pub const REFRESH_GRANT_TYPE: &str = "refresh_token";
