//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! OAuth client secrets and refresh tokens are loaded from env vars or
//! `*_file` paths, never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use provider::ProviderKind;
use relay_auth::{CREATOR_TOKEN_ENDPOINT, DROP_STORE_TOKEN_ENDPOINT, ProviderCredentials};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    pub creator: CreatorConfig,
    pub drop_store: DropStoreConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Single browser origin allowed by CORS. Unset means any origin.
    #[serde(default)]
    pub allowed_origin: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Staging and outbound call settings shared by every relay
#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            timeout_secs: default_timeout(),
        }
    }
}

impl RelayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// OAuth client registration shared by both providers.
#[derive(Debug, Deserialize)]
pub struct OAuthClientConfig {
    #[serde(default)]
    pub client_id: String,
    /// Token endpoint. Defaults to the provider's public endpoint.
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub refresh_token_file: Option<PathBuf>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    #[serde(skip)]
    pub refresh_token: Option<Secret<String>>,
}

/// Creator platform settings
#[derive(Debug, Deserialize)]
pub struct CreatorConfig {
    #[serde(flatten)]
    pub oauth: OAuthClientConfig,
    /// Base of the record file download endpoint
    #[serde(default = "default_creator_data_url")]
    pub download_url: String,
    /// Base of the record file upload endpoint
    #[serde(default = "default_creator_data_url")]
    pub upload_url: String,
}

/// DropStore settings
#[derive(Debug, Deserialize)]
pub struct DropStoreConfig {
    #[serde(flatten)]
    pub oauth: OAuthClientConfig,
    #[serde(default = "default_drop_store_upload_url")]
    pub upload_url: String,
}

/// Token cache tuning
#[derive(Debug, Deserialize)]
pub struct TokensConfig {
    /// Seconds before expiry at which a cached token stops being handed out
    #[serde(default = "default_skew_secs")]
    pub skew_secs: u64,
    /// Background refresh interval. 0 disables the task.
    #[serde(default = "default_background_refresh_secs")]
    pub background_refresh_secs: u64,
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: u64,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            skew_secs: default_skew_secs(),
            background_refresh_secs: default_background_refresh_secs(),
            refresh_threshold_secs: default_refresh_threshold_secs(),
        }
    }
}

/// Per-client fixed window limit on the relay routes
#[derive(Debug, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_rate_max_requests")]
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_rate_window_secs(),
            max_requests: default_rate_max_requests(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("doc-relay")
}

fn default_creator_data_url() -> String {
    "https://www.zohoapis.com/creator/v2.1/data".into()
}

fn default_drop_store_upload_url() -> String {
    "https://content.dropboxapi.com/2/files/upload".into()
}

fn default_skew_secs() -> u64 {
    60
}

fn default_background_refresh_secs() -> u64 {
    300
}

fn default_refresh_threshold_secs() -> u64 {
    900
}

fn default_rate_window_secs() -> u64 {
    15 * 60
}

fn default_rate_max_requests() -> u32 {
    100
}

/// Env var names and config keys a provider's credentials are read from.
struct SecretSources {
    section: &'static str,
    client_id_env: &'static str,
    client_secret_env: &'static str,
    refresh_token_env: &'static str,
    default_token_url: &'static str,
}

const CREATOR_SOURCES: SecretSources = SecretSources {
    section: "creator",
    client_id_env: "ZOHO_CLIENT_ID",
    client_secret_env: "ZOHO_CLIENT_SECRET",
    refresh_token_env: "ZOHO_REFRESH_TOKEN",
    default_token_url: CREATOR_TOKEN_ENDPOINT,
};

const DROP_STORE_SOURCES: SecretSources = SecretSources {
    section: "drop_store",
    client_id_env: "DROPBOX_CLIENT_ID",
    client_secret_env: "DROPBOX_CLIENT_SECRET",
    refresh_token_env: "DROPBOX_REFRESH_TOKEN",
    default_token_url: DROP_STORE_TOKEN_ENDPOINT,
};

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order, per provider and per secret:
    /// 1. env var (`ZOHO_CLIENT_SECRET`, `DROPBOX_REFRESH_TOKEN`, ...)
    /// 2. `*_file` path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(port) = std::env::var("PORT") {
            let port: u16 = port.trim().parse().map_err(|_| {
                common::Error::Config(format!("PORT must be a valid port number, got: {port}"))
            })?;
            config.server.listen_addr.set_port(port);
        }

        config.creator.oauth.resolve(&CREATOR_SOURCES)?;
        config.drop_store.oauth.resolve(&DROP_STORE_SOURCES)?;

        config.validate()?;
        for provider in ProviderKind::ALL {
            config.credentials(provider)?;
        }
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let urls = [
            ("creator.token_url", self.creator.oauth.token_url.as_deref()),
            ("creator.download_url", Some(self.creator.download_url.as_str())),
            ("creator.upload_url", Some(self.creator.upload_url.as_str())),
            (
                "drop_store.token_url",
                self.drop_store.oauth.token_url.as_deref(),
            ),
            (
                "drop_store.upload_url",
                Some(self.drop_store.upload_url.as_str()),
            ),
        ];
        for (key, url) in urls {
            if let Some(url) = url
                && !is_http_url(url)
            {
                return Err(common::Error::Config(format!(
                    "{key} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if self.relay.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.rate_limit.max_requests == 0 {
            return Err(common::Error::Config(
                "rate_limit.max_requests must be greater than 0".into(),
            ));
        }

        if self.rate_limit.window_secs == 0 {
            return Err(common::Error::Config(
                "rate_limit.window_secs must be greater than 0".into(),
            ));
        }

        if let Some(origin) = &self.server.allowed_origin
            && !is_http_url(origin)
        {
            return Err(common::Error::Config(format!(
                "allowed_origin must start with http:// or https://, got: {origin}"
            )));
        }

        Ok(())
    }

    /// Credentials for one provider, ready for the token refresher.
    pub fn credentials(&self, provider: ProviderKind) -> common::Result<ProviderCredentials> {
        match provider {
            ProviderKind::Creator => self.creator.oauth.credentials(&CREATOR_SOURCES),
            ProviderKind::DropStore => self.drop_store.oauth.credentials(&DROP_STORE_SOURCES),
        }
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("doc-relay.toml")
    }
}

impl OAuthClientConfig {
    fn resolve(&mut self, sources: &SecretSources) -> common::Result<()> {
        if let Ok(id) = std::env::var(sources.client_id_env) {
            self.client_id = id.trim().to_owned();
        }
        if self.client_id.trim().is_empty() {
            return Err(common::Error::Config(format!(
                "{}.client_id is required (or set {})",
                sources.section, sources.client_id_env
            )));
        }

        if self.token_url.is_none() {
            self.token_url = Some(sources.default_token_url.to_owned());
        }

        self.client_secret = read_secret(sources.client_secret_env, &self.client_secret_file)?;
        self.refresh_token = read_secret(sources.refresh_token_env, &self.refresh_token_file)?;
        Ok(())
    }

    fn credentials(&self, sources: &SecretSources) -> common::Result<ProviderCredentials> {
        let client_secret = self
            .client_secret
            .clone()
            .ok_or_else(|| missing(sources, "client secret", sources.client_secret_env, "client_secret_file"))?;
        let refresh_token = self
            .refresh_token
            .clone()
            .ok_or_else(|| missing(sources, "refresh token", sources.refresh_token_env, "refresh_token_file"))?;

        Ok(ProviderCredentials {
            token_url: self
                .token_url
                .clone()
                .unwrap_or_else(|| sources.default_token_url.to_owned()),
            client_id: self.client_id.clone(),
            client_secret,
            refresh_token,
        })
    }
}

fn missing(sources: &SecretSources, what: &str, env_var: &str, file_key: &str) -> common::Error {
    common::Error::MissingSecret {
        name: format!("{} {what}", sources.section),
        env_var: env_var.to_owned(),
        file_key: format!("{}.{file_key}", sources.section),
    }
}

/// Env var wins over the file. Blank values count as absent.
fn read_secret(env_var: &str, file: &Option<PathBuf>) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env_var) {
        let secret = Secret::new(value.trim().to_owned());
        if !secret.is_blank() {
            return Ok(Some(secret));
        }
    }

    let Some(path) = file else {
        return Ok(None);
    };
    let value = std::fs::read_to_string(path).map_err(|e| {
        common::Error::Config(format!("failed to read {env_var} file {}: {e}", path.display()))
    })?;
    let secret = Secret::new(value.trim().to_owned());
    if secret.is_blank() {
        return Ok(None);
    }
    Ok(Some(secret))
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
