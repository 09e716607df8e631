//! Per-provider token records and the reuse-or-refresh decision
//!
//! Each provider has a slot with two parts. The published `TokenRecord` sits
//! behind an `RwLock` that is only held long enough to copy or replace it, so
//! readers such as the health endpoint never wait on the token endpoint. The
//! in-flight refresh, if any, is a `Shared` future: the first caller that
//! finds the token unusable starts it, later callers clone and await the same
//! future, and all of them observe its outcome, success or failure. The
//! refresh clears itself from the slot once it has published its result, so
//! only callers arriving after that start a new one.

use std::sync::Arc;
use std::time::Duration;

use common::{millis_until, now_millis};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use provider::{ProviderKind, RefreshError, TokenRefresher};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};

/// Safety margin subtracted from a token's expiry before it is reused.
pub const DEFAULT_SKEW: Duration = Duration::from_secs(60);

/// Cached access token for one provider.
///
/// `expires_at` is a unix timestamp in milliseconds. `access_token` and
/// `expires_at` are only ever replaced together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRecord {
    pub access_token: Option<String>,
    pub expires_at: u64,
}

impl TokenRecord {
    pub fn new(access_token: impl Into<String>, expires_at: u64) -> Self {
        Self {
            access_token: Some(access_token.into()),
            expires_at,
        }
    }

    /// The cached token if it is still valid `skew_millis` from `now`.
    fn usable_token(&self, now: u64, skew_millis: u64) -> Option<&str> {
        match &self.access_token {
            Some(token) if now < self.expires_at.saturating_sub(skew_millis) => Some(token),
            _ => None,
        }
    }

    pub fn state(&self, now: u64, skew_millis: u64) -> TokenState {
        if self.access_token.is_none() {
            TokenState::Uninitialized
        } else if self.usable_token(now, skew_millis).is_some() {
            TokenState::Valid
        } else {
            TokenState::Expired
        }
    }
}

/// Observable lifecycle state of a provider's token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Uninitialized,
    Valid,
    Expired,
}

impl TokenState {
    pub fn label(&self) -> &'static str {
        match self {
            TokenState::Uninitialized => "uninitialized",
            TokenState::Valid => "valid",
            TokenState::Expired => "expired",
        }
    }
}

type RefreshOutcome = std::result::Result<String, RefreshError>;
type InflightRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Default)]
struct Slot {
    record: RwLock<TokenRecord>,
    inflight: Mutex<Option<InflightRefresh>>,
}

/// Owned, injectable token cache shared by every relay request.
pub struct TokenCache {
    refresher: Arc<dyn TokenRefresher>,
    creator: Arc<Slot>,
    drop_store: Arc<Slot>,
    skew: Duration,
}

impl TokenCache {
    /// Create a cache with both providers uninitialized.
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            refresher,
            creator: Arc::default(),
            drop_store: Arc::default(),
            skew: DEFAULT_SKEW,
        }
    }

    /// Override the reuse margin (defaults to 60 seconds).
    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    fn slot(&self, provider: ProviderKind) -> &Arc<Slot> {
        match provider {
            ProviderKind::Creator => &self.creator,
            ProviderKind::DropStore => &self.drop_store,
        }
    }

    fn skew_millis(&self) -> u64 {
        self.skew.as_millis() as u64
    }

    /// Return an access token valid for at least the skew margin.
    ///
    /// Reuses the cached token when possible; otherwise joins the in-flight
    /// refresh or starts one. On refresh failure the record is left untouched
    /// and every caller that joined that refresh gets the same error.
    #[instrument(skip(self), fields(provider = %provider))]
    pub async fn get_valid_token(&self, provider: ProviderKind) -> Result<String> {
        let skew = self.skew_millis();
        let record = self.record(provider).await;
        if let Some(token) = record.usable_token(now_millis(), skew) {
            debug!("reusing cached access token");
            return Ok(token.to_string());
        }

        debug!("access token missing or expiring, refreshing");
        self.shared_refresh(provider, |record| {
            record.usable_token(now_millis(), skew).is_none()
        })
        .await
    }

    /// Refresh an initialized token that expires within `threshold`.
    ///
    /// Returns whether a refresh was run or joined. Uninitialized providers
    /// are left alone; the first request initializes them.
    pub async fn refresh_if_expiring(
        &self,
        provider: ProviderKind,
        threshold: Duration,
    ) -> Result<bool> {
        let threshold_millis = threshold.as_millis() as u64;
        let due = |record: &TokenRecord| millis_until(record.expires_at) <= threshold_millis;

        let record = self.record(provider).await;
        if record.access_token.is_none() || !due(&record) {
            return Ok(false);
        }
        self.shared_refresh(provider, due).await?;
        Ok(true)
    }

    /// Await the provider's in-flight refresh, starting one if none is running.
    ///
    /// `due` is re-checked against the published record before a new refresh
    /// starts, so a caller that raced with a just-finished refresh reuses its
    /// token instead of issuing another request.
    async fn shared_refresh(
        &self,
        provider: ProviderKind,
        due: impl Fn(&TokenRecord) -> bool,
    ) -> Result<String> {
        let slot = self.slot(provider);
        let refresh = {
            let mut inflight = slot.inflight.lock().await;
            match inflight.as_ref() {
                Some(refresh) => {
                    debug!(provider = %provider, "joining in-flight refresh");
                    refresh.clone()
                }
                None => {
                    let record = slot.record.read().await.clone();
                    if let (false, Some(token)) = (due(&record), record.access_token) {
                        return Ok(token);
                    }
                    let refresh = self.start_refresh(provider, slot.clone());
                    *inflight = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh
            .await
            .map_err(|source| Error::TokenRefresh { provider, source })
    }

    /// Build the shared refresh future for one provider.
    ///
    /// The future publishes a successful result before clearing itself from
    /// the slot; a failure only clears the slot.
    fn start_refresh(&self, provider: ProviderKind, slot: Arc<Slot>) -> InflightRefresh {
        let refresher = self.refresher.clone();
        async move {
            let outcome = match refresher.refresh(provider).await {
                Ok(issued) => {
                    let expires_at =
                        now_millis().saturating_add(issued.expires_in.saturating_mul(1000));
                    *slot.record.write().await =
                        TokenRecord::new(issued.access_token.clone(), expires_at);
                    metrics::counter!("token_refresh_total", "provider" => provider.id(), "result" => "success")
                        .increment(1);
                    info!(provider = %provider, expires_in = issued.expires_in, "token cache updated");
                    Ok(issued.access_token)
                }
                Err(source) => {
                    metrics::counter!("token_refresh_total", "provider" => provider.id(), "result" => "failure")
                        .increment(1);
                    warn!(provider = %provider, error = %source, "token refresh failed, cache unchanged");
                    Err(source)
                }
            };
            slot.inflight.lock().await.take();
            outcome
        }
        .boxed()
        .shared()
    }

    /// Snapshot of a provider's record. Never waits on a refresh.
    pub async fn record(&self, provider: ProviderKind) -> TokenRecord {
        self.slot(provider).record.read().await.clone()
    }

    /// Replace a provider's record wholesale, e.g. to prime the cache.
    pub async fn insert_record(&self, provider: ProviderKind, record: TokenRecord) {
        *self.slot(provider).record.write().await = record;
    }

    /// Token state summary for the health endpoint. Never exposes tokens.
    pub async fn health(&self) -> serde_json::Value {
        let now = now_millis();
        let mut providers = serde_json::Map::new();
        for provider in ProviderKind::ALL {
            let record = self.record(provider).await;
            let state = record.state(now, self.skew_millis());
            let expires_in_secs = match state {
                TokenState::Uninitialized => serde_json::Value::Null,
                _ => serde_json::json!(record.expires_at.saturating_sub(now) / 1000),
            };
            providers.insert(
                provider.id().to_string(),
                serde_json::json!({
                    "state": state.label(),
                    "expires_in_secs": expires_in_secs,
                }),
            );
        }
        serde_json::Value::Object(providers)
    }
}
