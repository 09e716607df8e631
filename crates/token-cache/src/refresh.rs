//! Proactive background token refresh
//!
//! Spawns a periodic task that refreshes tokens approaching expiration so
//! that most relay requests find a valid token already cached. It joins the
//! same in-flight refresh as request-time callers, so the two never issue
//! duplicate token requests.

use std::sync::Arc;
use std::time::Duration;

use provider::ProviderKind;
use tracing::{debug, info, warn};

use crate::cache::TokenCache;

/// Spawn a background task that refreshes expiring tokens.
///
/// Runs every `interval` and refreshes any initialized token expiring within
/// `threshold`. Failures are logged and left for the next cycle (or the next
/// request) to retry.
pub fn spawn_refresh_task(
    cache: Arc<TokenCache>,
    interval: Duration,
    threshold: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately and nothing is cached yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            refresh_cycle(&cache, threshold).await;
        }
    })
}

/// Run one refresh cycle over every provider. Returns how many were refreshed.
async fn refresh_cycle(cache: &TokenCache, threshold: Duration) -> usize {
    let mut refreshed = 0;
    for provider in ProviderKind::ALL {
        match cache.refresh_if_expiring(provider, threshold).await {
            Ok(true) => {
                info!(provider = %provider, "background token refresh succeeded");
                refreshed += 1;
            }
            Ok(false) => {
                debug!(provider = %provider, "token not due for refresh");
            }
            Err(e) => {
                warn!(provider = %provider, error = %e, "background refresh failed, will retry next cycle");
            }
        }
    }
    refreshed
}
