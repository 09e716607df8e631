//! Wall-clock helpers
//!
//! Token expiry is tracked as absolute unix milliseconds, so every component
//! that compares against an expiry goes through these helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds. A clock before the epoch reads as 0.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Milliseconds from now until `deadline`, or 0 if it has passed.
pub fn millis_until(deadline: u64) -> u64 {
    deadline.saturating_sub(now_millis())
}
