//! Shared building blocks for the document relay workspace

mod clock;
mod error;
mod secret;

pub use clock::{millis_until, now_millis};
pub use error::{Error, Result};
pub use secret::Secret;
