//! Configuration loading errors

use thiserror::Error;

/// Errors raised while assembling service configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing secret {name}: set {env_var} or {file_key}")]
    MissingSecret {
        name: String,
        env_var: String,
        file_key: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;
