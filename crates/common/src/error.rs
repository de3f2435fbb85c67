//! Error types for qarun configuration and shared vocabulary

use thiserror::Error;

/// Result type alias using the qarun common Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading or validating shared configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported browser: {0}")]
    UnsupportedBrowser(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
