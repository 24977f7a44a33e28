//! Error types for Skycast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SkycastError>;

#[derive(Error, Debug)]
pub enum SkycastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("Cancelled by shutdown request")]
    Cancelled,
}

impl SkycastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SkycastError::Config(_) => 2,
            SkycastError::Platform(PlatformError::Authentication(_)) => 2,
            SkycastError::Cancelled => 130,
            SkycastError::Platform(_) => 1,
            SkycastError::Storage(_) => 1,
            SkycastError::Feed(_) => 1,
            SkycastError::RetriesExhausted(_) => 1,
        }
    }

    /// Whether the error is a rate-limit rejection from the posting target
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SkycastError::Platform(PlatformError::RateLimit(_)))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cursor storage unavailable at {path}: {source}")]
    Unavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write cursor to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cursor at {path} holds an unparseable timestamp: {value:?}")]
    Corrupt { path: String, value: String },
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to parse feed {url}: {reason}")]
    Parse { url: String, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),
}
