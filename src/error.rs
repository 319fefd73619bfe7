//! Error types for the digital ID validator.

use thiserror::Error;

/// Malformed or unexpected-format credential input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("{group} has {found} fields, expected {expected}")]
    FieldCountMismatch {
        group: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid hex signature: {0}")]
    BadHex(String),

    #[error("Invalid compact date '{0}'")]
    BadDate(String),

    #[error("Unknown {table} code '{code}'")]
    UnknownCode { table: &'static str, code: String },
}

/// Infrastructure failures around cached issuer keys.
#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("No issuer keys are cached")]
    NoKeys,

    #[error("Key {0} is not available in storage")]
    KeyUnavailable(u64),

    #[error("Key {id} is malformed: {reason}")]
    MalformedKey { id: u64, reason: String },

    #[error("Key storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Failed to fetch keys: {0}")]
    FetchFailed(String),
}

/// Failures reported by the online validation and image services.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Credential rejected by validation service")]
    Rejected,

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Configuration loading and validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration field '{0}' is empty")]
    MissingField(&'static str),

    #[error("Configuration field '{field}' is not a valid URL: {reason}")]
    InvalidEndpoint { field: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ValidationError>;
