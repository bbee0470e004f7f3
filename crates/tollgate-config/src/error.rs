//! Configuration error types.

use std::io;
use thiserror::Error;

/// Configuration error type.
///
/// Every variant is fatal at load time: a process must not start with a rule
/// set it could not fully understand.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("cannot read config file {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The document is not valid TOML or does not fit the schema.
    #[error("cannot parse config {path}: {source}")]
    ParseError {
        /// File path, or `<inline>` for in-memory documents.
        path: String,
        /// Underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A value parsed but is not acceptable, e.g. an unknown scope or a
    /// malformed glob.
    #[error("invalid `{field}`: {message}")]
    ValidationError {
        /// Dotted path of the offending key.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `TOLLGATE_*` override could not be applied.
    #[error("environment override {var_name}: {message}")]
    EnvError {
        /// Variable name.
        var_name: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
