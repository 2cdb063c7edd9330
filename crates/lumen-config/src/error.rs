//! Configuration error types.

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// File that failed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A config document is not valid TOML or does not fit [`Config`](crate::Config).
    #[error("failed to parse config {path}: {source}")]
    ParseError {
        /// File (or `<embedded defaults>` / `<merged config>`) that failed.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// A field holds a value outside its accepted range.
    #[error("invalid config field {field}: {message}")]
    ValidationError {
        /// Dotted path of the field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// An environment variable holds a value that cannot be used.
    #[error("invalid environment variable {var}: {message}")]
    EnvError {
        /// Variable name.
        var: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
