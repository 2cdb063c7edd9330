#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Configuration for Lumen.
//!
//! A single [`Config`] covers backing store selection and logging.
//!
//! # Usage
//!
//! ```rust,no_run
//! use lumen_config::Config;
//!
//! let resolved = Config::load(Some(std::path::Path::new("lumen.toml"))).unwrap();
//! println!("backend: {}", resolved.config.storage.backend);
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Config file** passed to [`Config::load`]
//! 2. **Environment variables** (`LUMEN_*`), fallback only
//! 3. **Embedded defaults** (`defaults.toml` compiled into the binary)
//!
//! | Variable | Field |
//! |----------|-------|
//! | `LUMEN_BACKEND` | `storage.backend` |
//! | `LUMEN_DATA_DIR` | `storage.data_dir` |
//! | `LUMEN_BUNDLED` | `storage.bundled` |
//! | `LUMEN_LOG_LEVEL` | `logging.level` |
//!
//! This crate has no dependencies on other lumen crates.

/// Environment variable fallback resolution.
pub mod env;
/// Configuration error types.
pub mod error;
/// Configuration file loading.
pub mod loader;
/// Layered configuration merging.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::ResolvedConfig;
pub use types::*;

impl Config {
    /// Load configuration: defaults, then `user_file`, then env fallbacks.
    ///
    /// A `user_file` that does not exist is skipped.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any input is malformed or the final
    /// configuration fails validation.
    pub fn load(user_file: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(user_file)
    }

    /// Load configuration from a single file layered over the defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load_file(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }

    /// Parse a TOML document layered over the defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document is malformed or fails
    /// validation.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        loader::from_toml_str(content)
    }
}
