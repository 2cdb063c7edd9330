//! Lumen Telemetry - logging setup for Lumen.
//!
//! Builds a `tracing-subscriber` stack (env filter plus one fmt layer) from a
//! [`LogConfig`]. With the **`config`** feature a [`LogConfig`] can be built
//! straight from the `[logging]` section of the Lumen configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use lumen_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), lumen_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Pretty)
//!     .with_directive("lumen_backstore=trace");
//!
//! setup_logging(&config)?;
//! tracing::info!("logging ready");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
