//! Lumen Test - Shared test utilities for Lumen crates.
//!
//! Schema and row fixtures, a failure-injecting substrate, and one-shot
//! test logging. Use as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! lumen-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use lumen_backstore::Backstore;
//! use lumen_test::{hr_schema, unique_schema_name};
//!
//! #[tokio::test]
//! async fn test_init() {
//!     let store = Backstore::memory(hr_schema(&unique_schema_name("hr")));
//!     store.init().await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod logging;
pub mod mocks;

pub use fixtures::*;
pub use logging::init_test_logging;
pub use mocks::*;
