//! Test logging.

use std::sync::Once;

use lumen_telemetry::{LogConfig, LogFormat, setup_logging};

static INIT: Once = Once::new();

/// Install a debug-level compact subscriber once per test binary.
///
/// Later calls, and calls after another subscriber was installed, do
/// nothing.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let config = LogConfig::new("debug")
            .with_format(LogFormat::Compact)
            .with_directive("surrealkv=warn")
            .without_ansi();
        if let Err(e) = setup_logging(&config) {
            tracing::debug!(error = %e, "test logging already installed");
        }
    });
}
