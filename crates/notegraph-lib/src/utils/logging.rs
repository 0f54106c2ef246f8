//! Process-wide tracing setup shared by the binaries and tests.

use std::sync::Once;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Default filter directive when `RUST_LOG` does not say otherwise.
pub const DEFAULT_DIRECTIVE: &str = "notegraph=info";

/// Install the fmt subscriber. Safe to call more than once.
///
/// Output goes to stderr so stdout stays free for `--json` output and the MCP
/// stdio transport.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
        // Another subscriber may already be installed (e.g. by a test harness).
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}
