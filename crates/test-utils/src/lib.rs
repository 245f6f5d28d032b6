pub mod builders;
pub mod fake_driver;
pub mod harness;
pub mod probes;

use std::sync::Once;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Route kit's tracing output into the test harness, once per binary.
///
/// Output is captured per test and only shown for failures. The filter comes
/// from `KIT_LOG` (same variable as the binary) and defaults to `kit=debug`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(kit::logging::LOG_ENV)
            .unwrap_or_else(|_| EnvFilter::new("kit=debug,warn"));

        // A second subscriber in the same process is harmless.
        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Run a future with a 30-second timeout (virtual time in paused tests).
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(30), f)
        .await
        .expect("Test timed out after 30 seconds")
}
