mod site;
mod transport;

pub use site::TestSite;
pub use transport::{Fault, FaultyTransport, SentRequest};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Route engine logs to the test output. Filter with `RUST_LOG`; repeated
/// calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_engine=debug,tessera_storage=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}
