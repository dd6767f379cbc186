//! Handler for `serve`.

use tracing::info;

use crate::error::Result;
use crate::infrastructure::config::settings::Config;
use crate::infrastructure::runtime;

/// Initialise logging and run the gateway until shutdown.
pub async fn execute(config: Config) -> Result<()> {
    config.init_logging();
    info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        "eventgate starting"
    );
    runtime::run(config).await
}
