//! Handler for `check-config`.

use super::output;
use crate::error::Result;
use crate::infrastructure::config::settings::Config;

/// Print the effective, validated configuration.
pub fn execute(config: &Config) -> Result<()> {
    output::header(env!("CARGO_PKG_VERSION"));
    output::success("Configuration is valid");

    output::section("Service");
    output::field("service", &config.service_name);
    output::field("http", &config.server.bind);
    output::field("broker", &config.broker.url);
    output::field("database", &config.database);

    output::section("Delivery");
    output::field("queue", &config.queue.path);
    output::field("queue backup", &config.queue.backup_path);
    output::field("dead letters", &config.dead_letter.path);
    output::field(
        "dispatcher",
        format!(
            "topic={} every={}ms max_attempts={} max_delay={}ms",
            config.dispatcher.base_topic,
            config.dispatcher.poll_interval_ms,
            config.dispatcher.max_attempts,
            config.dispatcher.max_delay_ms
        ),
    );
    output::field(
        "batches",
        format!(
            "chunk={} concurrency={}",
            config.batch.chunk_size, config.batch.concurrency
        ),
    );
    output::field("readiness deps", config.health.dependencies.join(", "));
    if config.broker.is_memory() {
        output::warning("memory:// broker keeps messages in process only");
    }
    Ok(())
}
