//! Handler for `dead-letters`.

use std::sync::Arc;

use tabled::{Table, Tabled};

use super::command::DeadLetterArgs;
use super::output;
use crate::application::dead_letter::DeadLetterSink;
use crate::application::metrics::GatewayMetrics;
use crate::domain::Event;
use crate::error::Result;
use crate::infrastructure::config::settings::Config;

#[derive(Tabled)]
struct DeadLetterRow {
    #[tabled(rename = "Event ID")]
    event_id: String,
    #[tabled(rename = "Source")]
    source: &'static str,
    #[tabled(rename = "Stage")]
    stage: &'static str,
    #[tabled(rename = "Type")]
    event_type: String,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
}

impl From<&Event> for DeadLetterRow {
    fn from(event: &Event) -> Self {
        Self {
            event_id: event.event_id().to_string(),
            source: event.source().as_str(),
            stage: event.funnel_stage().as_str(),
            event_type: event.event_type().to_string(),
            timestamp: event.timestamp().to_string(),
        }
    }
}

/// Last `limit` events, or all of them.
fn tail(events: &[Event], limit: Option<usize>) -> &[Event] {
    match limit {
        Some(limit) if limit < events.len() => &events[events.len() - limit..],
        _ => events,
    }
}

fn render(events: &[Event]) -> String {
    Table::new(events.iter().map(DeadLetterRow::from)).to_string()
}

/// List dead-lettered events.
pub async fn execute(config: &Config, args: &DeadLetterArgs) -> Result<()> {
    let sink = DeadLetterSink::new(&config.dead_letter.path, Arc::new(GatewayMetrics::new()));
    let events = sink.load_all().await?;
    let shown = tail(&events, args.limit);

    if args.json {
        for event in shown {
            println!("{}", serde_json::to_string(event)?);
        }
        return Ok(());
    }

    output::header(env!("CARGO_PKG_VERSION"));
    output::field("File", sink.path().display());
    output::field("Events", events.len());
    if events.is_empty() {
        output::success("No dead-lettered events");
        return Ok(());
    }

    output::section("Dead-lettered events");
    if shown.len() < events.len() {
        output::note(&format!("showing newest {} of {}", shown.len(), events.len()));
    }
    output::lines(&render(shown));
    Ok(())
}
