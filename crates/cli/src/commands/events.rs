//! Recent agent events command

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{event_label, format_percent, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Time")]
    timestamp: String,
    #[tabled(rename = "Event")]
    kind: String,
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Before")]
    before: String,
    #[tabled(rename = "After")]
    after: String,
    #[tabled(rename = "Details")]
    message: String,
}

/// List recent events, newest first
pub async fn list_events(
    client: &ApiClient,
    kind: Option<String>,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let events = client.events(kind.as_deref(), limit).await?;

    if format == OutputFormat::Json {
        return print_json(&events);
    }

    let rows: Vec<EventRow> = events
        .iter()
        .map(|e| EventRow {
            timestamp: format_timestamp(&e.timestamp),
            kind: event_label(&e.kind),
            subject: e.subject.clone(),
            before: format_percent(e.usage_before_percent),
            after: format_percent(e.usage_after_percent),
            message: e.message.clone(),
        })
        .collect();
    print_table(&rows, "No events recorded");
    if !rows.is_empty() {
        println!("\nShowing {} event(s)", rows.len());
    }

    Ok(())
}

/// Format an RFC 3339 timestamp for display
fn format_timestamp(timestamp: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(timestamp)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}
