//! Event log command

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{format_timestamp, print_json, print_table, OutputFormat};

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Parse `30m`, `6h`, `2d` relative to `now`, or an RFC 3339 timestamp
pub fn parse_since(value: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    let Some((unit_at, _)) = value.char_indices().last() else {
        bail!("Empty --since value");
    };
    let (amount, unit) = value.split_at(unit_at);
    let amount: i64 = amount
        .parse()
        .with_context(|| format!("Invalid --since value '{}'", value))?;
    let window = match unit {
        "m" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        _ => bail!("Invalid --since unit in '{}' (use m, h or d)", value),
    };
    Ok(now - window)
}

/// List recent scaling events, newest first
pub async fn show_events(
    client: &ApiClient,
    limit: usize,
    since: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let since = since
        .as_deref()
        .map(|s| parse_since(s, Utc::now()))
        .transpose()?;
    let events = client.events(limit, since).await?;

    match format {
        OutputFormat::Json => print_json(&events)?,
        OutputFormat::Table => {
            print_table(
                events
                    .iter()
                    .map(|e| EventRow {
                        id: e.id,
                        time: format_timestamp(&e.timestamp),
                        kind: e.kind.clone(),
                        message: e.message.clone(),
                    })
                    .collect(),
            );
            println!("\nTotal: {} events", events.len());
        }
    }

    Ok(())
}
