//! Output formatting for CLI commands

use chrono::{DateTime, Local, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use intentflow_intent::{Intent, IntentStatus};
use serde::Serialize;

/// Display color for an intent status
pub fn status_color(status: IntentStatus) -> Color {
    match status {
        IntentStatus::Received => Color::Yellow,
        IntentStatus::Processing => Color::Cyan,
        IntentStatus::Processed => Color::Green,
        IntentStatus::NeedsInput => Color::Magenta,
        IntentStatus::Failed => Color::Red,
        IntentStatus::Ignored => Color::DarkGrey,
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Shorten to `max` characters, marking the cut with "...".
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

/// Print a table with custom column colors
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| match color {
                Some(c) => Cell::new(text).fg(c),
                None => Cell::new(text),
            })
            .collect();
        table.add_row(cells);
    }

    println!("{}", table);
}

/// One row per intent: id, channel, status, text, reason, received.
pub fn print_intents(intents: &[Intent]) {
    let rows = intents
        .iter()
        .map(|intent| {
            let text = match intent.followup_parent_id() {
                Some(parent) => format!("{} (-> #{})", truncate(intent.raw_text(), 40), parent),
                None => truncate(intent.raw_text(), 48),
            };
            vec![
                (intent.id.to_string(), None),
                (intent.channel.to_string(), None),
                (intent.status.to_string(), Some(status_color(intent.status))),
                (text, None),
                (
                    truncate(intent.status_reason.as_deref().unwrap_or("-"), 60),
                    None,
                ),
                (format_timestamp(intent.received_at), Some(Color::DarkGrey)),
            ]
        })
        .collect();
    print_table_colored(
        &["ID", "CHANNEL", "STATUS", "TEXT", "REASON", "RECEIVED"],
        rows,
    );
}

/// Key/value view of a single intent.
pub fn print_intent_detail(intent: &Intent) {
    let mut rows = vec![
        ("ID", intent.id.to_string()),
        ("User", intent.user_id.to_string()),
        ("Channel", intent.channel.to_string()),
        ("Status", intent.status.to_string()),
        ("Text", intent.raw_text().to_string()),
        ("Correlation key", intent.correlation_key().to_string()),
        ("Received", format_timestamp(intent.received_at)),
        ("Attempts", intent.processing_attempts.to_string()),
    ];
    if let Some(label) = &intent.detected_intent {
        let confidence = intent.intent_confidence.unwrap_or_default();
        rows.push(("Intent", format!("{} ({:.2})", label, confidence)));
    }
    if let Some(reason) = &intent.status_reason {
        rows.push(("Reason", reason.clone()));
    }
    if let Some(fields) = intent.missing_fields.as_ref().filter(|f| !f.is_empty()) {
        rows.push(("Missing", fields.join(", ")));
    }
    if let Some(at) = intent.last_processed_at {
        rows.push(("Last attempt", format_timestamp(at)));
    }
    if let Some(parent) = intent.followup_parent_id() {
        rows.push(("Follow-up of", format!("#{}", parent)));
    }

    let rows = rows
        .into_iter()
        .map(|(key, value)| {
            let color = (key == "Status").then(|| status_color(intent.status));
            vec![(key.to_string(), Some(Color::Cyan)), (value, color)]
        })
        .collect();
    print_table_colored(&["FIELD", "VALUE"], rows);
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
