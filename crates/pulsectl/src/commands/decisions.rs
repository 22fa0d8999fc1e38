//! Decision history command

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, DecisionRecord};
use crate::output::{color_status, format_timestamp, mark, print_warning, OutputFormat};

/// Row for the decision table
#[derive(Tabled)]
struct DecisionRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "From")]
    from: u32,
    #[tabled(rename = "To")]
    to: u32,
    #[tabled(rename = "OK")]
    ok: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Show recent control decisions
pub async fn show_decisions(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let mut decisions: Vec<DecisionRecord> = client.get("decisions").await?;
    decisions.truncate(limit);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&decisions)?);
        }
        OutputFormat::Table => {
            if decisions.is_empty() {
                print_warning("No decisions recorded yet");
                return Ok(());
            }

            let rows: Vec<DecisionRow> = decisions
                .iter()
                .map(|d| DecisionRow {
                    time: format_timestamp(d.ts),
                    kind: color_status(&d.kind),
                    from: d.from,
                    to: d.to,
                    ok: mark(d.success),
                    reason: d.reason.clone(),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
        }
    }

    Ok(())
}
