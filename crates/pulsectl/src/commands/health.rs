//! Daemon health command

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, HealthReport, ReadinessReport};
use crate::output::{color_status, format_timestamp, OutputFormat};

/// Show daemon component health and readiness
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: HealthReport = client.get_lenient("healthz").await?;
    let readiness: ReadinessReport = client.get_lenient("readyz").await?;

    match format {
        OutputFormat::Json => {
            let combined = serde_json::json!({
                "health": health,
                "readiness": readiness,
            });
            println!("{}", serde_json::to_string_pretty(&combined)?);
        }
        OutputFormat::Table => {
            println!("{}", "Daemon Health".bold());
            println!("{}", "=".repeat(50));
            println!("Overall:   {}", color_status(&health.status));
            let ready = if readiness.ready {
                "ready".green().to_string()
            } else {
                format!(
                    "not ready ({})",
                    readiness.reason.as_deref().unwrap_or("unknown")
                )
                .red()
                .to_string()
            };
            println!("Readiness: {}", ready);
            println!();

            let mut names: Vec<&String> = health.components.keys().collect();
            names.sort();
            for name in names {
                let component = &health.components[name];
                let mut line = format!(
                    "  {:<16} {} (checked {})",
                    name,
                    color_status(&component.status),
                    format_timestamp(component.last_check_timestamp)
                );
                if let Some(message) = &component.message {
                    line.push_str(&format!(": {message}"));
                }
                println!("{line}");
            }
        }
    }

    Ok(())
}
