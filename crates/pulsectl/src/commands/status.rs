//! Control-plane status command

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, Status};
use crate::output::{color_score, color_status, format_timestamp, print_warning, OutputFormat};

/// Show the latest orchestrator snapshot
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: Status = client.get("statusz").await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Table => {
            println!("{}", "Pulse Status".bold());
            println!("{}", "=".repeat(50));
            println!("As of:        {}", format_timestamp(status.generated_at));
            println!("Samples:      {}", status.window_samples);
            if let Some(replicas) = status.current_replicas {
                println!("Replicas:     {}", replicas.to_string().cyan());
            }

            match &status.score {
                Some(score) => {
                    println!(
                        "Score:        {} (cpu {:.2}, lat {:.2}, err {:.2}) → {}",
                        color_score(score.composite),
                        score.cpu_norm,
                        score.latency_norm,
                        score.error_norm,
                        color_status(&score.verdict)
                    );
                }
                None => println!("Score:        {}", "unknown".red()),
            }
            if let Some(spike) = &status.spike {
                let marker = if spike.spiking {
                    "SPIKING".red().bold().to_string()
                } else {
                    "steady".green().to_string()
                };
                println!(
                    "Spike:        {} (recent {:.0}, baseline {:.0}, ratio {:.2})",
                    marker, spike.recent_mean, spike.baseline_mean, spike.ratio
                );
            }

            match &status.backlog {
                Some(backlog) => {
                    println!(
                        "Backlog:      {} (size {}, oldest {:.0}s)",
                        color_status(&backlog.freshness),
                        backlog.size.unwrap_or(0),
                        backlog.oldest_age_s.unwrap_or(0.0),
                    );
                }
                None => println!("Backlog:      {}", "unknown".red()),
            }
            if let Some(nodes) = &status.node_health {
                println!(
                    "Nodes:        {}/{} ready, capacity loss {:.0}%",
                    nodes.ready,
                    nodes.total,
                    nodes.capacity_loss * 100.0
                );
            }

            let active: Vec<String> = status
                .cooldowns_remaining
                .iter()
                .filter(|(_, remaining)| **remaining > 0)
                .map(|(scope, remaining)| format!("{scope} {remaining}s"))
                .collect();
            if !active.is_empty() {
                println!("Cooldowns:    {}", active.join(", "));
            }

            if status.unsafe_to_optimize {
                print_warning("Memory optimizer disabled after repeated OOM escalations");
            }
            if let Some(failure) = &status.last_failure {
                print_warning(&format!(
                    "last action: failed — {} ({})",
                    failure.reason,
                    format_timestamp(failure.ts)
                ));
            }
        }
    }

    Ok(())
}
