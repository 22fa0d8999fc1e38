//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Color a decision or health status keyword
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "ready" | "fresh" | "hold" => status.green().to_string(),
        "degraded" | "stale" | "warning" => status.yellow().to_string(),
        "unhealthy" | "unknown" | "failed" => status.red().to_string(),
        "replica_up" | "node_up" => status.cyan().to_string(),
        "replica_down" | "node_down" => status.blue().to_string(),
        _ => status.to_string(),
    }
}

/// Color the composite score against the scale thresholds
pub fn color_score(score: f64) -> String {
    let formatted = format!("{score:.2}");
    if score >= 2.0 {
        formatted.red().bold().to_string()
    } else if score >= 1.2 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

/// Render success/failure as a compact marker
pub fn mark(success: bool) -> String {
    if success {
        "✓".green().to_string()
    } else {
        "✗".red().to_string()
    }
}

/// Format a unix timestamp for display
pub fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_render_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00");
    }

    #[test]
    fn unknown_status_passes_through() {
        assert_eq!(color_status("whatever"), "whatever");
    }
}
