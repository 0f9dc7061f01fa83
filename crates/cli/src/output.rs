//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Parse the `default_format` value from the config file
    pub fn from_config(value: Option<&str>) -> Option<Self> {
        match value? {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

/// Print a table from a list of items
pub fn print_table<T: Tabled>(items: &[T], empty_message: &str) {
    if items.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    let table = Table::new(items).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

pub fn format_percent(percent: Option<f64>) -> String {
    match percent {
        Some(p) => format!("{:.1}%", p),
        None => "-".to_string(),
    }
}

/// Color a usage percentage against the node's thresholds
pub fn color_usage(percent: Option<f64>, high: f64, low: f64) -> String {
    let formatted = format_percent(percent);
    match percent {
        Some(p) if p >= high => formatted.red().to_string(),
        Some(p) if p > low => formatted.yellow().to_string(),
        Some(_) => formatted.green().to_string(),
        None => formatted,
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "no_pressure" | "relieved" | "healthy" => status.green().to_string(),
        "partial" | "degraded" | "unknown" | "skipped" => status.yellow().to_string(),
        "disk_pressure" | "unresolved" | "unhealthy" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Human label for an event kind
pub fn event_label(kind: &str) -> String {
    match kind {
        "image_deleted" => "image deleted".to_string(),
        "container_removed" => "container removed".to_string(),
        "pod_evicted" => "pod evicted".red().to_string(),
        "taint_added" => "taint added".yellow().to_string(),
        "taint_removed" => "taint removed".green().to_string(),
        "eviction_cycle" => "eviction cycle".red().bold().to_string(),
        "pressure_unresolved" => "unresolved".red().bold().to_string(),
        "sample_failed" => "sample failed".yellow().to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(600 * 1024 * 1024), "600.00Mi");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00Gi");
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(Some(87.04)), "87.0%");
        assert_eq!(format_percent(None), "-");
    }

    #[test]
    fn test_format_from_config() {
        assert_eq!(OutputFormat::from_config(Some("json")), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_config(Some("yaml")), None);
        assert_eq!(OutputFormat::from_config(None), None);
    }
}
