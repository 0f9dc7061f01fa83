//! Node status command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, color_usage, format_bytes, print_json, print_table, print_warning,
    OutputFormat,
};

/// Row for the component health table
#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// Show the agent's view of the node
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;
    let health = client.health().await?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "status": status,
            "health": health,
        }));
    }

    println!("{}", "Node Disk Pressure".bold());
    println!("{}", "=".repeat(60));
    println!("Node:        {}", status.node_name.cyan());
    println!("Condition:   {}", color_status(&status.condition));
    println!(
        "Usage:       {} (high {:.0}%, low {:.0}%)",
        color_usage(
            status.usage_percent,
            status.high_threshold_percent,
            status.low_threshold_percent
        ),
        status.high_threshold_percent,
        status.low_threshold_percent
    );
    if let (Some(used), Some(capacity)) = (status.used_bytes, status.capacity_bytes) {
        println!("Space:       {} / {}", format_bytes(used), format_bytes(capacity));
    }
    println!(
        "Taint:       {}",
        if status.tainted {
            "disk-pressure".red().to_string()
        } else {
            "none".green().to_string()
        }
    );
    println!(
        "Last tick:   {} ({})",
        status.last_tick_at.as_deref().unwrap_or("never"),
        status
            .last_outcome
            .as_deref()
            .map(color_status)
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Ticks:       {}", status.ticks);
    println!();

    if status.unresolved_ticks > 0 {
        print_warning(&format!(
            "Disk pressure unresolved for {} tick(s); nothing left to reclaim",
            status.unresolved_ticks
        ));
        println!();
    }

    let rows: Vec<ComponentRow> = health
        .components
        .iter()
        .map(|(name, component)| ComponentRow {
            name: name.clone(),
            status: color_status(&component.status),
            message: component.message.clone().unwrap_or_default(),
        })
        .collect();
    print_table(&rows, "No components registered");

    Ok(())
}
