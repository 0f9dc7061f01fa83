//! Evict/recreate cycle command

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{print_json, print_success, print_table, print_warning, OutputFormat};

/// Cycle count at which the agent warns
const WARNING_CYCLES: u32 = 2;

#[derive(Tabled)]
struct CycleRow {
    #[tabled(rename = "Workload")]
    identity: String,
    #[tabled(rename = "Cycles")]
    cycles: String,
}

/// Show per-workload cycle counts
pub async fn show_cycles(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let counts = client.cycles().await?;

    if format == OutputFormat::Json {
        return print_json(&counts);
    }

    if counts.is_empty() {
        print_success("No workloads evicted within the cycle window");
        return Ok(());
    }

    let rows: Vec<CycleRow> = counts
        .iter()
        .map(|c| CycleRow {
            identity: c.identity.clone(),
            cycles: if c.cycles >= WARNING_CYCLES {
                c.cycles.to_string().red().bold().to_string()
            } else {
                c.cycles.to_string()
            },
        })
        .collect();
    print_table(&rows, "No workloads evicted");

    let cycling = counts.iter().filter(|c| c.cycles >= WARNING_CYCLES).count();
    if cycling > 0 {
        println!();
        print_warning(&format!(
            "{} workload(s) keep being recreated and evicted; the node cannot hold them",
            cycling
        ));
    }

    Ok(())
}
