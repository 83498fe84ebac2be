//! Models command implementation.

use super::CommandResult;
use daptin_client::DaptinClient;
use serde::Serialize;

/// One loaded table.
#[derive(Debug, Serialize)]
pub struct TableSummary {
    /// Table name.
    pub table_name: String,
    /// Number of registered fields; absent for join tables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<usize>,
    /// Number of actions on the table.
    pub actions: usize,
    /// Whether state machines are enabled.
    pub state_machines: bool,
}

/// Loads the schema and prints every table.
pub async fn run(client: &DaptinClient, force: bool, format: &str) -> CommandResult {
    client.worlds().init().await;
    let worlds = client.worlds().load_models(force).await?;

    let tables: Vec<TableSummary> = worlds
        .keys()
        .map(|name| TableSummary {
            table_name: name.clone(),
            fields: client.registry().definition(name).map(|f| f.len()),
            actions: client.actions().actions(name).map_or(0, |a| a.len()),
            state_machines: client.worlds().is_state_machine_enabled(name),
        })
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&tables)?),
        _ => {
            println!("{:<40} {:>7} {:>8}  state machines", "TABLE", "FIELDS", "ACTIONS");
            for table in &tables {
                let fields = table
                    .fields
                    .map_or_else(|| "join".to_string(), |n| n.to_string());
                println!(
                    "{:<40} {:>7} {:>8}  {}",
                    table.table_name,
                    fields,
                    table.actions,
                    if table.state_machines { "yes" } else { "no" }
                );
            }
            println!();
            println!(
                "{} tables, {} system actions",
                tables.len(),
                client.worlds().system_actions().len()
            );
        }
    }
    Ok(())
}
