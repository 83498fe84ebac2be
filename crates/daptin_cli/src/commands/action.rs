//! Action command implementation.

use super::CommandResult;
use daptin_client::protocol::ClientInstruction;
use daptin_client::{DaptinClient, SessionStore};
use serde_json::Value;
use std::path::Path;

/// Invokes a server action and applies the instructions it returns.
///
/// `client.store.set` values are persisted into `store`, so a `signin`
/// action leaves its token for later commands. Downloads land in the
/// current directory.
pub async fn run(
    client: &DaptinClient,
    store: &dyn SessionStore,
    type_name: &str,
    action_name: &str,
    data: Option<&str>,
) -> CommandResult {
    let attributes: Value = match data {
        Some(json) => serde_json::from_str(json)?,
        None => Value::Object(Default::default()),
    };

    let instructions = client
        .actions()
        .do_action(type_name, action_name, attributes)
        .await?;

    for instruction in &instructions {
        match instruction {
            ClientInstruction::Notify(notification) => {
                println!("[{}] {}: {}", notification.kind, notification.title, notification.message)
            }
            ClientInstruction::StoreSet { key, value } => {
                store.set(key, value)?;
                println!("Stored {key}");
            }
            ClientInstruction::FileDownload(file) => {
                let name = Path::new(&file.name)
                    .file_name()
                    .ok_or("download has no file name")?;
                std::fs::write(name, file.decode_content()?)?;
                println!("Saved {}", Path::new(name).display());
            }
            ClientInstruction::Redirect { location, .. } => println!("Redirect to {location}"),
            ClientInstruction::CookieSet { key, .. } => println!("Cookie {key} set"),
            ClientInstruction::Other { response_type, attributes } => {
                println!("{response_type}: {attributes}")
            }
        }
    }
    if instructions.is_empty() {
        println!("Action {type_name}/{action_name} returned nothing");
    }
    Ok(())
}
