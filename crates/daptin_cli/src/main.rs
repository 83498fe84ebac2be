//! Daptin CLI
//!
//! Command-line client for a Daptin server.
//!
//! # Commands
//!
//! - `models` - Load the server's schema and list its tables
//! - `upload` - Upload a file into an asset column
//! - `resume` - Restart a persisted resumable upload
//! - `cancel` - Forget a persisted resumable upload
//! - `sessions` - List persisted resumable uploads
//! - `action` - Invoke a server action

mod commands;

use clap::{Parser, Subcommand};
use daptin_client::{
    ClientConfig, DaptinClient, FileSessionStore, SessionStore, StaticToken, StoredToken,
    TokenProvider,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Daptin command-line client.
#[derive(Parser)]
#[command(name = "daptin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server endpoint
    #[arg(global = true, short, long, env = "DAPTIN_ENDPOINT", default_value = "http://localhost:6336")]
    endpoint: String,

    /// Bearer token; defaults to the token stored by a previous signin
    #[arg(global = true, short, long, env = "DAPTIN_TOKEN")]
    token: Option<String>,

    /// Directory holding the stored token and resumable sessions
    #[arg(global = true, long, default_value = ".daptin")]
    state_dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the server's schema and list its tables
    Models {
        /// Refetch every descriptor
        #[arg(short, long)]
        force: bool,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Upload a file into an asset column
    Upload {
        /// Resource type
        type_name: String,
        /// Resource reference id
        resource_id: String,
        /// Asset column
        column_name: String,
        /// File to upload
        path: PathBuf,
        /// File name stored on the server
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Restart a persisted resumable upload
    Resume {
        /// Upload session id
        upload_id: String,
        /// File to upload
        path: PathBuf,
    },

    /// Forget a persisted resumable upload
    Cancel {
        /// Upload session id
        upload_id: String,
    },

    /// List persisted resumable uploads
    Sessions,

    /// Invoke a server action
    Action {
        /// Type the action is defined on
        type_name: String,
        /// Action name
        action_name: String,
        /// Action attributes as a JSON object
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("Daptin CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let store = Arc::new(FileSessionStore::open(&cli.state_dir)?);
    let tokens: Arc<dyn TokenProvider> = match cli.token {
        Some(token) => Arc::new(StaticToken::new(token)),
        None => Arc::new(StoredToken::new(store.clone())),
    };
    let client = DaptinClient::new(ClientConfig::new(cli.endpoint), tokens, store.clone())?;

    match cli.command {
        Commands::Models { force, format } => {
            commands::models::run(&client, force, &format).await?;
        }
        Commands::Upload {
            type_name,
            resource_id,
            column_name,
            path,
            name,
        } => {
            commands::upload::run(
                &client,
                &type_name,
                &resource_id,
                &column_name,
                &path,
                name.as_deref(),
            )
            .await?;
        }
        Commands::Resume { upload_id, path } => {
            commands::upload::resume(&client, &upload_id, &path).await?;
        }
        Commands::Cancel { upload_id } => {
            commands::upload::cancel(&client, &upload_id).await?;
        }
        Commands::Sessions => commands::upload::sessions(&client)?,
        Commands::Action {
            type_name,
            action_name,
            data,
        } => {
            let store: &dyn SessionStore = store.as_ref();
            commands::action::run(&client, store, &type_name, &action_name, data.as_deref())
                .await?;
        }
        Commands::Version => {}
    }

    Ok(())
}
