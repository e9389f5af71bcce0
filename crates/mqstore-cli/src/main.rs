//! mqstore CLI
//!
//! Command-line interface for inspecting broker store files

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use mqstore_storage::{PersistentStore, StoreConfig};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "mqstore")]
#[command(about = "Inspect MQTT broker persistent stores", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "MQSTORE_LOG")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the sessions and retained topics held in a store file
    Inspect {
        /// Path to the store file
        #[arg(long)]
        path: PathBuf,
    },
    /// Load and validate a store configuration file
    CheckConfig {
        /// JSON, YAML or TOML configuration file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Inspect { path } => inspect(path).await?,
        Commands::CheckConfig { file } => {
            let config = StoreConfig::from_file(&file)
                .with_context(|| format!("Invalid configuration {}", file.display()))?;
            let mode = if config.is_in_memory() {
                "in-memory".to_string()
            } else {
                format!("file {}", config.store_path)
            };
            println!(
                "OK: {} store, autosave every {}s",
                mode, config.autosave_interval_seconds
            );
        }
    }

    Ok(())
}

async fn inspect(path: PathBuf) -> anyhow::Result<()> {
    // Opening a missing path would create an empty store
    if !path.is_file() {
        bail!("No store file at {}", path.display());
    }

    let store = PersistentStore::new(StoreConfig::with_path(path.to_string_lossy().into_owned()));
    store.init().await?;

    let result = print_contents(&store);
    store.close().await;
    result
}

fn print_contents(store: &PersistentStore) -> anyhow::Result<()> {
    if let Some(header) = store_header(store) {
        println!("{header}");
    }

    let sessions = store.sessions_store()?;
    let messages = store.messages_store()?;

    let session_ids = sessions.session_ids()?;
    println!("Sessions ({}):", session_ids.len());
    for client_id in &session_ids {
        let clean = sessions
            .session(client_id)?
            .map(|s| s.clean_session)
            .unwrap_or_default();
        let pending = sessions.pending_messages(client_id)?.len();
        println!("  {client_id}  clean_session={clean}  pending={pending}");
    }

    let topics = messages.retained_topics()?;
    println!("Retained topics ({}):", topics.len());
    for topic in &topics {
        if let Some(message) = messages.retained(topic)? {
            println!(
                "  {topic}  qos={}  bytes={}",
                message.qos.as_u8(),
                message.payload.len()
            );
        }
    }

    Ok(())
}

/// Where the store lives and how the engine found it, once initialized
fn store_header(store: &PersistentStore) -> Option<String> {
    let provenance = store.provenance()?;
    let location = if store.config().is_in_memory() {
        "memory"
    } else {
        store.config().store_path.as_str()
    };
    Some(format!("Store: {location} ({})", provenance.label()))
}
