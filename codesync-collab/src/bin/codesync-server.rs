//! CodeSync collaboration server binary.

use std::path::PathBuf;

use clap::Parser;
use codesync_collab::{ServerConfig, SyncServer};

/// Server command line arguments.
#[derive(Parser, Debug)]
#[command(name = "codesync-server")]
#[command(about = "Real-time collaborative code editing server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to bind to (overrides the config file)
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// RocksDB directory (overrides the config file)
    #[arg(short, long, value_name = "PATH")]
    storage: Option<PathBuf>,

    /// Language of rooms with no stored state
    #[arg(long, value_name = "LANG")]
    default_language: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(storage) = args.storage {
        config.storage_path = Some(storage);
    }
    if let Some(language) = args.default_language {
        config.default_language = language;
    }

    match &config.storage_path {
        Some(path) => log::info!("Persisting rooms to {}", path.display()),
        None => log::warn!("No storage path configured; room state is lost on restart"),
    }

    let server = SyncServer::new(config)?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    Ok(())
}
