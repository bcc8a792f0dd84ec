use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod context;
mod settings;

use anchora_mongo::MongoConnector;
use context::AppContext;
use settings::Settings;

#[derive(Parser)]
#[command(name = "anchora")]
#[command(version, about = "Anchora scheduled MongoDB backup daemon", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Path to a configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the backup daemon
    Run,

    /// Load and validate the configuration, then exit
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("anchora={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Validate => {
            println!("configuration ok");
            Ok(())
        }
        Commands::Run => run(settings).await,
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let context = AppContext::build(&settings, Arc::new(MongoConnector::new()))?;
    let loop_handle = context.start().await;
    info!("anchora daemon running");

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");

    context.shutdown().await;
    let _ = loop_handle.await;
    Ok(())
}
