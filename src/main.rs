use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cla_assistant::config::ClaConfig;
use cla_assistant::logging::init_tracing;

mod cmd;

#[derive(Parser)]
#[command(name = "cla-assistant")]
#[command(version, about = "Contributor License Agreement enforcement for GitHub pull requests")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file (defaults to ./cla.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP service
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Path to the SQLite database
        #[arg(long)]
        db_path: Option<PathBuf>,
        /// Public address used in status links and comments
        #[arg(long)]
        base_url: Option<String>,
        /// Bind on all interfaces and allow cross-origin requests
        #[arg(long)]
        dev: bool,
    },
    /// Create the database schema and exit
    InitDb {
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = ClaConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging, cli.verbose);

    match cli.command {
        Commands::Serve {
            host,
            port,
            db_path,
            base_url,
            dev,
        } => {
            let overrides = cmd::serve::ServeOverrides {
                host,
                port,
                db_path,
                base_url,
                dev,
            };
            cmd::cmd_serve(&config, overrides).await?;
        }
        Commands::InitDb { db_path } => {
            let db_path = db_path.unwrap_or_else(|| config.database.path.clone());
            cmd::cmd_init_db(&db_path)?;
        }
        Commands::Config => {
            cmd::cmd_config(&config)?;
        }
    }

    Ok(())
}
