//! CLI parser and dispatch.

mod check;
mod clear_fail;
mod poll;
mod run;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use inbound::config::Config;
use inbound::endpoint::EndpointContext;
use inbound::process::CommandSink;

#[derive(Parser)]
#[command(name = "inbound")]
#[command(about = "Poll directories and consume RabbitMQ queues into command sequences")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "INBOUND_CONFIG")]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run endpoints until interrupted
    Run {
        /// Endpoint names (default: all configured endpoints)
        endpoints: Vec<String>,
    },

    /// Run a single poll cycle of a file endpoint
    Poll {
        /// Endpoint name
        endpoint: String,
    },

    /// Validate the configuration and list endpoints
    Check,

    /// Clear the fail record of a file so it is picked up again
    ClearFail {
        /// File whose fail record should be removed
        path: PathBuf,
        /// Also remove the file's lock marker
        #[arg(long)]
        unlock: bool,
    },
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from_path(path).await?
        }
        None => Config::load().await?,
    };
    if let Some(ref source) = config.source_path {
        tracing::debug!("Loaded config from {}", source.display());
    }
    Ok(config)
}

/// Directory relative container paths are resolved against.
fn base_dir(config: &Config, use_cwd: bool) -> PathBuf {
    let cwd = || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if use_cwd {
        cwd()
    } else {
        config.base_dir().unwrap_or_else(cwd)
    }
}

fn context(config: &Config, use_cwd: bool, cancel: CancellationToken) -> EndpointContext {
    let sink = Arc::new(CommandSink::new(config.sequences.clone()));
    EndpointContext::from_config(config, base_dir(config, use_cwd), sink, cancel)
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run { endpoints } => {
            let config = load_config(config_path).await?;
            let ctx = context(&config, cli.cwd, CancellationToken::new());
            run::cmd_run(&config, &ctx, &endpoints).await
        }
        Commands::Poll { endpoint } => {
            let config = load_config(config_path).await?;
            let ctx = context(&config, cli.cwd, CancellationToken::new());
            poll::cmd_poll(&config, &ctx, &endpoint).await
        }
        Commands::Check => {
            let config = load_config(config_path).await?;
            check::cmd_check(&config)
        }
        Commands::ClearFail { path, unlock } => clear_fail::cmd_clear_fail(&path, unlock).await,
    }
}
