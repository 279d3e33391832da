//! SignCTRL
//!
//! Runs one remote-signer instance of a failover set. Every instance holds
//! the same validator key; only the instance at rank 1 signs.
//!
//! # Usage
//!
//! ```bash
//! # Write a default config and create the keys
//! signctrl init --config-dir ~/.signctrl
//!
//! # Run the instance
//! signctrl start --config-dir ~/.signctrl
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use signctrl_connector::config::config_file_path;
use signctrl_connector::{
    config_dir, shared_rank, Config, ConnectorError, ControllerSettings, DialError, SignCtrl,
    SocketDialer, Termination,
};
use signctrl_protocol::crypto::load_or_create_keypair;
use signctrl_protocol::{FilePrivValidator, CONN_KEY_FILE, KEY_FILE, STATE_FILE};
use signctrl_state::{load_last_rank, save_last_rank, RankController};

#[derive(Parser, Debug)]
#[command(name = "signctrl")]
#[command(version, about = "Failover controller for remote signers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the config directory with a default config and fresh keys
    Init {
        /// Config directory (defaults to $SIGNCTRL_CONFIG_DIR, then ~/.signctrl)
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
    /// Start the signer instance
    Start {
        /// Config directory (defaults to $SIGNCTRL_CONFIG_DIR, then ~/.signctrl)
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { config_dir: dir } => init(&dir.unwrap_or_else(config_dir)),
        Command::Start { config_dir: dir } => start(&dir.unwrap_or_else(config_dir)).await,
    }
}

fn init(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create config directory {}", dir.display()))?;

    let config_path = config_file_path(dir);
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        let raw = Config::default().to_toml_string()?;
        std::fs::write(&config_path, raw)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote default config to {}", config_path.display());
        println!("Set privval.chain_id before starting.");
    }

    load_or_create_keypair(&dir.join(CONN_KEY_FILE)).context("Failed to create connection key")?;
    let pv = FilePrivValidator::load_or_generate(&dir.join(KEY_FILE), &dir.join(STATE_FILE))
        .context("Failed to create validator key")?;
    println!("Validator address: {}", pv.address());
    Ok(())
}

async fn start(dir: &Path) -> Result<()> {
    let config = Config::load(dir)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let start_rank = match load_last_rank(dir).context("Failed to read last rank")? {
        Some(rank) => {
            tracing::info!(rank, "Resuming from last persisted rank");
            rank
        }
        None => config.base.start_rank,
    };
    let rank = shared_rank(RankController::new(config.base.threshold, start_rank)?);

    let signer = FilePrivValidator::load_or_generate(&dir.join(KEY_FILE), &dir.join(STATE_FILE))
        .context("Failed to load validator key")?;
    tracing::info!(address = %signer.address(), "Loaded validator key");

    let settings = ControllerSettings::from_config(&config, dir)?;

    let stop = CancellationToken::new();
    let signals = {
        let stop = stop.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            stop.cancel();
        })
    };

    let outcome = match SignCtrl::start(settings, SocketDialer, signer, rank.clone(), stop).await {
        Ok(mut running) => {
            running.quit().await;
            running.stop();
            running.wait().await
        }
        Err(ConnectorError::Dial(DialError::Cancelled)) => {
            tracing::info!("Stopped before the validator was reached");
            Ok(Termination::Stopped)
        }
        Err(e) => Err(e),
    };
    signals.abort();

    let final_rank = rank.lock().await.rank();
    match save_last_rank(dir, final_rank) {
        Ok(()) => {}
        Err(e) => tracing::error!(error = %e, rank = final_rank, "Couldn't persist last rank"),
    }

    match outcome? {
        Termination::Stopped => tracing::info!("Shut down"),
        Termination::MustShutdown => tracing::warn!(rank = final_rank, "Shut down, rank 1 can't be promoted further"),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
