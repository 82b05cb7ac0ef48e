use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use ripper::config::{resolve_config_path, RipConfig};
use ripper::disc::DiscMonitor;
use ripper::queue::load_queue;
use ripper::runner::RunSession;
use ripper::status::LogObserver;

/// Queue-driven optical disc ripper
#[derive(Parser, Debug)]
#[command(name = "ripq", author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the queue: wait for each disc, rip it, stage the main feature
    Run {
        /// Path to the queue JSON file
        #[arg(long)]
        queue: PathBuf,
        /// Path to configuration file (JSON or TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate config paths and external tools without touching a disc
    Check {
        /// Path to configuration file (JSON or TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show the resolved config path and where it was discovered
    ConfigWhere {
        /// Path to configuration file (JSON or TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Best-effort eject of the configured drive
    Eject {
        /// Path to configuration file (JSON or TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG overrides; default to info level
    env_logger::Builder::from_default_env()
        .format_timestamp_secs()
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Run { queue, config } => cmd_run(&queue, config.as_deref()).await,
        Commands::Check { config } => cmd_check(config.as_deref()),
        Commands::ConfigWhere { config } => cmd_config_where(config.as_deref()),
        Commands::Eject { config } => cmd_eject(config.as_deref()).await,
    }
}

async fn cmd_run(queue_path: &std::path::Path, config_path: Option<&std::path::Path>) -> Result<()> {
    let cfg = RipConfig::load_config(config_path).context("Failed to load configuration")?;
    let queue = load_queue(queue_path)?;
    info!(
        "Loaded {} queue item(s) from {}",
        queue.len(),
        queue_path.display()
    );

    let session = Arc::new(RunSession::new());

    // first ctrl-c requests a cooperative stop at the next poll boundary
    let stop = session.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Stop requested; the run ends at the next wait boundary.");
            stop.set();
        }
    });

    let summary = session.run(&cfg, &queue, &LogObserver).await?;
    info!(
        "Run finished: {} completed, {} skipped{}",
        summary.completed,
        summary.skipped,
        if summary.stopped { ", stopped early" } else { "" }
    );
    Ok(())
}

fn cmd_check(config_path: Option<&std::path::Path>) -> Result<()> {
    match resolve_config_path(config_path) {
        Some((path, source)) => println!("Config: {} ({})", path.display(), source),
        None => println!("Config: built-in defaults (no config file found)"),
    }

    let cfg = RipConfig::load_config(config_path).context("Failed to load configuration")?;
    let report = cfg.validate();

    for warning in &report.warnings {
        println!("WARNING: {}", warning);
    }
    for error in &report.errors {
        println!("ERROR: {}", error);
    }
    if report.is_ok() {
        println!("OK: configuration looks usable");
        Ok(())
    } else {
        bail!("configuration has {} error(s)", report.errors.len());
    }
}

fn cmd_config_where(config_path: Option<&std::path::Path>) -> Result<()> {
    match resolve_config_path(config_path) {
        Some((path, source)) => {
            println!("{} ({})", path.display(), source);
            Ok(())
        }
        None => bail!("no config file found; create ripq.json or set RIPQ_CONFIG"),
    }
}

async fn cmd_eject(config_path: Option<&std::path::Path>) -> Result<()> {
    let cfg = RipConfig::load_config(config_path).context("Failed to load configuration")?;
    let monitor = DiscMonitor::from_config(&cfg);
    if monitor.eject().await {
        info!("Eject requested successfully");
    } else {
        warn!("Eject could not be confirmed; check the drive");
    }
    Ok(())
}
