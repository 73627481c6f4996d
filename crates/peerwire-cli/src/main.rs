//! Peerwire CLI
//!
//! Nearby-peer sessions with typed events

mod config;
mod demo;
mod progress;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use config::Config;
use demo::DemoOptions;

/// Peerwire - discover nearby peers and exchange events
#[derive(Parser)]
#[command(name = "peerwire")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run several in-process peers and broadcast one event
    Demo {
        /// Number of peers
        #[arg(short, long, default_value_t = 2)]
        peers: usize,

        /// Service type (defaults to the configured one)
        #[arg(short, long)]
        service: Option<String>,

        /// Event name to broadcast
        #[arg(short, long, default_value = "hello")]
        event: String,

        /// Text payload to attach
        #[arg(long)]
        payload: Option<String>,

        /// File the first peer sends to every connected peer
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Seconds to wait for sessions and deliveries
        #[arg(long, default_value_t = 5)]
        wait: u64,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    // `config` subcommands work without a valid file
    if let Commands::Config { action } = &cli.command {
        return run_config(action, &config_path);
    }

    // Load configuration
    let config = if config_path.exists() {
        Config::load(&config_path)?
    } else if config_path == Config::default_path() {
        Config::load_or_default()?
    } else {
        Config::load(&config_path)? // Will fail with proper error
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    // Validate configuration
    config.validate()?;

    if let Commands::Demo {
        peers,
        service,
        event,
        payload,
        file,
        wait,
    } = cli.command
    {
        run_demo(
            &config,
            DemoOptions {
                peers,
                service,
                event,
                payload,
                file,
                wait: Duration::from_secs(wait),
            },
        )
        .await?;
    }

    Ok(())
}

fn run_config(action: &ConfigAction, path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => {
            let config = if path.exists() {
                Config::load(path)?
            } else {
                Config::default()
            };
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save(path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

async fn run_demo(config: &Config, options: DemoOptions) -> anyhow::Result<()> {
    tracing::info!(
        "Starting demo with {} peers on '{}'",
        options.peers,
        options
            .service
            .as_deref()
            .unwrap_or(&config.discovery.service_type)
    );

    let report = demo::run(config, options).await?;

    println!();
    println!("Connections:");
    for (peer, count) in &report.connections {
        println!("  {peer}: {count} peer(s)");
    }

    println!("Events received:");
    if report.received.is_empty() {
        println!("  (none)");
    }
    for line in &report.received {
        println!("  {line}");
    }

    if !report.resources.is_empty() {
        println!("Resources received:");
        for line in &report.resources {
            println!("  {line}");
        }
    }

    Ok(())
}
