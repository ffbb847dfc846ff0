//! # loopguard CLI
//!
//! Inspect and reset the loop detection data shared by gateway workers.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use loopguard_config::logging::{init_logging, LogLevel};
use loopguard_config::Config;
use loopguard_core::LoopDetector;

/// Loop detection administration
#[derive(Parser)]
#[command(name = "loopguard")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the per-device documents
    #[arg(long = "state-dir", global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wipe loop detection data of all devices, one device, or one user on a device
    Clear {
        #[arg(short, long)]
        device: Option<String>,

        /// Requires --device
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Print the stored data of one user on one device
    Show {
        #[arg(short, long)]
        device: String,

        #[arg(short, long)]
        user: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file locations
    Path,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(state_dir) = cli.state_dir {
        config.store.state_dir = state_dir;
    }
    init_logging(LogLevel::parse(&config.logging.level));
    tracing::debug!(state_dir = %config.store.state_dir.display(), "Using state directory");

    match cli.command {
        Commands::Clear { device, user } => cmd_clear(&config, user.as_deref(), device.as_deref()),
        Commands::Show { device, user } => cmd_show(&config, &user, &device),
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                print!("{}", config.to_toml());
                Ok(())
            }
            ConfigCommands::Path => {
                match Config::global_config_path() {
                    Some(path) => println!("Global:  {}", path.display()),
                    None => println!("Global:  (no home directory)"),
                }
                println!("Project: {}", Config::project_config_path().display());
                Ok(())
            }
        },
    }
}

fn cmd_clear(config: &Config, user: Option<&str>, device: Option<&str>) -> Result<()> {
    let user = user.filter(|u| !u.is_empty());
    let device = device.filter(|d| !d.is_empty());

    let detector = LoopDetector::from_config(config);
    detector.clear_data(user, device)?;

    match (device, user) {
        (Some(device), Some(user)) => println!("Cleared loop detection data of user '{user}' on device '{device}'"),
        (Some(device), None) => println!("Cleared loop detection data of device '{device}'"),
        _ => println!("Cleared loop detection data of all devices"),
    }
    Ok(())
}

fn cmd_show(config: &Config, user: &str, device: &str) -> Result<()> {
    let detector = LoopDetector::from_config(config);
    match detector.load_cached_data(user, device)? {
        Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
        None => println!("no loop detection data for user '{user}' on device '{device}'"),
    }
    Ok(())
}
