//! econfctl - operator CLI for the econfmanager parameter store
//!
//! Opens the same primary/save databases as the device application and
//! lists, reads, edits, watches and exports parameters.

mod commands;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use econfmanager::{DataSource, FileSource, Interface};
use tracing::debug;

use crate::config::CtlConfig;

#[derive(Parser)]
#[command(name = "econfctl")]
#[command(about = "Inspect and edit econfmanager parameter stores")]
#[command(long_about = "Inspect and edit econfmanager parameter stores

Examples:
  econfctl list --group device
  econfctl get image_acquisition@exposure
  econfctl set DEVICE_SERIAL_NUMBER SN-2024-0042
  econfctl set device@calibration_data 0xCAFE
  econfctl watch --source /run/camera/hw.json --interval-ms 500
  econfctl export --output values.json --db factory.db
  econfctl reset --yes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML configuration file
    #[arg(short, long, global = true, env = "ECONFCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Primary database (overrides config)
    #[arg(long, global = true)]
    primary_db: Option<PathBuf>,

    /// Save database (overrides config)
    #[arg(long, global = true)]
    save_db: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List parameters with their current values
    List {
        /// Only parameters of this group
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Print parameter values
    Get {
        /// Parameter names (`group@field` or constant name)
        #[arg(required = true)]
        names: Vec<String>,

        /// Print a JSON object
        #[arg(long)]
        json: bool,
    },

    /// Set and save a parameter value
    Set {
        /// Parameter name
        name: String,

        /// New value, parsed with the parameter's type
        value: String,

        /// Parse the value as JSON instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Show a parameter's metadata and state
    Describe {
        /// Parameter name
        name: String,
    },

    /// Print value changes until interrupted
    Watch {
        /// Parameters to watch (default: all readable)
        names: Vec<String>,

        /// JSON file to poll as the device data source
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Poll or reload interval (default: configured poll interval)
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },

    /// Drop all saved values and return to factory state
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Dump all readable values as JSON
    Export {
        /// Write JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the values as a snapshot database usable as a primary db
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let mut config = CtlConfig::load(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    config.logging.ansi = !cli.no_color;
    common::logging::init_with_config(&config.logging)?;

    if let Some(path) = cli.primary_db {
        config.econf.primary_db_path = path;
    }
    if let Some(path) = cli.save_db {
        config.econf.save_db_path = path;
    }
    let econf = config.econf.clone().validated()?;
    debug!("Using {:?}", econf);

    let source: Option<Arc<dyn DataSource>> = match &cli.command {
        Commands::Watch { source, .. } => source
            .clone()
            .or_else(|| config.source.clone())
            .map(|path| Arc::new(FileSource::new(path)) as Arc<dyn DataSource>),
        _ => None,
    };

    let iface = Interface::from_config(&econf, source)
        .await
        .with_context(|| {
            format!(
                "opening {} / {}",
                econf.primary_db_path.display(),
                econf.save_db_path.display()
            )
        })?;

    let result = match &cli.command {
        Commands::List { group } => commands::list(&iface, group.as_deref()),
        Commands::Get { names, json } => commands::get(&iface, names, *json),
        Commands::Set { name, value, json } => commands::set(&iface, name, value, *json).await,
        Commands::Describe { name } => commands::describe(&iface, name),
        Commands::Watch {
            names, interval_ms, ..
        } => {
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| econf.poll_interval());
            if interval.is_zero() {
                Err(econfmanager::EconfError::InvalidInterval(0).into())
            } else {
                commands::watch(&iface, names, interval).await
            }
        },
        Commands::Reset { yes } => commands::reset(&iface, *yes).await,
        Commands::Export { output, db } => {
            commands::export(&iface, output.as_deref(), db.as_deref()).await
        },
    };

    let closed = iface.shutdown().await;
    result?;
    closed?;
    Ok(())
}
