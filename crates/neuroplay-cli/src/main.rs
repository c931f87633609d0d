//! # neuroplay-cli
//!
//! Command-line explorer for the NeuroplayPro device hub.
//! Inspects the hub, lists devices, streams grabbed data, follows
//! meditation/concentration, records to EDF/NPD and changes filters.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod app;
mod commands;

use neuroplay_pro::{GrabKind, HubConfig};

/// Command-line explorer for the NeuroplayPro device hub.
#[derive(Parser)]
#[command(name = "neuroplay-cli", version, about)]
struct Cli {
    /// Path to neuroplay.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Hub WebSocket URL override
    #[arg(long, global = true)]
    url: Option<String>,

    /// Enable verbose logging (set RUST_LOG for fine-grained control)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hub version, favorite device, filters and the command catalog
    Info {
        /// Print the hub's command list
        #[arg(long)]
        commands: bool,
    },

    /// Wait for discovery and list every device found
    Devices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Start a device and print grabbed data once per second
    Stream {
        /// Device name (default: the running device or the first found)
        #[arg(short, long)]
        device: Option<String>,

        /// Channel count to start the device with
        #[arg(long)]
        channels: Option<u32>,

        /// What to grab
        #[arg(short, long, value_enum, default_value_t = StreamKind::Filtered)]
        kind: StreamKind,

        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Grab polling period in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Follow meditation and concentration of a device
    Watch {
        #[arg(short, long)]
        device: Option<String>,

        /// Request period in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },

    /// Record for a while and save the returned EDF/NPD files
    Record {
        #[arg(short, long)]
        device: Option<String>,

        #[arg(short, long, default_value_t = 10)]
        seconds: u64,

        /// Directory the files are written to
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Show or change hub filters
    Filters {
        /// Low-pass cutoff in Hz
        #[arg(long)]
        lpf: Option<f64>,

        /// High-pass cutoff in Hz
        #[arg(long)]
        hpf: Option<f64>,

        /// Band-stop frequency in Hz
        #[arg(long)]
        bsf: Option<f64>,

        /// Restore the hub's default filters
        #[arg(long, conflicts_with_all = ["lpf", "hpf", "bsf"])]
        default: bool,
    },

    /// Set how many seconds of data the hub keeps
    StorageTime { seconds: u32 },
}

/// Grab subscription selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StreamKind {
    Filtered,
    Raw,
    Rhythms,
    Meditation,
    Concentration,
}

impl From<StreamKind> for GrabKind {
    fn from(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Filtered => GrabKind::FilteredData,
            StreamKind::Raw => GrabKind::RawData,
            StreamKind::Rhythms => GrabKind::RhythmsHistory,
            StreamKind::Meditation => GrabKind::MeditationHistory,
            StreamKind::Concentration => GrabKind::ConcentrationHistory,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "neuroplay_pro=debug,neuroplay_cli=debug"
    } else {
        "neuroplay_pro=warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = match HubConfig::discover(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Note: {e}. Using defaults.");
            HubConfig::default()
        }
    };
    if let Some(url) = cli.url {
        config.hub_url = url;
    }

    let result = match cli.command {
        Command::Info { commands } => commands::cmd_info(config, commands).await,
        Command::Devices { json } => commands::cmd_devices(config, json).await,
        Command::Stream {
            device,
            channels,
            kind,
            seconds,
            interval_ms,
        } => {
            let options = commands::StreamOptions {
                device,
                channels,
                kind,
                seconds,
                interval_ms,
            };
            commands::cmd_stream(config, options).await
        }
        Command::Watch {
            device,
            interval_ms,
        } => commands::cmd_watch(config, device, interval_ms).await,
        Command::Record {
            device,
            seconds,
            out,
        } => commands::cmd_record(config, device, seconds, &out).await,
        Command::Filters {
            lpf,
            hpf,
            bsf,
            default,
        } => commands::cmd_filters(config, lpf, hpf, bsf, default).await,
        Command::StorageTime { seconds } => commands::cmd_storage_time(config, seconds).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        if e
            .downcast_ref::<neuroplay_pro::NeuroplayError>()
            .is_some_and(neuroplay_pro::NeuroplayError::is_connection_error)
        {
            eprintln!("Make sure the NeuroplayPro hub is running.");
        }
        std::process::exit(1);
    }
    Ok(())
}
