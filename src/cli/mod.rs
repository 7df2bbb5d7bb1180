//! CLI interface for polyslot

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Multi-slot sampler and additive synth engine
#[derive(Parser)]
#[command(name = "polyslot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Render a project offline to a WAV file
    Render {
        /// Configuration file path
        #[arg(short, long, default_value = "polyslot.yaml")]
        config: PathBuf,

        /// Project snapshot (JSON)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Directory that sample keys resolve against (overrides the config)
        #[arg(short, long)]
        samples: Option<PathBuf>,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: f64,
    },

    /// Play a project on the output device until interrupted
    Play {
        /// Configuration file path
        #[arg(short, long, default_value = "polyslot.yaml")]
        config: PathBuf,

        /// Project snapshot (JSON)
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Directory that sample keys resolve against (overrides the config)
        #[arg(short, long)]
        samples: Option<PathBuf>,
    },

    /// List available audio devices
    Devices,

    /// Validate a configuration file
    Check {
        /// Configuration file path
        #[arg(short, long, default_value = "polyslot.yaml")]
        config: PathBuf,
    },

    /// Generate an example configuration file
    Init,
}
