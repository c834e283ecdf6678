// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "aicamera")]
#[command(about = "Camera capture core with live image classification")]
#[command(version = aicamera::constants::app_info::version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full session against the built-in virtual camera
    Simulate {
        /// Number of stills to take
        #[arg(short, long, default_value = "1")]
        stills: u32,

        /// Seconds to watch classification results before capturing
        #[arg(short = 'w', long, default_value = "3")]
        watch: u64,

        /// Pinch updates to apply before capturing
        #[arg(short, long, default_value = "0")]
        zoom_steps: u32,

        /// Output directory (default: ~/Pictures/aicamera)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Device profile JSON (default: virtual camera profile)
        #[arg(short, long)]
        profile: Option<PathBuf>,

        /// Configuration file (default: ~/.config/aicamera/config.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print a device profile and the sizes derived from it
    Profile {
        /// Device profile JSON (default: virtual camera profile)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        /// Configuration file (default: ~/.config/aicamera/config.json)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level
    // Examples: RUST_LOG=debug, RUST_LOG=aicamera=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            stills,
            watch,
            zoom_steps,
            output,
            profile,
            config,
        } => cli::simulate(cli::SimulateOptions {
            stills,
            watch_secs: watch,
            zoom_steps,
            output,
            profile,
            config,
        }),
        Commands::Profile { file } => cli::show_profile(file.as_deref()),
        Commands::Config { file } => cli::show_config(file.as_deref()),
    }
}
