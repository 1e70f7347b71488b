//! midi-annotate - ornament, quantization and voice annotation for MIDI files
//!
//! Subcommands:
//! - `midi-annotate annotate <file>` - Annotate a Standard MIDI File, print JSON
//! - `midi-annotate config` - Show the effective configuration and its sources

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use annotate_cli::{annotate_midi, config, import};

#[derive(Parser)]
#[command(name = "midi-annotate")]
#[command(about = "Detect ornaments, shadow-quantize and separate voices in MIDI files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Annotate a Standard MIDI File and print the result as JSON
    Annotate {
        /// Path to the .mid file
        file: PathBuf,

        /// Only annotate this track index
        #[arg(short, long)]
        track: Option<usize>,

        /// Config file (replaces ./midi-annotate.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Config file (replaces ./midi-annotate.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match cli.command {
        Commands::Annotate {
            file,
            track,
            config,
            pretty,
        } => {
            let (options, sources) = config::load_with_sources_from(config.as_deref())
                .context("loading configuration")?;
            tracing::debug!(
                files = ?sources.files,
                env = ?sources.env_overrides,
                "configuration loaded"
            );

            let bytes = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let imported = import::parse_midi(&bytes)
                .with_context(|| format!("parsing {}", file.display()))?;

            let reports = annotate_midi(&imported, track, &options)?;
            let json = if pretty {
                serde_json::to_string_pretty(&reports)?
            } else {
                serde_json::to_string(&reports)?
            };
            println!("{json}");
        }
        Commands::Config { config } => {
            let (options, sources) = config::load_with_sources_from(config.as_deref())
                .context("loading configuration")?;

            for file in &sources.files {
                println!("# loaded: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {var}");
            }
            print!("{}", config::to_toml(&options)?);
        }
    }

    Ok(())
}
