//! GoLive CLI: composite sources and stream or record them.
//!
//! Usage:
//!   golive stream --url URL [OPTIONS]   Go live to an RTMP/RTMPS/SRT/UDP ingest
//!   golive record --output PATH [...]   Record to a local file
//!   golive run <SPEC>                   Run a pipeline spec (JSON)
//!   golive check [--spec SPEC]          Verify the transcoder and a spec
//!   golive probe                        Show transcoder encoders and backends
//!   golive config                       Print or initialize the config file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::media::MediaArgs;

#[derive(Parser)]
#[command(
    name = "golive",
    about = "Live compositing, encoding and streaming",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to the standard location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream to a network ingest
    Stream {
        /// Ingest URL, e.g. rtmp://live.example.com/app
        #[arg(short, long)]
        url: String,

        /// Stream key appended to the URL
        #[arg(short, long)]
        key: Option<String>,

        #[command(flatten)]
        media: MediaArgs,
    },

    /// Record to a local file (.mp4, .mkv, .flv or .ts)
    Record {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        media: MediaArgs,
    },

    /// Run a pipeline spec file
    Run {
        /// Path to a pipeline spec file (JSON)
        spec: PathBuf,
    },

    /// Verify the transcoder, and optionally a pipeline spec file
    Check {
        /// Path to a spec (JSON) to validate
        #[arg(long)]
        spec: Option<PathBuf>,
    },

    /// Show what the transcoder can encode with
    Probe,

    /// Print the effective configuration
    Config {
        /// Write the effective configuration to the standard location
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = commands::load_config(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    golive_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Stream { url, key, media } => commands::stream::run(config, url, key, media).await,
        Commands::Record { output, media } => commands::record::run(config, output, media).await,
        Commands::Run { spec } => commands::run::run(config, spec).await,
        Commands::Check { spec } => commands::check::run(config, spec).await,
        Commands::Probe => commands::probe::run(config).await,
        Commands::Config { init } => commands::config::run(config, init),
    }
}
