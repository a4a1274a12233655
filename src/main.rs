//! audio-extract
//!
//! Command-line and HTTP front end for capped audio extraction.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_extract::config::{PipelineCaps, ServerConfig};
use audio_extract::config_file::{generate_default_config, ConfigFile};
use audio_extract::error::{ExtractError, Result};
use audio_extract::ffmpeg;
use audio_extract::host::{run_command, ExtractCommand};
use audio_extract::http::{create_router, AppState};
use audio_extract::pipeline::AudioExtractor;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "audio-extract";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the audio of one file and print the reply as JSON
    Extract {
        /// Source path or file:// URI
        path: String,

        /// Output file (a temporary file in the scratch directory if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Include the output as a base64 data URL
        #[arg(long)]
        include_data: bool,

        #[arg(long)]
        max_duration_secs: Option<f64>,

        #[arg(long)]
        max_output_bytes: Option<u64>,

        /// Lift both caps
        #[arg(long, conflicts_with_all = ["max_duration_secs", "max_output_bytes"])]
        unbounded: bool,
    },

    /// Serve the HTTP API
    Serve,

    /// Write a default configuration file
    InitConfig {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::InitConfig { file } = &args.command {
        generate_default_config(file).map_err(|e| ExtractError::Config(e.to_string()))?;
        println!("Wrote default configuration to {}", file.display());
        return Ok(());
    }

    let config = load_config(&args.config);
    init_logging(&config.log_level, &config.log_format);

    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    tracing::info!("FFmpeg version: {}", ffmpeg::version_info());

    ffmpeg::init()?;
    ffmpeg::install_log_filter();

    match args.command {
        Command::Extract {
            path,
            output,
            include_data,
            max_duration_secs,
            max_output_bytes,
            unbounded,
        } => {
            let mut extractor_config = config.extractor.clone();
            if unbounded {
                extractor_config.caps = PipelineCaps::unbounded();
            }
            if max_duration_secs.is_some() {
                extractor_config.caps.max_duration_secs = max_duration_secs;
            }
            if max_output_bytes.is_some() {
                extractor_config.caps.max_output_bytes = max_output_bytes;
            }

            let mut extractor = AudioExtractor::new(extractor_config)?;
            let command = ExtractCommand {
                path,
                output_path: output,
                include_data,
            };
            let reply = run_command(&mut extractor, command).await?;
            let json = serde_json::to_string_pretty(&reply)
                .map_err(|e| ExtractError::Config(e.to_string()))?;
            println!("{}", json);
        }
        Command::Serve => serve(config).await?,
        Command::InitConfig { .. } => {}
    }

    Ok(())
}

async fn serve(config: ServerConfig) -> Result<()> {
    config.extractor.validate()?;
    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| ExtractError::Config(format!("invalid listen address: {}", e)))?;

    let state = Arc::new(AppState::new(config)?);
    let app = create_router(state);

    tracing::info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Load the configuration file if there is one, defaults otherwise.
fn load_config(path: &Path) -> ServerConfig {
    if !path.exists() {
        return ServerConfig::default();
    }
    match ConfigFile::from_file(path) {
        Ok(cf) => cf.into_server_config(),
        Err(e) => {
            eprintln!(
                "Failed to load config file {}: {}. Using defaults.",
                path.display(),
                e
            );
            ServerConfig::default()
        }
    }
}

/// Initialize logging with tracing
fn init_logging(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("audio_extract={},tower_http={}", level, level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
