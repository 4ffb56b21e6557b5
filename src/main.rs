//! MedCoder - Main Entry Point
//!
//! Command-line front end for the diagnosis coding service: serve the
//! HTTP API, code a single diagnosis, or query the terminology table.

use clap::{Parser, Subcommand};
use medcoder::api::ApiServer;
use medcoder::config::ServiceConfig;
use medcoder::observability::init_default_logging;
use medcoder::registry::JobStatus;
use medcoder::service::CodingService;
use medcoder::terminology::TerminologyStore;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Medical diagnosis coding service
#[derive(Parser)]
#[command(name = "medcoder")]
#[command(about = "Medical diagnosis coding service with terminology validation")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API server
    Serve,
    /// Code a diagnosis text and print the report
    Code {
        /// Free-text diagnosis, e.g. "Seizures, Depression, Migraine"
        diagnosis_text: String,
    },
    /// Search the terminology table by description
    Search {
        /// Description text to match against the reference table
        query: String,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize observability system
    init_default_logging();

    info!("Starting MedCoder v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Code { diagnosis_text } => code_diagnosis(config, &diagnosis_text).await,
        Commands::Search { query } => search_terminology(config, &query).await,
        Commands::Config { show } => handle_config_command(config, show).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ServiceConfig::load_from_file(path)?)
        }
        // Probes the default locations, then falls back to built-in defaults
        None => Ok(ServiceConfig::load()?),
    }
}

async fn serve(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let service = Arc::new(CodingService::from_config(config)?);
    info!(
        terminology_records = service.store().len(),
        "service assembled, starting API server"
    );
    let server = Arc::new(ApiServer::new(service));

    // Graceful shutdown on SIGINT/SIGTERM
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        result = Arc::clone(&server).serve() => result?,
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    Ok(())
}

async fn code_diagnosis(
    config: ServiceConfig,
    diagnosis_text: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = CodingService::from_config(config)?;
    let snapshot = service.run_to_completion(diagnosis_text).await?;

    match snapshot.status {
        JobStatus::Completed => {
            if let Some(report) = snapshot.result {
                println!("{report}");
            }
            Ok(())
        }
        _ => {
            let message = snapshot
                .error
                .unwrap_or_else(|| "job ended without a result".to_string());
            Err(message.into())
        }
    }
}

async fn search_terminology(
    config: ServiceConfig,
    query: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = TerminologyStore::load_csv(&config.terminology.csv_path)?;
    let matches = store.search_by_description(query);

    if matches.is_empty() {
        println!("No matching codes found for '{query}'");
        return Ok(());
    }

    for record in matches {
        println!("{:<8} {} ({})", record.code, record.description, record.domain);
    }
    Ok(())
}

async fn handle_config_command(
    config: ServiceConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
