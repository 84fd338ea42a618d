//! Command-line entry point for the modelmesh runtime.
//!
//! Lifecycle: tracing setup, construct, start, wait for a shutdown signal,
//! stop in reverse, scoped to two subcommands: `serve` boots the
//! orchestrator and the REST front door, `check-config` loads and
//! validates configuration without starting anything. Rendering help text,
//! shell completions, and the rest of a full operator CLI are out of scope
//! here.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use modelmesh_api::{ModelMeshApi, RestConfig};
use modelmesh_core::{ModelMeshConfig, ModelMeshOrchestrator};

#[derive(Parser)]
#[command(name = "modelmesh")]
#[command(about = "Multi-model AI orchestration runtime")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the orchestrator and the REST front door, and run until
    /// interrupted.
    Serve {
        /// Address the REST API binds to.
        #[arg(long, default_value = "127.0.0.1")]
        bind_address: String,

        /// Port the REST API listens on.
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Load configuration (defaults, `modelmesh.toml`, `MODELMESH__*` env
    /// vars) and report whether it's valid, without starting anything.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    modelmesh_core::telemetry::init_tracing()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { bind_address, port } => serve(bind_address, port).await,
        Commands::CheckConfig => check_config(),
    }
}

async fn serve(bind_address: String, port: u16) -> Result<()> {
    info!("starting modelmesh orchestrator");

    let orchestrator = match ModelMeshOrchestrator::new().await {
        Ok(orchestrator) => {
            info!("orchestrator initialized");
            Arc::new(orchestrator)
        }
        Err(e) => {
            error!("failed to initialize orchestrator: {}", e);
            return Err(e);
        }
    };

    if let Err(e) = orchestrator.start().await {
        error!("failed to start orchestrator: {}", e);
        return Err(e);
    }

    let rest_config = RestConfig {
        bind_address,
        port,
        ..RestConfig::default()
    };
    let api = ModelMeshApi::new(rest_config, Arc::clone(&orchestrator));
    api.start().await?;

    info!("modelmesh is serving requests");

    match signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, stopping modelmesh..."),
        Err(err) => error!("unable to listen for shutdown signal: {}", err),
    }

    api.stop().await?;
    if let Err(e) = orchestrator.stop().await {
        error!("error during orchestrator shutdown: {}", e);
        return Err(e);
    }

    info!("modelmesh stopped");
    Ok(())
}

fn check_config() -> Result<()> {
    match ModelMeshConfig::load() {
        Ok(config) => {
            info!("configuration is valid");
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Err(e) => {
            error!("configuration is invalid: {}", e);
            Err(e.into())
        }
    }
}
