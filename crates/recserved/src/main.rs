//! recserved: the recommendation serving daemon.
//!
//! Assembles the serving stack in one process:
//! - Filesystem model registry
//! - Model version manager (active model + bounded cache)
//! - Rollout router (fixed / canary / A/B test / shadow)
//! - Metrics collector
//! - REST API
//!
//! # Usage
//!
//! ```text
//! recserved serve --config recserve.toml --port 8080
//! recserved check-config --config recserve.toml
//! recserved versions --registry model_registry
//! ```

mod service;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use recserve_core::ServiceConfig;
use tracing::{info, warn};

const DEFAULT_LOG_FILTER: &str = "info,recserved=debug,recserve=debug";

#[derive(Parser)]
#[command(name = "recserved", about = "Movie recommendation serving daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service.
    Serve {
        /// Path to recserve.toml.
        #[arg(long, env = "RECSERVE_CONFIG")]
        config: Option<PathBuf>,

        /// Port to listen on (overrides config and PORT).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the effective configuration as TOML and exit.
    CheckConfig {
        #[arg(long, env = "RECSERVE_CONFIG")]
        config: Option<PathBuf>,
    },
    /// List the versions present in a model registry.
    Versions {
        /// Registry root (defaults to the configured registry).
        #[arg(long)]
        registry: Option<PathBuf>,

        #[arg(long, env = "RECSERVE_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve { config, port } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config).await
        }
        Command::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            let rollout = service::rollout_config(&config.rollout, &config.model.version);
            println!("# effective strategy: {}", rollout.effective_strategy());
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Command::Versions { registry, config } => {
            let config = load_config(config.as_deref())?;
            let mut registry_config = config.clone();
            if let Some(root) = registry {
                registry_config.model.registry = root.display().to_string();
            }
            let registry = service::registry(&registry_config, None);
            for version in registry.list_versions()? {
                let marker = if version == config.model.version { " *" } else { "" };
                println!("{version}{marker}");
            }
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Defaults, then the optional file, then environment overrides.
fn load_config(path: Option<&Path>) -> anyhow::Result<ServiceConfig> {
    let mut config = match path {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ServiceConfig::default(),
    };
    config
        .apply_env()
        .context("invalid environment override")?;
    Ok(config)
}

async fn run_server(config: ServiceConfig) -> anyhow::Result<()> {
    info!(
        model = %config.model.name,
        version = %config.model.version,
        registry = %config.model.registry,
        "recserve daemon starting"
    );

    let image_digest = std::env::var("CONTAINER_IMAGE_DIGEST").ok();
    let state = service::build_state(&config, image_digest).await?;

    let router = recserve_api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => {
                    warn!(error = %e, "failed to install Ctrl-C handler");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    info!("recserve daemon stopped");
    Ok(())
}
