//! Quilt upload server binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use quilt_core::config::{AppConfig, CombineMode};
use quilt_core::UploadToken;
use quilt_server::bootstrap::{build_manager, build_state};
use quilt_server::create_router;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Quilt - A resumable chunked upload server
#[derive(Parser, Debug)]
#[command(name = "quiltd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "QUILT_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Finalize an upload outside a request, under the background combine budget
    Finalize {
        /// Upload token
        token: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Quilt v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Finalize { token } => finalize(config, &token).await,
    }
}

/// Load configuration from the optional file, then `QUILT_` environment variables.
fn load_config(path: &str) -> Result<AppConfig> {
    let config_path = std::path::Path::new(path);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    // QUILT_CONFIG only names the file.
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("QUILT_") && key != "QUILT_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: quiltd --config /path/to/config.toml\n  \
             2. Environment variables: QUILT_SERVER__BIND=0.0.0.0:8080 quiltd\n\n\
             See config/server.example.toml for example configuration.\n\
             Set QUILT_CONFIG env var to specify a default config file path."
        );
    }

    figment
        .merge(Env::prefixed("QUILT_").split("__"))
        .extract()
        .context("failed to load configuration")
}

async fn serve(config: AppConfig) -> Result<()> {
    quilt_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    let state = build_state(config).await?;
    let app = create_router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn finalize(config: AppConfig, token: &str) -> Result<()> {
    let token = UploadToken::parse(token).context("invalid upload token")?;
    let manager = build_manager(&config).await?;

    let record = manager
        .incomplete_upload(&token)
        .await
        .context("no incomplete upload for token")?;
    let result = manager
        .process_with(&record, CombineMode::Background)
        .await
        .context("finalize failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
