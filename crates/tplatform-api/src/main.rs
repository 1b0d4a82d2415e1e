//! tplatform API Server
//!
//! Registration, login and session server backed by PostgreSQL.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tplatform_api::{
    auth::{AuthService, LogEmailSender, PgAuthRepository},
    create_router, db,
    state::AppState,
};
use tplatform_core::{AppConfig, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "tplatform-api", version, about = "Registration, login and session API")]
struct Cli {
    /// TOML configuration file; environment variables override its values
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path.clone())?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    config.validate()?;

    init_tracing(&config.logging)?;

    let pool = db::connect(&config.database)
        .await
        .context("Failed to connect to database")?;
    if config.database.run_migrations {
        db::migrate(&pool)
            .await
            .context("Failed to apply migrations")?;
    }

    let auth = AuthService::from_config(
        &config.auth,
        Arc::new(PgAuthRepository::new(pool)),
        Arc::new(LogEmailSender),
    )
    .context("Invalid password hashing parameters")?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, auth));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("tplatform API Server starting on http://{}", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Gracefully shutdown");
    Ok(())
}

fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log filter")?;

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_format {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()
            .context("Failed to init tracing")?;
    } else {
        subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_file(config.include_location)
                    .with_line_number(config.include_location),
            )
            .try_init()
            .context("Failed to init tracing")?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
