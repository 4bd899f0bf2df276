use axum::{Json, Router, routing::get};
use core_config::server::ServerConfig;
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_triggers::{ApiDoc, TriggerService, handlers};
use tokio::signal;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, warn};
use utoipa::OpenApi;

mod config;
mod health;
mod state;

use config::Config;
use state::Backend;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Install color-eyre first for colored error output (before any fallible operations)
    install_color_eyre();

    let config = Config::from_env()?;

    init_tracing(&config.environment);

    let backend = Backend::from_config(&config).await?;
    let service = TriggerService::new(backend.collaborators, config.triggers.clone());

    info!(
        fanout_limit = config.triggers.topic_fanout_limit,
        lookup_timeout_ms = config.triggers.topic_lookup_timeout.as_millis() as u64,
        "Trigger service ready"
    );

    let app = Router::new()
        .nest("/api/v1/events", handlers::router(service))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(health::router(backend.redis))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    serve(app, &config.server).await?;

    info!("Notify API shutdown complete");
    Ok(())
}

/// Serve until a shutdown signal, then give in-flight requests
/// `shutdown_timeout` to finish.
async fn serve(app: Router, server: &ServerConfig) -> eyre::Result<()> {
    let listener = tokio::net::TcpListener::bind(server.address()).await?;
    info!("Server starting on {}", listener.local_addr()?);

    let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();

    let mut running = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                let _ = signalled_tx.send(());
            })
            .await
    });

    tokio::select! {
        result = &mut running => {
            result?.map_err(|e| eyre::eyre!("Server error: {}", e))?;
            return Ok(());
        }
        _ = signalled_rx => {}
    }

    match tokio::time::timeout(server.shutdown_timeout, running).await {
        Ok(result) => result?.map_err(|e| eyre::eyre!("Server error: {}", e))?,
        Err(_) => warn!(
            timeout_secs = server.shutdown_timeout.as_secs(),
            "Graceful shutdown timed out, dropping open connections"
        ),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully");
        },
    }
}
