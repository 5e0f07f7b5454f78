//! JSON API for the browser front end.
//!
//! - `POST /api/compile`: `CompileRequest` in, `CompileResponse` out
//! - `GET /api/readiness`: which tools are installed
//! - `GET /api/health`: liveness

use crate::{
    config::Config,
    engine::{SystemToolchain, Toolchain},
    pipeline::Pipeline,
    probe::ToolAvailability,
    request::{CompileRequest, CompileResponse, FailureKind},
};
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

pub fn router<T>(pipeline: Arc<Pipeline<T>>) -> Router
where
    T: Toolchain + Send + Sync + 'static,
{
    let cors = pipeline.config().server.cors;
    let app = Router::new()
        .route("/api/compile", post(compile::<T>))
        .route("/api/readiness", get(readiness::<T>))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline);

    if cors {
        app.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        app
    }
}

pub async fn serve(cfg: Config) -> Result<()> {
    let pipeline = Arc::new(Pipeline::new(&cfg, SystemToolchain::new(&cfg)));

    let readiness = pipeline.readiness();
    if readiness.ready {
        info!("toolchain ready: {:?}", readiness.tools);
    } else {
        warn!("toolchain not ready, compiles will fail: {:?}", readiness.tools);
    }

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("latex-snap listening on {}", listener.local_addr()?);

    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .with_context(|| "serving HTTP")?;

    info!("server shutdown complete");
    Ok(())
}

async fn compile<T>(
    State(pipeline): State<Arc<Pipeline<T>>>,
    payload: Result<Json<CompileRequest>, JsonRejection>,
) -> (StatusCode, Json<CompileResponse>)
where
    T: Toolchain + Send + Sync + 'static,
{
    let req = match payload {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!("rejected compile request: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(CompileResponse::rejected(format!(
                    "invalid request: {}",
                    rejection.body_text()
                ))),
            );
        }
    };

    // Compiles block on child processes; keep them off the async workers.
    match tokio::task::spawn_blocking(move || pipeline.compile_snippet(&req)).await {
        Ok(result) => (StatusCode::OK, Json(CompileResponse::from(result))),
        Err(err) => {
            error!("compile task failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CompileResponse {
                    success: false,
                    image_data: None,
                    error: Some(format!("unexpected error: {err}")),
                    log: None,
                    kind: Some(FailureKind::Internal),
                }),
            )
        }
    }
}

async fn readiness<T>(State(pipeline): State<Arc<Pipeline<T>>>) -> Json<ToolAvailability>
where
    T: Toolchain + Send + Sync + 'static,
{
    Json(pipeline.readiness())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("failed to listen for SIGTERM: {err}");
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
    info!("shutdown signal received");
}
