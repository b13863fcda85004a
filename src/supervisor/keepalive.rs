use std::{net::SocketAddr, time::Instant};

use axum::{extract::State, routing::get, Json, Router};
use tokio::net::TcpListener;
use tracing::{error, info};

use super::{registry::WorkerStatus, SharedRegistry};

pub fn router(registry: SharedRegistry) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/workers", get(workers))
        .with_state(registry)
}

async fn home() -> &'static str {
    "OK"
}

async fn workers(State(registry): State<SharedRegistry>) -> Json<Vec<WorkerStatus>> {
    Json(registry.lock().await.snapshot(Instant::now()))
}

pub async fn serve(port: u16, registry: SharedRegistry) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!(%addr, "keepalive listening");
            if let Err(e) = axum::serve(listener, router(registry)).await {
                error!(error = %e, "keepalive server error");
            }
        }
        Err(e) => {
            error!(error = %e, %addr, "failed to bind keepalive server");
        }
    }
}
