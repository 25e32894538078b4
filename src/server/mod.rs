//! HTTP and WebSocket front end.
//!
//! | Route | |
//! |---|---|
//! | `GET /ws/analyze` | live conversation session |
//! | `GET /ws/users` | voice enrollment session |
//! | `GET /api/v1/reports?user_id=` | conversations of a user |
//! | `GET /api/v1/reports/{master_id}` | one conversation with its utterances |
//! | `GET /api/v1/sessions` | live sessions |
//! | `GET /health` | liveness |

pub mod api;
pub mod socket;

use crate::session::{SessionContext, SessionKind};
use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub ctx: SessionContext,
}

pub fn router(ctx: SessionContext) -> Router {
    Router::new()
        .route("/ws/analyze", get(ws_analyze))
        .route("/ws/users", get(ws_users))
        .route("/api/v1/reports", get(api::list_reports))
        .route("/api/v1/reports/{master_id}", get(api::show_report))
        .route("/api/v1/sessions", get(api::sessions))
        .route("/health", get(api::health))
        .with_state(AppState { ctx })
}

async fn ws_analyze(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| socket::serve_socket(socket, state.ctx, SessionKind::Conversation))
}

async fn ws_users(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| socket::serve_socket(socket, state.ctx, SessionKind::Enrollment))
}

/// Serve until SIGINT or SIGTERM. In-flight sessions are finalized before
/// this returns.
pub async fn serve(ctx: SessionContext, listener: TcpListener) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "listening");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!(error = %e, "failed to listen for SIGINT");
            }
            info!("received SIGINT, shutting down");
        }
        _ = wait_for_sigterm() => {
            info!("received SIGTERM, shutting down");
        }
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "failed to register SIGTERM handler");
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
