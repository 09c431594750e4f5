use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, http::HeaderValue, routing::get};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use crate::api::{self, AppState};
use crate::config::AppConfig;
use crate::db::{DbHandle, TaskDb};
use crate::realtime::{RoomRouter, ws};
use crate::reminders::ReminderScheduler;

/// Build the full application router: REST API plus the realtime channel.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
        ])
}

/// Start the backend: open the store, register the reminder job, and serve
/// HTTP + WebSocket until Ctrl+C. The scheduler is stopped after the serve
/// loop exits.
pub async fn start_server(config: AppConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }

    let db = DbHandle::new(TaskDb::new(&config.db_path).context("Failed to open task store")?);
    let router = Arc::new(RoomRouter::new());
    let scheduler = Arc::new(ReminderScheduler::new(
        db.clone(),
        router.clone(),
        config.reminders.clone(),
    ));
    scheduler.initialize();

    let cors = cors_layer(&config.cors_origins);
    let state = Arc::new(AppState {
        db,
        router,
        scheduler: scheduler.clone(),
        config: Arc::new(config.clone()),
    });

    let app = build_router(state).layer(cors);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!(addr = %listener.local_addr()?, "taskwire listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler.stop_all();
    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        return;
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let db = DbHandle::new(TaskDb::new_in_memory().unwrap());
        let room_router = Arc::new(RoomRouter::new());
        let config = Arc::new(AppConfig::default());
        let scheduler = Arc::new(ReminderScheduler::new(
            db.clone(),
            room_router.clone(),
            config.reminders.clone(),
        ));
        build_router(Arc::new(AppState {
            db,
            router: room_router,
            scheduler,
            config,
        }))
    }

    #[tokio::test]
    async fn health_via_full_router() {
        let app = test_router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_route_rejects_missing_token() {
        // A well-formed upgrade handshake, just without a credential.
        let app = test_router();
        let req = Request::builder()
            .uri("/ws")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ws_route_rejects_invalid_token() {
        let app = test_router();
        let req = Request::builder()
            .uri("/ws?token=not.a.token")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn api_routes_require_auth() {
        let app = test_router();
        let req = Request::builder()
            .uri("/api/tasks")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn cors_layer_skips_bad_origins() {
        // Construction must not panic on garbage input.
        let _ = cors_layer(&["http://localhost:3000".to_string(), "\u{0}bad".to_string()]);
    }
}
