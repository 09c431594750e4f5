use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;

use crate::auth::{self, Identity, Role};
use crate::errors::AuthError;
use crate::config::AppConfig;
use crate::db::DbHandle;
use crate::models::TaskChanges;
use crate::realtime::{ADMIN_ROOM, EmitTarget, RoomRouter, ServerEvent};
use crate::reminders::ReminderScheduler;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub router: Arc<RoomRouter>,
    pub scheduler: Arc<ReminderScheduler>,
    pub config: Arc<AppConfig>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub role: Option<Role>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

// ── Authentication helpers ────────────────────────────────────────────

fn authenticate(headers: &HeaderMap, config: &AppConfig) -> Result<Identity, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("Token required".to_string()))?;
    auth::verify_token(token, &config.jwt_secret).map_err(|e| {
        warn!(reason = %e, "request rejected");
        ApiError::Unauthorized(e.to_string())
    })
}

fn require_admin(headers: &HeaderMap, config: &AppConfig) -> Result<Identity, ApiError> {
    let identity = authenticate(headers, config)?;
    if identity.role != Role::Admin {
        return Err(ApiError::Forbidden(AuthError::AdminRequired.to_string()));
    }
    Ok(identity)
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/api/admin/tasks", get(admin_list_tasks))
        .route("/api/admin/users", get(admin_list_users).post(admin_create_user))
        .route("/api/ws/clients", get(ws_clients))
        .route("/api/ws/test-broadcast", post(ws_test_broadcast))
        .route("/api/cron/trigger-reminders", post(cron_trigger_reminders))
        .route("/api/cron/status", get(cron_status))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn list_tasks(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&headers, &state.config)?;
    let tasks = state
        .db
        .call(move |db| db.list_tasks_for_user(identity.user_id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(tasks))
}

async fn create_task(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&headers, &state.config)?;
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Title is required".to_string()));
    }
    let task = state
        .db
        .call(move |db| db.create_task(identity.user_id, &req.title, &req.description))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    // Best-effort: fan-out failure never aborts the mutation.
    state.router.emit(
        EmitTarget::All,
        &ServerEvent::NewTask {
            message: "New task created".to_string(),
            task: task.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&headers, &state.config)?;
    let task = state
        .db
        .call(move |db| db.get_task(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .filter(|t| t.user_id == identity.user_id)
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(changes): Json<TaskChanges>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&headers, &state.config)?;
    if changes.is_empty() {
        return Err(ApiError::BadRequest("No changes provided".to_string()));
    }

    let existing = state
        .db
        .call(move |db| db.get_task(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .filter(|t| t.user_id == identity.user_id)
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    let changes_for_db = changes.clone();
    let updated = state
        .db
        .call(move |db| db.update_task(id, &changes_for_db))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    state.router.emit(
        EmitTarget::All,
        &ServerEvent::TaskUpdated {
            message: "Task updated".to_string(),
            task: updated.clone(),
            changes: changes.clone(),
        },
    );
    if changes.completed == Some(true) && !existing.completed {
        state.router.emit(
            EmitTarget::All,
            &ServerEvent::TaskCompleted {
                message: "Task marked as completed".to_string(),
                task: updated.clone(),
            },
        );
    }
    Ok(Json(updated))
}

async fn delete_task(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = authenticate(&headers, &state.config)?;
    let existing = state
        .db
        .call(move |db| db.get_task(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .filter(|t| t.user_id == identity.user_id)
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    state
        .db
        .call(move |db| db.delete_task(id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    state.router.emit(
        EmitTarget::All,
        &ServerEvent::TaskDeleted {
            message: "Task deleted".to_string(),
            task_id: existing.id,
            user_id: existing.user_id,
            deleted_at: Utc::now(),
        },
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn admin_list_tasks(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers, &state.config)?;
    let tasks = state
        .db
        .call(|db| db.list_all_tasks())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({
        "total": tasks.len(),
        "tasks": tasks,
    })))
}

async fn admin_list_users(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers, &state.config)?;
    let users = state
        .db
        .call(|db| db.list_users())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(users))
}

async fn admin_create_user(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers, &state.config)?;
    if req.email.trim().is_empty() {
        return Err(ApiError::BadRequest("Email is required".to_string()));
    }
    let role = req.role.unwrap_or(Role::User);
    let user = state
        .db
        .call(move |db| db.create_user(&req.email, role))
        .await
        .map_err(|e| {
            if e.to_string().contains("UNIQUE") {
                ApiError::BadRequest("Email already registered".to_string())
            } else {
                ApiError::Internal(e.to_string())
            }
        })?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn ws_clients(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers, &state.config)?;
    let clients = state.router.clients();
    Ok(Json(serde_json::json!({
        "totalClients": clients.len(),
        "clients": clients,
    })))
}

async fn ws_test_broadcast(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers, &state.config)?;
    state.router.emit(
        EmitTarget::Room(ADMIN_ROOM),
        &ServerEvent::TestBroadcast {
            message: "Test broadcast from admin".to_string(),
            timestamp: Utc::now(),
        },
    );
    Ok(Json(
        serde_json::json!({"message": "Test broadcast sent to admins"}),
    ))
}

async fn cron_trigger_reminders(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers, &state.config)?;
    // The only user-visible sweep failure surface: a generic error, details
    // stay in the logs.
    let report = state.scheduler.trigger_now().await.map_err(|e| {
        warn!(error = %e, "manual reminder trigger failed");
        ApiError::Internal("Operation failed".to_string())
    })?;
    Ok(Json(report))
}

async fn cron_status(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&headers, &state.config)?;
    Ok(Json(serde_json::json!({
        "cronEnabled": state.scheduler.enabled(),
        "jobs": state.scheduler.status(),
    })))
}
