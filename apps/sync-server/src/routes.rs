//! HTTP routes.
//!
//! ```text
//! GET  /healthz                       public
//! POST /v1/sync                       rate limited (sync)
//! GET  /v1/tasks?limit=N              live tasks only
//! POST /v1/tasks/batch-delete         rate limited (batch_delete)
//! POST /v1/tasks/{id}/restore
//! GET  /v1/tasks/{id}/conflicts
//! GET  /v1/conflicts?limit=N
//! GET  /v1/notifications?limit=N
//! ```

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use taskflow_core::protocol::{
    BatchDeleteRequest, BatchDeleteResponse, ServerChange, SyncRequest, SyncResponse,
};
use taskflow_core::{ConflictRecord, StoredNotification};
use taskflow_db::Database;
use taskflow_sync::{Clock, Notifier, SyncCoordinator, SyncSettings, UndoService};

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtManager};
use crate::error::ApiError;
use crate::rate_limit::{ProtectedEndpoint, RateLimiter};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;

#[derive(Clone)]
pub struct AppState {
    db: Database,
    settings: Arc<SyncSettings>,
    coordinator: Arc<SyncCoordinator>,
    undo: Arc<UndoService>,
    jwt: Arc<JwtManager>,
    rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        db: Database,
        settings: Arc<SyncSettings>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        jwt: Arc<JwtManager>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        let coordinator = SyncCoordinator::new(db.clone(), settings.clone(), clock.clone(), notifier);
        let undo = UndoService::new(db.clone(), settings.clone(), clock);
        AppState {
            db,
            settings,
            coordinator: Arc::new(coordinator),
            undo: Arc::new(undo),
            jwt,
            rate_limiter,
        }
    }

    /// Shared with the background sweeper.
    pub fn undo_service(&self) -> Arc<UndoService> {
        self.undo.clone()
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync", post(sync))
        .route("/tasks", get(list_tasks))
        .route("/tasks/batch-delete", post(batch_delete))
        .route("/tasks/{id}/restore", post(restore_task))
        .route("/tasks/{id}/conflicts", get(task_conflicts))
        .route("/conflicts", get(list_conflicts))
        .route("/notifications", get(list_notifications))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    database: bool,
    timestamp: i64,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = state.db.health_check().await;
    Json(HealthResponse {
        status: if database { "ok" } else { "degraded" },
        database,
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt.validate_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

async fn sync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<SyncResponse>, ApiError> {
    state.rate_limiter.check(ProtectedEndpoint::Sync, &user.user_id)?;
    let Json(request) = body?;

    let response = state.coordinator.sync(&user.user_id, request).await?;
    Ok(Json(response))
}

async fn batch_delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    body: Result<Json<BatchDeleteRequest>, JsonRejection>,
) -> Result<Json<BatchDeleteResponse>, ApiError> {
    state
        .rate_limiter
        .check(ProtectedEndpoint::BatchDelete, &user.user_id)?;
    let Json(request) = body?;

    if request.task_ids.len() > state.settings.max_batch_size {
        return Err(ApiError::BadRequest(format!(
            "at most {} task ids per request",
            state.settings.max_batch_size
        )));
    }

    let response = state.undo.batch_delete(&user.user_id, &request.task_ids).await?;
    Ok(Json(response))
}

async fn restore_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(task_id): Path<i64>,
) -> Result<Json<ServerChange>, ApiError> {
    let task = state.undo.restore(&user.user_id, task_id).await?;
    Ok(Json(ServerChange::from(task)))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

impl ListQuery {
    fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

async fn list_tasks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ServerChange>>, ApiError> {
    let tasks = state
        .coordinator
        .active_tasks(&user.user_id, query.limit())
        .await?;
    Ok(Json(tasks))
}

async fn task_conflicts(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(task_id): Path<i64>,
) -> Result<Json<Vec<ConflictRecord>>, ApiError> {
    let conflicts = state.coordinator.task_conflicts(&user.user_id, task_id).await?;
    Ok(Json(conflicts))
}

async fn list_conflicts(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ConflictRecord>>, ApiError> {
    let conflicts = state
        .coordinator
        .recent_conflicts(&user.user_id, query.limit())
        .await?;
    Ok(Json(conflicts))
}

async fn list_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<StoredNotification>>, ApiError> {
    let notifications = state
        .coordinator
        .recent_notifications(&user.user_id, query.limit())
        .await?;
    Ok(Json(notifications))
}
