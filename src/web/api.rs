//! JSON API routes and handlers
//!
//! - Cached code listings with filters
//! - Subscriber opt-in and removal
//! - Manual code check
//! - Recent and live logs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use crate::clock::SharedClock;
use crate::codes::{CodeFilter, CodeRecord, CodeType, Game};
use crate::cycle::{CycleError, SharedDetectionCycle};
use crate::logging::SharedLogBuffer;
use crate::state::{
    NotificationPreferences, SharedSnapshotStore, SharedSubscriberDirectory, Subscriber,
};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub store: SharedSnapshotStore,
    pub subscribers: SharedSubscriberDirectory,
    pub cycle: SharedDetectionCycle,
    pub log_buffer: SharedLogBuffer,
    pub clock: SharedClock,
}

pub fn api_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/codes", get(list_codes))
        .route("/codes/:game", get(game_codes))
        .route("/subscribers", post(upsert_subscriber))
        .route("/subscribers/:id", delete(remove_subscriber))
        .route("/check", post(check_now))
        .route("/logs", get(recent_logs))
        .route("/logs/stream", get(logs_stream))
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// GET /health
async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    let snapshot = state.store.get();
    Json(json!({
        "status": "ok",
        "last_fetched": snapshot.as_ref().map(|s| s.fetched_at.to_rfc3339()),
        "codes": snapshot.as_ref().map(|s| s.counts()).unwrap_or_default(),
        "subscribers": state.subscribers.subscriber_count().await,
    }))
}

/// GET /codes - every game's cached codes
async fn list_codes(State(state): State<ApiState>) -> Response {
    match state.store.get() {
        Some(snapshot) => Json(&snapshot.games).into_response(),
        None => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Codes have not been fetched yet",
        ),
    }
}

/// A code plus the display attributes derived from it
#[derive(Serialize)]
struct CodeView<'a> {
    #[serde(flatten)]
    record: &'a CodeRecord,
    code_type: CodeType,
    working: bool,
    recent: bool,
}

/// GET /codes/:game?type=&status=&search=
async fn game_codes(
    State(state): State<ApiState>,
    Path(game): Path<String>,
    Query(filter): Query<CodeFilter>,
) -> Response {
    let Ok(game) = game.parse::<Game>() else {
        return error_response(StatusCode::NOT_FOUND, format!("Unknown game '{}'", game));
    };

    let Some(snapshot) = state.store.get() else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Codes have not been fetched yet",
        );
    };

    let now = state.clock.now();
    let codes: Vec<CodeView> = filter
        .apply(snapshot.codes(game).unwrap_or_default(), now)
        .into_iter()
        .map(|record| CodeView {
            record,
            code_type: record.code_type(),
            working: record.is_working(now),
            recent: record.is_recent(now),
        })
        .collect();

    Json(json!({
        "game": game,
        "name": game.display_name(),
        "codes": codes,
    }))
    .into_response()
}

/// Body for POST /subscribers
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionRequest {
    /// Existing subscriber to update; a new id is assigned when absent
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "fcmToken")]
    token: Option<String>,
    #[serde(default)]
    favorite_games: BTreeSet<Game>,
    #[serde(default)]
    notifications: NotificationPreferences,
}

/// POST /subscribers - opt in or update preferences
async fn upsert_subscriber(
    State(state): State<ApiState>,
    Json(request): Json<SubscriptionRequest>,
) -> Response {
    let id = request
        .id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if request.notifications.new_codes && request.token.as_deref().map_or(true, |t| t.trim().is_empty()) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "A delivery token is required to enable notifications",
        );
    }

    let subscriber = Subscriber {
        id,
        delivery_token: request.token,
        favorite_games: request.favorite_games,
        notifications: request.notifications,
        updated_at: 0,
    };

    match state.subscribers.upsert(subscriber).await {
        Ok(saved) => {
            info!("Subscriber {} updated preferences", saved.id);
            Json(saved).into_response()
        }
        Err(e) => {
            error!("Failed to save subscriber: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save subscriber")
        }
    }
}

/// DELETE /subscribers/:id
async fn remove_subscriber(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.subscribers.remove(&id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Subscriber '{}' not found", id)),
        Err(e) => {
            error!("Failed to remove subscriber {}: {}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to remove subscriber")
        }
    }
}

/// POST /check - run a detection cycle now
///
/// The cycle runs on its own task so a client that disconnects mid-check
/// does not cancel it.
async fn check_now(State(state): State<ApiState>) -> Response {
    let cycle = state.cycle.clone();
    let result = match tokio::spawn(async move { cycle.run_cycle().await }).await {
        Ok(result) => result,
        Err(e) => {
            error!("Manual code check task failed: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Code check failed");
        }
    };

    match result {
        Ok(report) => Json(report).into_response(),
        Err(CycleError::AlreadyRunning) => {
            error_response(StatusCode::CONFLICT, "A code check is already running")
        }
        Err(CycleError::Fetch(e)) => {
            warn!("Manual code check failed: {}", e);
            error_response(StatusCode::BAD_GATEWAY, e.user_message())
        }
        Err(CycleError::Directory(e)) => {
            warn!("Manual code check failed: {}", e);
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.user_message())
        }
    }
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_count")]
    count: usize,
}

fn default_log_count() -> usize {
    100
}

/// GET /logs?count=
async fn recent_logs(State(state): State<ApiState>, Query(query): Query<LogsQuery>) -> Response {
    Json(state.log_buffer.recent(query.count)).into_response()
}

/// GET /logs/stream - SSE feed of new log entries
async fn logs_stream(State(state): State<ApiState>) -> impl IntoResponse {
    let stream = BroadcastStream::new(state.log_buffer.subscribe()).filter_map(|result| {
        // Lagged receivers skip what they missed
        result
            .ok()
            .map(|entry| Ok::<_, Infallible>(Event::default().data(entry.to_json())))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
