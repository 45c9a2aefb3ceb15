use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use brewlink_protocol::{SessionEvent, SessionId};
use libbrewlink::{BrewError, DeviceId, Session};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::Stream;

use crate::AppState;
use crate::error::ApiError;

pub async fn sessions(State(state): State<Arc<AppState>>) -> Json<Vec<Session>> {
    Json(state.store().live_sessions())
}

pub async fn device_session(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    state
        .store()
        .get(&DeviceId::new(device_id))
        .map(Json)
        .ok_or_else(|| BrewError::NotFound("no live session for device".to_string()).into())
}

pub async fn archive_list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<SessionId>>, ApiError> {
    Ok(Json(state.store().archived_ids()?))
}

pub async fn archived_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.store().archived(&session_id)?))
}

/// Server-sent lifecycle events. A slow client that falls behind the
/// broadcast buffer skips ahead rather than stalling publishers.
pub async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.store().events().subscribe();
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    match Event::default().event(event_name(&event)).json_data(&event) {
                        Ok(frame) => yield Ok(frame),
                        Err(e) => tracing::warn!(error = %e, "failed to encode session event"),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn event_name(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Created { .. } => "created",
        SessionEvent::Updated { .. } => "updated",
        SessionEvent::Completed { .. } => "completed",
        SessionEvent::Archived { .. } => "archived",
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let store = state.store();
    Json(json!({
        "status": "ok",
        "devices": store.locks().len(),
        "live_sessions": store.live_count(),
        "quarantined": state.recovery().map_or(0, |r| r.quarantined),
    }))
}

pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.recovery() {
        Some(report) => (
            StatusCode::OK,
            Json(json!({ "ready": true, "recovery": report })),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "ready": false })),
        ),
    }
}
