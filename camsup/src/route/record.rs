use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::AppError;
use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::RECORD_START, post(start))
        .route(&api::path::record_stop("{session}"), post(stop))
        .route(api::path::RECORD, get(current).post(timed))
}

async fn start(
    State(state): State<AppState>,
) -> crate::result::Result<Json<api::response::RecordStart>> {
    Ok(Json(state.manager.start_recording().await?.into()))
}

async fn stop(
    State(state): State<AppState>,
    Path(session): Path<String>,
) -> crate::result::Result<Json<api::response::RecordStop>> {
    Ok(Json(state.manager.stop_recording(&session).await?.into()))
}

async fn current(State(state): State<AppState>) -> Json<Option<api::response::Session>> {
    Json(state.manager.current_session().await)
}

/// Body is optional, an empty one records for the configured default.
async fn timed(
    State(state): State<AppState>,
    body: Bytes,
) -> crate::result::Result<Json<api::response::RecordStop>> {
    let req: api::request::TimedRecord = if body.iter().all(u8::is_ascii_whitespace) {
        Default::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(e.to_string()))?
    };
    Ok(Json(state.manager.record_for(req.duration).await?.into()))
}
