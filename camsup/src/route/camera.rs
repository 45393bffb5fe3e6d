use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};

use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new().route(api::path::CAMERAS, get(index)).route(
        &api::path::camera("{id}"),
        get(show).put(update).delete(destroy),
    )
}

async fn index(State(state): State<AppState>) -> Json<Vec<api::response::Camera>> {
    Json(state.manager.cameras().await)
}

async fn show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> crate::result::Result<Json<api::response::Camera>> {
    Ok(Json(state.manager.camera(&id).await?))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(spec): Json<api::request::CameraSpec>,
) -> crate::result::Result<Json<api::response::Camera>> {
    Ok(Json(state.manager.put_camera(&id, spec).await?))
}

async fn destroy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> crate::result::Result<StatusCode> {
    state.manager.remove_camera(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
