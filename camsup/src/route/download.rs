use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::response::Response;
use axum::routing::get;
use http::{HeaderValue, header};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::debug;

use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new().route(&api::path::download("{filename}"), get(download))
}

/// Streams a finished recording from disk. Range requests are honored.
async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    request: Request,
) -> crate::result::Result<Response> {
    let path = state.manager.recording_path(&filename).await?;
    debug!("download {:?}", path);
    let mut response = ServeFile::new(&path).oneshot(request).await?.map(Body::new);
    if response.status().is_success() {
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))?,
        );
    }
    Ok(response)
}
