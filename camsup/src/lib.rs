use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::middleware;
use axum::response::Response;
use axum::routing::get;
use http::{HeaderValue, header};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{Level, error, info_span};

use crate::config::Config;
use crate::manager::Manager;
use crate::route::{AppState, camera, download, record};

pub mod config;

mod convert;
mod error;
mod manager;
mod metrics;
mod process;
mod recorder;
mod registry;
mod result;
mod route;
mod sink;
mod supervisor;
#[cfg(test)]
mod testing;

pub async fn serve<F>(cfg: Config, listener: TcpListener, signal: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    metrics::register();
    let manager = match Manager::new(cfg.clone()).await {
        Ok(manager) => Arc::new(manager),
        Err(e) => {
            error!("manager start failed: {:?}", e);
            return;
        }
    };
    let app_state = AppState {
        manager: manager.clone(),
    };

    let hls = Router::new()
        .nest_service(api::path::HLS, ServeDir::new(manager.hls_root()))
        .layer(middleware::map_response(no_cache));

    let app = Router::new()
        .merge(camera::route())
        .merge(record::route())
        .merge(download::route())
        .route(api::path::METRICS, get(metrics))
        .with_state(app_state)
        .merge(hls)
        .layer(if cfg.http.cors {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        })
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let span = info_span!(
                        "http_request",
                        uri = ?request.uri(),
                        method = ?request.method(),
                        span_id = tracing::field::Empty,
                    );
                    span.record(
                        "span_id",
                        span.id().unwrap_or(tracing::Id::from_u64(42)).into_u64(),
                    );
                    span
                })
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::DEBUG))
                .on_failure(tower_http::trace::DefaultOnFailure::new().level(Level::INFO)),
        );

    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .unwrap_or_else(|e| error!("Application error: {e}"));
    manager.shutdown().await;
}

/// Segment numbering restarts with every encoder generation, so nothing
/// under the live directories may be revalidated.
async fn no_cache(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.remove(header::LAST_MODIFIED);
    headers.remove(header::ETAG);
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store"),
    );
    response
}

async fn metrics() -> String {
    metrics::gather()
}
