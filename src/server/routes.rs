use std::time::Duration;

use axum::extract::{DefaultBodyLimit, MatchedPath, Request};
use axum::http::HeaderName;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::handlers::{health, inspect, metrics, objects};
use super::{AppState, RESULT_HEADER, SCORE_HEADER};

pub fn build_router(state: AppState) -> Router {
    let server = &state.config.server;

    let cors = CorsLayer::permissive().expose_headers([
        HeaderName::from_static(SCORE_HEADER),
        HeaderName::from_static(RESULT_HEADER),
    ]);

    Router::new()
        .route("/healthz", get(health::health_check))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/v1/objects", get(objects::list_objects))
        .route(
            "/v1/objects/:id",
            get(objects::get_object).delete(objects::delete_object),
        )
        .route("/v1/objects/:id/train", post(objects::train_object))
        .route("/v1/objects/:id/inspect", post(inspect::inspect_image))
        .route("/v1/objects/:id/inspect-batch", post(inspect::inspect_batch))
        .layer(middleware::from_fn(track_requests))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(server.max_upload_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            server.request_timeout_secs,
        )))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Count requests by route template rather than raw path.
async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    crate::metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), path.as_str(), response.status().as_str()])
        .inc();
    response
}
