//! HTTP surface letting a host identity flow drive the filter remotely.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{get, post},
    Extension, Json, Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa::OpenApi;

use crate::filter::AuthFlowFilter;

pub mod handlers;

/// Shared state handed to every handler.
pub struct AppState {
    filter: AuthFlowFilter,
    challenge_url: Url,
}

impl AppState {
    #[must_use]
    pub fn new(filter: AuthFlowFilter, challenge_url: Url) -> Self {
        Self {
            filter,
            challenge_url,
        }
    }

    #[must_use]
    pub fn filter(&self) -> &AuthFlowFilter {
        &self.filter
    }

    /// Challenge UI location for a suspended request.
    #[must_use]
    pub fn challenge_location(&self, state_id: &str) -> String {
        let mut location = self.challenge_url.clone();
        location.query_pairs_mut().append_pair("StateId", state_id);
        location.to_string()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health::health,
        handlers::process::process,
        handlers::resume::resume
    ),
    components(schemas(
        handlers::health::Health,
        handlers::process::ProcessRequest,
        handlers::process::Destination
    )),
    tags(
        (name = "mfagate", description = "Second-factor decision for identity flows"),
        (name = "health", description = "Service health")
    )
)]
pub struct ApiDoc;

/// Build the router with every route and the shared middleware stack.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health).options(handlers::health))
        .route("/v1/process", post(handlers::process))
        .route("/v1/resume", get(handlers::resume))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Gracefully shutdown");
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
