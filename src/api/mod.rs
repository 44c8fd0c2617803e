//! HTTP surfaces: the identity-provider router and the client-service gate.

use crate::{gate::Gate, idp::IdpState};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, options},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

use handlers::{gate, health, login};

const REQUEST_ID: &str = "x-request-id";
const CORS_MAX_AGE: Duration = Duration::from_secs(12 * 60 * 60);

/// Documented IdP routes.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Full IdP application with its middleware stack.
pub fn app(state: Arc<IdpState>) -> Router {
    let (router, _openapi) = router().split_for_parts();
    let router = router
        .route("/login", get(login::login_form))
        .route("/health", options(health::health));
    with_middleware(router, state)
}

/// Client-service gate application.
pub fn gate_app(gate: Arc<Gate>) -> Router {
    let router = Router::new()
        .route("/login", get(gate::login))
        .route("/api/signin", get(gate::signin))
        .route("/api/check", get(gate::check));
    with_middleware(router, gate)
}

fn with_middleware<T>(router: Router, state: Arc<T>) -> Router
where
    T: Send + Sync + 'static,
{
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::HEAD,
        ])
        .allow_origin(Any)
        .max_age(CORS_MAX_AGE);

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static(REQUEST_ID),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                REQUEST_ID,
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(state)),
    )
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID)
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

/// Start the identity provider.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn new(addr: SocketAddr, state: Arc<IdpState>) -> Result<()> {
    serve(addr, app(state)).await
}

/// Start the client-service gate.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn new_gate(addr: SocketAddr, gate: Arc<Gate>) -> Result<()> {
    serve(addr, gate_app(gate)).await
}

async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Listening on {}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}
