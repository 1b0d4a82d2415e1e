//! API route definitions

use crate::auth::{
    access_guard, ActivateRequest, CurrentUser, LoginRequest, RefreshRequest, RegisterRequest,
    SessionResponse, User,
};
use crate::error::{ApiError, ErrorEnvelope};
use crate::handlers::{auth, health};
use crate::state::AppState;
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tplatform_core::ServerConfig;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register_handler,
        auth::activate_handler,
        auth::login_handler,
        auth::profile_handler,
        auth::refresh_handler,
        auth::logout_handler,
    ),
    components(schemas(
        health::HealthResponse,
        RegisterRequest,
        ActivateRequest,
        LoginRequest,
        RefreshRequest,
        User,
        CurrentUser,
        SessionResponse,
        ApiError,
        ErrorEnvelope,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Registration, login and session lifecycle"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Create API v1 routes
///
/// Public and protected routes share one router; the access guard layered in
/// [`create_router`] decides per path.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/activate/:token", post(auth::activate_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh-token", post(auth::refresh_handler))
        .route("/auth/profile", get(auth::profile_handler))
        .route("/auth/logout", post(auth::logout_handler))
}

/// Build the full application router with middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    let server = &state.config.server;
    let cors = cors_layer(server);
    let timeout = TimeoutLayer::new(Duration::from_secs(server.request_timeout_secs));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api-docs/openapi.json", get(openapi_json))
        .nest("/api/v1", api_routes())
        .layer(middleware::from_fn_with_state(state.clone(), access_guard))
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS policy from the configured origins
///
/// `*` allows any origin. Unparseable origins are skipped with a warning.
pub fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-requested-with"),
        ])
        .max_age(Duration::from_secs(86_400));

    if server.cors_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
}
