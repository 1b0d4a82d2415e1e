//! Authentication API handlers
//!
//! Thin adapters between HTTP and [`AuthService`]: decode the body, collect
//! client info, call the service and wrap the result in the success
//! envelope. All decisions live in the service.

use crate::audit::{extract_ip_address, extract_user_agent};
use crate::auth::{
    ActivateRequest, AuthService, ClientInfo, CurrentUser, LoginRequest, RefreshRequest,
    RegisterRequest, SessionResponse, User,
};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Path, State},
    http::request::Parts,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use validator::Validate;

/// `{ "success": true, "result": ... }`
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub result: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(result: T) -> Json<Self> {
        Json(Self {
            success: true,
            result,
        })
    }
}

/// JSON body whose rejections render as the error envelope
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S> FromRequestParts<S> for ClientInfo
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip_address = extract_ip_address(&parts.headers).or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        Ok(ClientInfo {
            ip_address,
            user_agent: extract_user_agent(&parts.headers),
        })
    }
}

fn auth(state: &AppState) -> &AuthService {
    &state.auth
}

fn validate<T: Validate>(request: &T, message: &str, op: &'static str) -> Result<(), AppError> {
    request
        .validate()
        .map_err(|_| AppError::validation(message, op))
}

/// Start a registration
///
/// Stores a pending registration and mails an activation link with a
/// five digit code. Repeating the call within fifteen minutes only resends
/// the email.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    tag = "auth",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Confirmation email dispatched"),
        (status = 400, description = "Invalid input", body = crate::error::ErrorEnvelope),
        (status = 409, description = "Email already registered", body = crate::error::ErrorEnvelope),
        (status = 500, description = "Internal server error", body = crate::error::ErrorEnvelope),
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    auth(&state).register(request, &client).await?;

    Ok(ApiResponse::ok(
        "registration accepted, check your email to confirm".to_string(),
    ))
}

/// Activate a pending registration
#[utoipa::path(
    post,
    path = "/api/v1/auth/activate/{token}",
    tag = "auth",
    params(("token" = String, Path, description = "Activation token from the email")),
    request_body = ActivateRequest,
    responses(
        (status = 200, description = "Account created", body = User),
        (status = 400, description = "Link expired or wrong code", body = crate::error::ErrorEnvelope),
        (status = 500, description = "Internal server error", body = crate::error::ErrorEnvelope),
    )
)]
pub async fn activate_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    ApiJson(request): ApiJson<ActivateRequest>,
) -> Result<Json<ApiResponse<User>>, AppError> {
    const OP: &str = "handlers::activate";

    if token.trim().is_empty() {
        return Err(AppError::validation("invalid activation link", OP));
    }
    validate(&request, "verification code is required", OP)?;

    let user = auth(&state).activate(&token, &request.code).await?;
    Ok(ApiResponse::ok(user))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = SessionResponse),
        (status = 400, description = "Invalid credentials or blocked account", body = crate::error::ErrorEnvelope),
        (status = 500, description = "Internal server error", body = crate::error::ErrorEnvelope),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    ApiJson(request): ApiJson<LoginRequest>,
) -> Result<Json<ApiResponse<SessionResponse>>, AppError> {
    let session = auth(&state).login(request, &client).await?;
    Ok(ApiResponse::ok(session))
}

/// Profile of the caller
#[utoipa::path(
    get,
    path = "/api/v1/auth/profile",
    tag = "auth",
    responses(
        (status = 200, description = "Current identity", body = CurrentUser),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorEnvelope),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn profile_handler(
    Extension(user): Extension<CurrentUser>,
) -> Json<ApiResponse<CurrentUser>> {
    ApiResponse::ok(user)
}

/// Rotate a refresh token
///
/// The presented token is invalid from the moment this call succeeds.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh-token",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = SessionResponse),
        (status = 400, description = "Invalid or expired refresh token", body = crate::error::ErrorEnvelope),
        (status = 500, description = "Internal server error", body = crate::error::ErrorEnvelope),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> Result<Json<ApiResponse<SessionResponse>>, AppError> {
    validate(&request, "refresh token is required", "handlers::refresh")?;

    let session = auth(&state)
        .refresh(&request.refresh_token, &client)
        .await?;
    Ok(ApiResponse::ok(session))
}

/// End one of the caller's sessions
#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session revoked"),
        (status = 400, description = "Unknown session", body = crate::error::ErrorEnvelope),
        (status = 401, description = "Unauthorized", body = crate::error::ErrorEnvelope),
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    client: ClientInfo,
    ApiJson(request): ApiJson<RefreshRequest>,
) -> Result<Json<ApiResponse<String>>, AppError> {
    validate(&request, "refresh token is required", "handlers::logout")?;

    auth(&state)
        .revoke_session(&request.refresh_token, &user, &client)
        .await?;
    Ok(ApiResponse::ok("logged out".to_string()))
}
