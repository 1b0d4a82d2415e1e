//! Access guard for incoming requests
//!
//! Runs in front of every route. Public paths and CORS pre-flight requests
//! pass straight through. Everything else needs `Authorization: Bearer
//! <token>` carrying a valid access token for an active identity, and paths
//! under [`ADMIN_PREFIX`] additionally need the admin flag. The verified
//! [`CurrentUser`] is inserted into the request extensions; handlers read it
//! with `Extension<CurrentUser>`.

use super::models::CurrentUser;
use super::service::AuthService;
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Prefix of every API route
pub const API_PREFIX: &str = "/api/v1";

/// Routes under this prefix require the admin flag
pub const ADMIN_PREFIX: &str = "/api/v1/admin";

const PUBLIC_PATHS: &[&str] = &[
    "/api/v1/auth/register",
    "/api/v1/auth/login",
    "/api/v1/auth/refresh-token",
    "/health",
];

const PUBLIC_PREFIXES: &[&str] = &["/api/v1/auth/activate/", "/api-docs/"];

/// Access policy of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPolicy {
    Public,
    Authenticated,
    Admin,
}

impl PathPolicy {
    pub fn of(path: &str) -> Self {
        if PUBLIC_PATHS.contains(&path) || PUBLIC_PREFIXES.iter().any(|p| path.starts_with(p)) {
            Self::Public
        } else if path == ADMIN_PREFIX || path.starts_with(&format!("{ADMIN_PREFIX}/")) {
            Self::Admin
        } else {
            Self::Authenticated
        }
    }
}

/// Token from `Authorization: Bearer <token>`, if present and non-empty
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Decide whether a request may proceed
///
/// Returns the verified identity for protected paths and `None` for
/// requests that bypass the guard.
pub fn check_access(
    auth: &AuthService,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
) -> Result<Option<CurrentUser>, AppError> {
    const OP: &str = "AccessGuard::check";

    let policy = PathPolicy::of(path);
    if *method == Method::OPTIONS || policy == PathPolicy::Public {
        return Ok(None);
    }

    let Some(token) = bearer_token(headers) else {
        audit_log(&AuditEvent::InvalidToken {
            resource: path.to_string(),
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        });
        return Err(AppError::unauthorized(OP));
    };

    let identity = auth.verify_access(token).inspect_err(|_| {
        audit_log(&AuditEvent::InvalidToken {
            resource: path.to_string(),
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        });
    })?;

    if !identity.is_active {
        audit_log(&AuditEvent::AccessDenied {
            user_id: Some(identity.id),
            email: Some(identity.email.clone()),
            resource: path.to_string(),
            reason: "account blocked".to_string(),
            ip_address: extract_ip_address(headers),
        });
        return Err(AppError::validation("account blocked", OP));
    }

    if policy == PathPolicy::Admin && !identity.is_admin {
        audit_log(&AuditEvent::AccessDenied {
            user_id: Some(identity.id),
            email: Some(identity.email.clone()),
            resource: path.to_string(),
            reason: "admin required".to_string(),
            ip_address: extract_ip_address(headers),
        });
        return Err(AppError::forbidden(OP));
    }

    Ok(Some(identity))
}

/// Axum middleware wrapping [`check_access`]
///
/// ```ignore
/// let app = Router::new()
///     .nest("/api/v1", api_routes())
///     .layer(axum::middleware::from_fn_with_state(state.clone(), access_guard))
///     .with_state(state);
/// ```
pub async fn access_guard(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = check_access(
        &state.auth,
        request.method(),
        request.uri().path(),
        request.headers(),
    )?;

    if let Some(identity) = identity {
        request.extensions_mut().insert(identity);
    }

    Ok(next.run(request).await)
}
