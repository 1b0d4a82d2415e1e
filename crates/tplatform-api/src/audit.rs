//! Security audit logging for authentication events
//!
//! Every registration, activation, login, refresh and revocation outcome is
//! recorded as an [`AuditEvent`] at INFO level on the `audit` target, so the
//! events can be filtered and routed apart from application logs. The full
//! event is attached as one JSON field for log aggregators.
//!
//! Events never carry passwords, tokens or verification codes.
//!
//! # Example
//!
//! ```ignore
//! use tplatform_api::audit::{audit_log, AuditEvent};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id: user.id,
//!     email: user.email.clone(),
//!     ip_address: Some("192.168.1.1".to_string()),
//!     user_agent: Some("Mozilla/5.0...".to_string()),
//! });
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Security audit events for authentication and authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// New pending registration stored and confirmation dispatched
    RegistrationRequested {
        email: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Repeated registration inside the resend window
    ConfirmationResent {
        email: String,
        ip_address: Option<String>,
    },

    /// Registration refused (email already belongs to an account)
    RegistrationRejected {
        email: String,
        reason: String,
        ip_address: Option<String>,
    },

    /// Pending registration turned into an account
    AccountActivated { user_id: Uuid, email: String },

    /// Activation refused
    ActivationFailed {
        email: Option<String>,
        reason: String,
    },

    /// Successful user login
    LoginSuccess {
        user_id: Uuid,
        email: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Failed login attempt
    LoginFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Refresh token rotated
    TokenRefresh {
        user_id: Uuid,
        email: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Refresh refused
    RefreshRejected {
        reason: String,
        ip_address: Option<String>,
    },

    /// Session explicitly ended by its owner
    SessionRevoked {
        user_id: Uuid,
        email: String,
        ip_address: Option<String>,
    },

    /// Access denied by the request guard
    AccessDenied {
        user_id: Option<Uuid>,
        email: Option<String>,
        resource: String,
        reason: String,
        ip_address: Option<String>,
    },

    /// Missing, invalid or expired access token
    InvalidToken {
        resource: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },
}

impl AuditEvent {
    /// Short human-readable label used as the log message
    pub fn label(&self) -> &'static str {
        match self {
            Self::RegistrationRequested { .. } => "Registration requested",
            Self::ConfirmationResent { .. } => "Confirmation resent",
            Self::RegistrationRejected { .. } => "Registration rejected",
            Self::AccountActivated { .. } => "Account activated",
            Self::ActivationFailed { .. } => "Activation failed",
            Self::LoginSuccess { .. } => "Login successful",
            Self::LoginFailure { .. } => "Login failed",
            Self::TokenRefresh { .. } => "Token refresh",
            Self::RefreshRejected { .. } => "Token refresh rejected",
            Self::SessionRevoked { .. } => "Session revoked",
            Self::AccessDenied { .. } => "Access denied",
            Self::InvalidToken { .. } => "Invalid token",
        }
    }

    fn ip_address(&self) -> Option<&str> {
        match self {
            Self::RegistrationRequested { ip_address, .. }
            | Self::ConfirmationResent { ip_address, .. }
            | Self::RegistrationRejected { ip_address, .. }
            | Self::LoginSuccess { ip_address, .. }
            | Self::LoginFailure { ip_address, .. }
            | Self::TokenRefresh { ip_address, .. }
            | Self::RefreshRejected { ip_address, .. }
            | Self::SessionRevoked { ip_address, .. }
            | Self::AccessDenied { ip_address, .. }
            | Self::InvalidToken { ip_address, .. } => ip_address.as_deref(),
            Self::AccountActivated { .. } | Self::ActivationFailed { .. } => None,
        }
    }
}

/// Log a security audit event with structured fields
///
/// Example output with the JSON formatter:
///
/// ```json
/// {
///   "timestamp": "2025-12-24T10:30:00Z",
///   "event": "{\"event_type\":\"login_success\",\"user_id\":\"550e8400-...\",...}",
///   "ip_address": "192.168.1.1",
///   "message": "Login successful"
/// }
/// ```
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    info!(
        target: "audit",
        timestamp = %timestamp,
        event = %event_json,
        ip_address = ?event.ip_address(),
        "{}",
        event.label()
    );
}

/// Extract IP address from request headers
///
/// Checks X-Forwarded-For, then X-Real-IP. Connection info is the caller's
/// fallback.
pub fn extract_ip_address(headers: &axum::http::HeaderMap) -> Option<String> {
    // First hop of X-Forwarded-For is the client
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.trim().to_string());
        }
    }

    None
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginSuccess {
            user_id: Uuid::new_v4(),
            email: "test@example.com".to_string(),
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("login_success"));
        assert!(json.contains("test@example.com"));
    }

    #[test]
    fn test_audit_log_login_failure() {
        // Must not panic
        let event = AuditEvent::LoginFailure {
            email: "test@example.com".to_string(),
            reason: "invalid credentials".to_string(),
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: Some("Test Agent".to_string()),
        };

        audit_log(&event);
        assert_eq!(event.ip_address(), Some("192.168.1.1"));
    }

    #[test]
    fn test_activation_events_have_no_ip() {
        let event = AuditEvent::ActivationFailed {
            email: None,
            reason: "unknown token".to_string(),
        };
        assert_eq!(event.ip_address(), None);
        assert_eq!(event.label(), "Activation failed");
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        let ip = extract_ip_address(&headers);
        assert_eq!(ip, Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.1".parse().unwrap());

        let ip = extract_ip_address(&headers);
        assert_eq!(ip, Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_user_agent() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            "Mozilla/5.0 (Test)".parse().unwrap(),
        );

        let ua = extract_user_agent(&headers);
        assert_eq!(ua, Some("Mozilla/5.0 (Test)".to_string()));
    }

    #[test]
    fn test_extract_missing_headers() {
        let headers = axum::http::HeaderMap::new();

        assert_eq!(extract_ip_address(&headers), None);
        assert_eq!(extract_user_agent(&headers), None);
    }
}
