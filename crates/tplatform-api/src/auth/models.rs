//! Domain models for the authentication subsystem
//!
//! - Registration: a pending signup waiting for email activation
//! - User: an activated account
//! - Session: a refresh-token-backed login
//! - CurrentUser: the identity claim set carried by access tokens
//!
//! Rows are owned by the persistence layer; the service only holds them for
//! the duration of a request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Pending signup
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Registration {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
    pub expired_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    /// Opaque unique token mailed to the registrant
    pub activation_token: String,
    /// Five digit code checked together with the token
    pub verify_code: String,
}

impl Registration {
    /// Not activated, not superseded and not expired at `now`
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.activated_at.is_none() && now < self.expired_at && self.is_active
    }
}

/// Activated account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Never serialized in API responses
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub is_active: bool,
    pub is_admin: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Build the account created by a successful activation
    pub fn from_registration(registration: &Registration, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: registration.name.clone(),
            email: registration.email.clone(),
            password_hash: registration.password_hash.clone(),
            is_active: true,
            is_admin: false,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Identity claims for an access token
    pub fn current_user(&self) -> CurrentUser {
        CurrentUser {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            is_active: self.is_active,
            is_admin: self.is_admin,
        }
    }
}

/// Refresh-token-backed session
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Single-use bearer capability
    pub refresh_token: String,
    pub user_agent: String,
    pub ip_address: String,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expired_at
    }
}

/// Identity attached to authenticated requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CurrentUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub is_admin: bool,
}

/// Result of a login or a refresh
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}
