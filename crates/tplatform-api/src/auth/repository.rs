//! Persistence capabilities consumed by the authentication service
//!
//! The service never talks to a database directly. It holds one
//! [`AuthStore`], which bundles the three per-entity capabilities:
//! - [`UserStore`]: activated accounts
//! - [`RegistrationStore`]: pending signups keyed by activation token
//! - [`SessionStore`]: refresh-token-backed sessions
//!
//! Every method that touches more than one row is a single atomic unit in
//! each implementation. Lookups return `Ok(None)` for absent rows; mutations
//! that must find a row report [`RepositoryError::NotFound`].

use super::models::{Registration, Session, User};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Repository errors
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("[{op}] {entity} not found")]
    NotFound {
        entity: &'static str,
        op: &'static str,
    },

    #[error("[{op}] {message}")]
    Conflict { message: String, op: &'static str },

    #[error("[{op}] database error: {source}")]
    Database {
        op: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, op: &'static str) -> Self {
        Self::NotFound { entity, op }
    }

    pub fn conflict(message: impl Into<String>, op: &'static str) -> Self {
        Self::Conflict {
            message: message.into(),
            op,
        }
    }

    /// Classify a driver error, turning unique violations into conflicts
    pub fn database(source: sqlx::Error, op: &'static str) -> Self {
        if is_unique_violation(&source) {
            return Self::conflict("duplicate key", op);
        }
        Self::Database { op, source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, op } => {
                AppError::not_found(format!("{entity} not found"), op)
            }
            RepositoryError::Conflict { message, op } => AppError::conflict(message, op),
            RepositoryError::Database { op, source } => AppError::internal(source, op),
        }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Activated accounts
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    /// Set `last_login_at`; `NotFound` if the user is gone
    async fn touch_last_login(&self, user_id: Uuid, at: DateTime<Utc>)
        -> Result<(), RepositoryError>;
}

/// Pending signups
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Deactivate every live registration for the same email, then insert
    /// `registration`. Both steps commit together.
    async fn create_registration(&self, registration: &Registration)
        -> Result<(), RepositoryError>;

    async fn find_registration_by_token(
        &self,
        activation_token: &str,
    ) -> Result<Option<Registration>, RepositoryError>;

    /// The live registration for `email` at `now`, if any
    async fn find_live_registration_by_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Registration>, RepositoryError>;

    /// Insert `user` and mark registration `registration_id` activated at
    /// `user.created_at`, atomically.
    ///
    /// Fails with `NotFound` when the registration is no longer live at that
    /// instant (already activated, superseded or expired) and with `Conflict`
    /// when the email already belongs to an account. Neither write is
    /// applied on failure.
    async fn activate_registration(
        &self,
        registration_id: Uuid,
        user: &User,
    ) -> Result<User, RepositoryError>;
}

/// Refresh-token-backed sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_session_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, RepositoryError>;

    /// Insert `session` and set the owner's `last_login_at` to
    /// `session.created_at`, atomically.
    async fn create_session(&self, session: &Session) -> Result<(), RepositoryError>;

    /// Delete the session holding `old_refresh_token`, insert `session` and
    /// touch the owner's `last_login_at`, atomically.
    ///
    /// The delete runs first; if no row was deleted (unknown token, or a
    /// concurrent rotation got there first) the call fails with `NotFound`
    /// and nothing is inserted.
    async fn rotate_session(
        &self,
        old_refresh_token: &str,
        session: &Session,
    ) -> Result<(), RepositoryError>;

    /// Delete the session holding `refresh_token` if it belongs to
    /// `user_id`; `NotFound` otherwise.
    async fn delete_session(&self, refresh_token: &str, user_id: Uuid)
        -> Result<(), RepositoryError>;
}

/// Everything the authentication service needs from persistence
pub trait AuthStore: UserStore + RegistrationStore + SessionStore {}

impl<T> AuthStore for T where T: UserStore + RegistrationStore + SessionStore {}
