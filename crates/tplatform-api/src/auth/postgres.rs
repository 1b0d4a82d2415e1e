//! PostgreSQL [`AuthStore`](super::repository::AuthStore) implementation
//!
//! Queries are plain runtime-checked `sqlx` statements. Multi-row mutations
//! run in one transaction at the default READ COMMITTED level. The row
//! locks taken by the leading `UPDATE`/`DELETE` serialize concurrent
//! activations and rotations of the same row. Registrations have no row to
//! lock before the insert, so they take a transaction-scoped advisory lock
//! keyed by the email instead.

use super::models::{Registration, Session, User};
use super::repository::{RegistrationStore, RepositoryError, SessionStore, UserStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, name, email, password_hash, is_active, is_admin, last_login_at, created_at, updated_at";

const REGISTRATION_COLUMNS: &str = "id, name, email, password_hash, ip_address, user_agent, \
     created_at, is_active, expired_at, activated_at, activation_token, verify_code";

const SESSION_COLUMNS: &str =
    "id, user_id, refresh_token, user_agent, ip_address, expired_at, created_at";

/// sqlx-backed auth repository
#[derive(Debug, Clone)]
pub struct PgAuthRepository {
    pool: PgPool,
}

impl PgAuthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self, op: &'static str) -> Result<Transaction<'static, Postgres>, RepositoryError> {
        self.pool
            .begin()
            .await
            .map_err(|e| RepositoryError::database(e, op))
    }
}

async fn touch_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    at: DateTime<Utc>,
    op: &'static str,
) -> Result<(), RepositoryError> {
    let result = sqlx::query("UPDATE users SET last_login_at = $2, updated_at = $2 WHERE id = $1")
        .bind(user_id)
        .bind(at)
        .execute(&mut **tx)
        .await
        .map_err(|e| RepositoryError::database(e, op))?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::not_found("user", op));
    }
    Ok(())
}

async fn insert_session(
    tx: &mut Transaction<'_, Postgres>,
    session: &Session,
    op: &'static str,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO sessions (id, user_id, refresh_token, user_agent, ip_address, expired_at, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(session.id)
    .bind(session.user_id)
    .bind(&session.refresh_token)
    .bind(&session.user_agent)
    .bind(&session.ip_address)
    .bind(session.expired_at)
    .bind(session.created_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| RepositoryError::database(e, op))?;
    Ok(())
}

#[async_trait]
impl UserStore for PgAuthRepository {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::database(e, "UserStore::find_user_by_email"))
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::database(e, "UserStore::find_user_by_id"))
    }

    async fn touch_last_login(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        const OP: &str = "UserStore::touch_last_login";
        let result =
            sqlx::query("UPDATE users SET last_login_at = $2, updated_at = $2 WHERE id = $1")
                .bind(user_id)
                .bind(at)
                .execute(&self.pool)
                .await
                .map_err(|e| RepositoryError::database(e, OP))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::not_found("user", OP));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistrationStore for PgAuthRepository {
    async fn create_registration(
        &self,
        registration: &Registration,
    ) -> Result<(), RepositoryError> {
        const OP: &str = "RegistrationStore::create_registration";
        let mut tx = self.begin(OP).await?;

        // Held until commit; serializes supersede-then-insert per email
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&registration.email)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::database(e, OP))?;

        let superseded = sqlx::query(
            "UPDATE registrations SET is_active = FALSE \
             WHERE email = $1 AND is_active AND activated_at IS NULL",
        )
        .bind(&registration.email)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::database(e, OP))?
        .rows_affected();

        sqlx::query(&format!(
            "INSERT INTO registrations ({REGISTRATION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
        ))
        .bind(registration.id)
        .bind(&registration.name)
        .bind(&registration.email)
        .bind(&registration.password_hash)
        .bind(&registration.ip_address)
        .bind(&registration.user_agent)
        .bind(registration.created_at)
        .bind(registration.is_active)
        .bind(registration.expired_at)
        .bind(registration.activated_at)
        .bind(&registration.activation_token)
        .bind(&registration.verify_code)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::database(e, OP))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::database(e, OP))?;

        tracing::debug!(op = OP, superseded, "registration stored");
        Ok(())
    }

    async fn find_registration_by_token(
        &self,
        activation_token: &str,
    ) -> Result<Option<Registration>, RepositoryError> {
        sqlx::query_as::<_, Registration>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE activation_token = $1"
        ))
        .bind(activation_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::database(e, "RegistrationStore::find_registration_by_token"))
    }

    async fn find_live_registration_by_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Registration>, RepositoryError> {
        sqlx::query_as::<_, Registration>(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations \
             WHERE email = $1 AND is_active AND activated_at IS NULL AND expired_at > $2 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(email)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            RepositoryError::database(e, "RegistrationStore::find_live_registration_by_email")
        })
    }

    async fn activate_registration(
        &self,
        registration_id: Uuid,
        user: &User,
    ) -> Result<User, RepositoryError> {
        const OP: &str = "RegistrationStore::activate_registration";
        let now = user.created_at;
        let mut tx = self.begin(OP).await?;

        let claimed = sqlx::query(
            "UPDATE registrations SET is_active = FALSE, activated_at = $2 \
             WHERE id = $1 AND is_active AND activated_at IS NULL AND expired_at > $2",
        )
        .bind(registration_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::database(e, OP))?
        .rows_affected();

        if claimed == 0 {
            return Err(RepositoryError::not_found("registration", OP));
        }

        let created = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(user.is_admin)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match RepositoryError::database(e, OP) {
            RepositoryError::Conflict { op, .. } => RepositoryError::conflict("email taken", op),
            other => other,
        })?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::database(e, OP))?;

        Ok(created)
    }
}

#[async_trait]
impl SessionStore for PgAuthRepository {
    async fn find_session_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, RepositoryError> {
        sqlx::query_as::<_, Session>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token = $1"
        ))
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::database(e, "SessionStore::find_session_by_refresh_token"))
    }

    async fn create_session(&self, session: &Session) -> Result<(), RepositoryError> {
        const OP: &str = "SessionStore::create_session";
        let mut tx = self.begin(OP).await?;

        touch_in_tx(&mut tx, session.user_id, session.created_at, OP).await?;
        insert_session(&mut tx, session, OP).await?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::database(e, OP))
    }

    async fn rotate_session(
        &self,
        old_refresh_token: &str,
        session: &Session,
    ) -> Result<(), RepositoryError> {
        const OP: &str = "SessionStore::rotate_session";
        let mut tx = self.begin(OP).await?;

        let deleted = sqlx::query("DELETE FROM sessions WHERE refresh_token = $1 AND user_id = $2")
            .bind(old_refresh_token)
            .bind(session.user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::database(e, OP))?
            .rows_affected();

        if deleted == 0 {
            return Err(RepositoryError::not_found("session", OP));
        }

        insert_session(&mut tx, session, OP).await?;
        touch_in_tx(&mut tx, session.user_id, session.created_at, OP).await?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::database(e, OP))
    }

    async fn delete_session(
        &self,
        refresh_token: &str,
        user_id: Uuid,
    ) -> Result<(), RepositoryError> {
        const OP: &str = "SessionStore::delete_session";
        let deleted = sqlx::query("DELETE FROM sessions WHERE refresh_token = $1 AND user_id = $2")
            .bind(refresh_token)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::database(e, OP))?
            .rows_affected();

        if deleted == 0 {
            return Err(RepositoryError::not_found("session", OP));
        }
        Ok(())
    }
}
