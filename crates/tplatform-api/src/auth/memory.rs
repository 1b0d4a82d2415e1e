//! In-memory [`AuthStore`](super::repository::AuthStore) implementation
//!
//! All three tables live behind one `tokio::sync::Mutex`, so every method is
//! atomic with respect to every other. Used by the test router and unit
//! tests; it keeps no data across restarts.

use super::models::{Registration, Session, User};
use super::repository::{RegistrationStore, RepositoryError, SessionStore, UserStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    registrations: Vec<Registration>,
    sessions: HashMap<String, Session>,
}

impl Tables {
    fn email_taken(&self, email: &str) -> bool {
        self.users.values().any(|u| u.email == email)
    }

    fn touch(&mut self, user_id: Uuid, at: DateTime<Utc>) -> bool {
        match self.users.get_mut(&user_id) {
            Some(user) => {
                user.last_login_at = Some(at);
                user.updated_at = at;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuthRepository {
    tables: Mutex<Tables>,
}

impl InMemoryAuthRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All registrations for `email`, oldest first
    pub async fn registrations_for(&self, email: &str) -> Vec<Registration> {
        let tables = self.tables.lock().await;
        tables
            .registrations
            .iter()
            .filter(|r| r.email == email)
            .cloned()
            .collect()
    }

    pub async fn user_count(&self) -> usize {
        self.tables.lock().await.users.len()
    }

    pub async fn session_count(&self) -> usize {
        self.tables.lock().await.sessions.len()
    }

    /// Apply `f` to the registration holding `activation_token`
    pub async fn update_registration<F>(&self, activation_token: &str, f: F) -> bool
    where
        F: FnOnce(&mut Registration),
    {
        let mut tables = self.tables.lock().await;
        match tables
            .registrations
            .iter_mut()
            .find(|r| r.activation_token == activation_token)
        {
            Some(registration) => {
                f(registration);
                true
            }
            None => false,
        }
    }

    /// Apply `f` to the user with `email`
    pub async fn update_user<F>(&self, email: &str, f: F) -> bool
    where
        F: FnOnce(&mut User),
    {
        let mut tables = self.tables.lock().await;
        match tables.users.values_mut().find(|u| u.email == email) {
            Some(user) => {
                f(user);
                true
            }
            None => false,
        }
    }

    /// Apply `f` to the session holding `refresh_token`
    pub async fn update_session<F>(&self, refresh_token: &str, f: F) -> bool
    where
        F: FnOnce(&mut Session),
    {
        let mut tables = self.tables.lock().await;
        match tables.sessions.get_mut(refresh_token) {
            Some(session) => {
                f(session);
                true
            }
            None => false,
        }
    }

    pub async fn remove_user(&self, email: &str) -> Option<User> {
        let mut tables = self.tables.lock().await;
        let id = tables.users.values().find(|u| u.email == email)?.id;
        tables.users.remove(&id)
    }
}

#[async_trait]
impl UserStore for InMemoryAuthRepository {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn touch_last_login(
        &self,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if self.tables.lock().await.touch(user_id, at) {
            Ok(())
        } else {
            Err(RepositoryError::not_found("user", "UserStore::touch_last_login"))
        }
    }
}

#[async_trait]
impl RegistrationStore for InMemoryAuthRepository {
    async fn create_registration(
        &self,
        registration: &Registration,
    ) -> Result<(), RepositoryError> {
        const OP: &str = "RegistrationStore::create_registration";
        let mut tables = self.tables.lock().await;

        if tables
            .registrations
            .iter()
            .any(|r| r.activation_token == registration.activation_token)
        {
            return Err(RepositoryError::conflict("duplicate activation token", OP));
        }

        for existing in tables
            .registrations
            .iter_mut()
            .filter(|r| r.email == registration.email && r.is_active && r.activated_at.is_none())
        {
            existing.is_active = false;
        }

        tables.registrations.push(registration.clone());
        Ok(())
    }

    async fn find_registration_by_token(
        &self,
        activation_token: &str,
    ) -> Result<Option<Registration>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .registrations
            .iter()
            .find(|r| r.activation_token == activation_token)
            .cloned())
    }

    async fn find_live_registration_by_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Registration>, RepositoryError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .registrations
            .iter()
            .rev()
            .find(|r| r.email == email && r.is_live_at(now))
            .cloned())
    }

    async fn activate_registration(
        &self,
        registration_id: Uuid,
        user: &User,
    ) -> Result<User, RepositoryError> {
        const OP: &str = "RegistrationStore::activate_registration";
        let now = user.created_at;
        let mut tables = self.tables.lock().await;

        let Some(index) = tables
            .registrations
            .iter()
            .position(|r| r.id == registration_id && r.is_live_at(now))
        else {
            return Err(RepositoryError::not_found("registration", OP));
        };

        if tables.email_taken(&user.email) {
            return Err(RepositoryError::conflict("email taken", OP));
        }

        let registration = &mut tables.registrations[index];
        registration.activated_at = Some(now);
        registration.is_active = false;

        tables.users.insert(user.id, user.clone());
        Ok(user.clone())
    }
}

#[async_trait]
impl SessionStore for InMemoryAuthRepository {
    async fn find_session_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<Session>, RepositoryError> {
        Ok(self.tables.lock().await.sessions.get(refresh_token).cloned())
    }

    async fn create_session(&self, session: &Session) -> Result<(), RepositoryError> {
        const OP: &str = "SessionStore::create_session";
        let mut tables = self.tables.lock().await;

        if !tables.users.contains_key(&session.user_id) {
            return Err(RepositoryError::not_found("user", OP));
        }
        if tables.sessions.contains_key(&session.refresh_token) {
            return Err(RepositoryError::conflict("duplicate refresh token", OP));
        }

        tables.touch(session.user_id, session.created_at);
        tables
            .sessions
            .insert(session.refresh_token.clone(), session.clone());
        Ok(())
    }

    async fn rotate_session(
        &self,
        old_refresh_token: &str,
        session: &Session,
    ) -> Result<(), RepositoryError> {
        const OP: &str = "SessionStore::rotate_session";
        let mut tables = self.tables.lock().await;

        let owned = tables
            .sessions
            .get(old_refresh_token)
            .is_some_and(|old| old.user_id == session.user_id);
        if !owned {
            return Err(RepositoryError::not_found("session", OP));
        }
        if tables.sessions.contains_key(&session.refresh_token) {
            return Err(RepositoryError::conflict("duplicate refresh token", OP));
        }

        tables.sessions.remove(old_refresh_token);
        tables.touch(session.user_id, session.created_at);
        tables
            .sessions
            .insert(session.refresh_token.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(
        &self,
        refresh_token: &str,
        user_id: Uuid,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().await;

        let owned = tables
            .sessions
            .get(refresh_token)
            .is_some_and(|s| s.user_id == user_id);
        if !owned {
            return Err(RepositoryError::not_found(
                "session",
                "SessionStore::delete_session",
            ));
        }

        tables.sessions.remove(refresh_token);
        Ok(())
    }
}
