//! Authentication service
//!
//! Drives a credential through its lifecycle:
//! pending registration -> activated account -> session -> rotated or
//! revoked session.
//!
//! The service owns no state of its own. Persistence, hashing, token signing
//! and email delivery are injected capabilities, and every multi-row change
//! is delegated to a single atomic store call. Causes of failure are logged
//! here; callers only ever see the generic messages below.

use super::email::EmailSender;
use super::jwt::{JwtCodec, TokenCodec};
use super::models::{CurrentUser, Registration, Session, SessionResponse, User};
use super::password::{Argon2Hasher, CredentialHasher, PasswordError};
use super::repository::AuthStore;
use super::tasks::DetachedTasks;
use crate::audit::{audit_log, AuditEvent};
use crate::error::AppError;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tplatform_core::config::MAX_TTL_SECS;
use tplatform_core::AuthConfig;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

pub const INVALID_CREDENTIALS: &str = "invalid credentials";
pub const ACCOUNT_BLOCKED: &str = "account blocked";
pub const EMAIL_TAKEN: &str = "email taken";
pub const LINK_EXPIRED: &str = "activation link expired, register again";
pub const WRONG_CODE: &str = "wrong verification code";
pub const TOKEN_EXPIRED: &str = "token expired";
pub const PASSWORD_LENGTH: &str = "password must be 5 to 15 characters";

/// Registration request
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
#[serde(default)]
pub struct RegisterRequest {
    /// Display name; defaults to the email when empty
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 5, max = 15))]
    pub password: String,
}

impl RegisterRequest {
    fn normalized(mut self) -> Self {
        self.email = normalize_email(&self.email);
        let name = self.name.trim();
        self.name = if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        };
        self
    }
}

/// Login request
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
#[serde(default)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 5, max = 15))]
    pub password: String,
}

/// Activation request body; the token travels in the path
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
#[serde(default)]
pub struct ActivateRequest {
    #[validate(length(min = 1))]
    pub code: String,
}

/// Refresh or logout request
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
#[serde(default)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

/// Where a request came from, recorded on registrations and sessions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    fn ip(&self) -> String {
        self.ip_address.clone().unwrap_or_default()
    }

    fn agent(&self) -> String {
        self.user_agent.clone().unwrap_or_default()
    }
}

/// Session lifecycle durations
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub access_token_ttl: std::time::Duration,
    pub refresh_token_ttl: Duration,
    pub registration_ttl: Duration,
    pub resend_window: Duration,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for AuthPolicy {
    fn from(config: &AuthConfig) -> Self {
        Self {
            access_token_ttl: std::time::Duration::from_secs(config.access_token_ttl_secs),
            refresh_token_ttl: seconds(config.refresh_token_ttl_secs),
            registration_ttl: seconds(config.registration_ttl_secs),
            resend_window: seconds(config.resend_window_secs),
        }
    }
}

fn seconds(secs: u64) -> Duration {
    let secs = i64::try_from(secs.min(MAX_TTL_SECS)).unwrap_or(i64::MAX);
    Duration::seconds(secs)
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    hasher: Arc<dyn CredentialHasher>,
    tokens: Arc<dyn TokenCodec>,
    email: Arc<dyn EmailSender>,
    tasks: DetachedTasks,
    policy: AuthPolicy,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        hasher: Arc<dyn CredentialHasher>,
        tokens: Arc<dyn TokenCodec>,
        email: Arc<dyn EmailSender>,
        policy: AuthPolicy,
    ) -> Self {
        Self {
            store,
            hasher,
            tokens,
            email,
            tasks: DetachedTasks::new(),
            policy,
        }
    }

    /// Build the production service: Argon2id hashing and HS256 tokens
    /// configured from `config`
    pub fn from_config(
        config: &AuthConfig,
        store: Arc<dyn AuthStore>,
        email: Arc<dyn EmailSender>,
    ) -> Result<Self, PasswordError> {
        let hasher = Argon2Hasher::new(&config.password)?;
        Ok(Self::new(
            store,
            Arc::new(hasher),
            Arc::new(JwtCodec::new(config.jwt_secret.clone())),
            email,
            AuthPolicy::from(config),
        ))
    }

    /// Start a registration, or resend the confirmation of a recent one
    ///
    /// Succeeds without creating anything when a live registration for the
    /// same email was created inside the resend window. Otherwise stores a
    /// new pending registration, superseding older live ones, and mails
    /// its activation token and code.
    pub async fn register(
        &self,
        request: RegisterRequest,
        client: &ClientInfo,
    ) -> Result<(), AppError> {
        const OP: &str = "AuthService::register";

        let request = request.normalized();
        request.validate().map_err(|e| {
            let message = if has_field_error(&e, "email") {
                "invalid email format"
            } else {
                PASSWORD_LENGTH
            };
            AppError::validation(message, OP)
        })?;

        if self.store.find_user_by_email(&request.email).await?.is_some() {
            tracing::warn!(op = OP, email = %request.email, "registration for taken email");
            audit_log(&AuditEvent::RegistrationRejected {
                email: request.email,
                reason: EMAIL_TAKEN.to_string(),
                ip_address: client.ip_address.clone(),
            });
            return Err(AppError::conflict(EMAIL_TAKEN, OP));
        }

        let now = Utc::now();
        if let Some(live) = self
            .store
            .find_live_registration_by_email(&request.email, now)
            .await?
        {
            if now - live.created_at < self.policy.resend_window {
                tracing::info!(op = OP, email = %live.email, "resending confirmation");
                audit_log(&AuditEvent::ConfirmationResent {
                    email: live.email.clone(),
                    ip_address: client.ip_address.clone(),
                });
                self.send_confirmation(live);
                return Ok(());
            }
        }

        let password_hash = self.hash_password(request.password, OP).await?;

        let registration = Registration {
            id: Uuid::new_v4(),
            name: request.name,
            email: request.email,
            password_hash,
            ip_address: client.ip(),
            user_agent: client.agent(),
            created_at: now,
            is_active: true,
            expired_at: now + self.policy.registration_ttl,
            activated_at: None,
            activation_token: generate_opaque_token(),
            verify_code: generate_verify_code(),
        };

        self.store.create_registration(&registration).await?;

        tracing::info!(op = OP, email = %registration.email, "registration stored");
        audit_log(&AuditEvent::RegistrationRequested {
            email: registration.email.clone(),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        });
        self.send_confirmation(registration);

        Ok(())
    }

    /// Turn a live registration into an account
    ///
    /// Unknown, used, superseded and expired links all fail with the same
    /// message. A wrong code leaves the registration untouched.
    pub async fn activate(&self, activation_token: &str, code: &str) -> Result<User, AppError> {
        const OP: &str = "AuthService::activate";

        let Some(registration) = self
            .store
            .find_registration_by_token(activation_token)
            .await?
        else {
            tracing::warn!(op = OP, "activation with unknown token");
            return Err(self.activation_failed(None, "unknown token", LINK_EXPIRED, OP));
        };

        let now = Utc::now();
        if !registration.is_live_at(now) {
            tracing::warn!(
                op = OP,
                email = %registration.email,
                expired_at = %registration.expired_at,
                "activation of a registration that is no longer live"
            );
            return Err(self.activation_failed(
                Some(registration.email),
                "registration not live",
                LINK_EXPIRED,
                OP,
            ));
        }

        if registration.verify_code != code {
            tracing::warn!(op = OP, email = %registration.email, "wrong verification code");
            return Err(self.activation_failed(
                Some(registration.email),
                "wrong code",
                WRONG_CODE,
                OP,
            ));
        }

        let user = User::from_registration(&registration, now);
        let user = match self.store.activate_registration(registration.id, &user).await {
            Ok(user) => user,
            // Lost a race with another activation or with expiry
            Err(err) if err.is_not_found() => {
                return Err(self.activation_failed(
                    Some(registration.email),
                    "registration not live",
                    LINK_EXPIRED,
                    OP,
                ));
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(op = OP, user_id = %user.id, email = %user.email, "account activated");
        audit_log(&AuditEvent::AccountActivated {
            user_id: user.id,
            email: user.email.clone(),
        });

        Ok(user)
    }

    /// Exchange email and password for an access token and a session
    ///
    /// The password is always run through the hasher, against a dummy hash
    /// when the email is unknown, and both failure causes share one message.
    pub async fn login(
        &self,
        request: LoginRequest,
        client: &ClientInfo,
    ) -> Result<SessionResponse, AppError> {
        const OP: &str = "AuthService::login";

        let request = LoginRequest {
            email: normalize_email(&request.email),
            password: request.password,
        };
        request.validate().map_err(|e| {
            let message = if has_field_error(&e, "email") {
                "invalid email format"
            } else {
                PASSWORD_LENGTH
            };
            AppError::validation(message, OP)
        })?;

        let user = self.store.find_user_by_email(&request.email).await?;
        let hash = match &user {
            Some(user) => user.password_hash.clone(),
            None => self.hasher.dummy_hash().to_string(),
        };
        let matched = self.verify_password(request.password, hash, OP).await?;

        let user = match user {
            Some(user) if matched => user,
            _ => {
                tracing::warn!(op = OP, email = %request.email, "invalid credentials");
                audit_log(&AuditEvent::LoginFailure {
                    email: request.email,
                    reason: INVALID_CREDENTIALS.to_string(),
                    ip_address: client.ip_address.clone(),
                    user_agent: client.user_agent.clone(),
                });
                return Err(AppError::validation(INVALID_CREDENTIALS, OP));
            }
        };

        if !user.is_active {
            tracing::warn!(op = OP, user_id = %user.id, "login to blocked account");
            audit_log(&AuditEvent::LoginFailure {
                email: user.email,
                reason: ACCOUNT_BLOCKED.to_string(),
                ip_address: client.ip_address.clone(),
                user_agent: client.user_agent.clone(),
            });
            return Err(AppError::validation(ACCOUNT_BLOCKED, OP));
        }

        let (access_token, session) = self.new_session(&user, client, OP)?;
        self.store.create_session(&session).await?;

        let user_id = user.id;
        let login_at = session.created_at;
        let store = self.store.clone();
        self.tasks.spawn(OP, async move {
            store
                .touch_last_login(user_id, login_at)
                .await
                .map_err(anyhow::Error::from)
        });

        tracing::info!(op = OP, user_id = %user.id, "login successful");
        audit_log(&AuditEvent::LoginSuccess {
            user_id: user.id,
            email: user.email.clone(),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        });

        Ok(session_response(user, access_token, session))
    }

    /// Rotate a refresh token
    ///
    /// The presented token stops working the moment the new one is issued;
    /// of two concurrent rotations of the same token exactly one succeeds.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientInfo,
    ) -> Result<SessionResponse, AppError> {
        const OP: &str = "AuthService::refresh";

        if refresh_token.is_empty() {
            return Err(AppError::validation(INVALID_CREDENTIALS, OP));
        }

        let Some(current) = self
            .store
            .find_session_by_refresh_token(refresh_token)
            .await?
        else {
            tracing::warn!(op = OP, "refresh with unknown token");
            return Err(self.refresh_rejected(INVALID_CREDENTIALS, client, OP));
        };

        let now = Utc::now();
        if current.is_expired_at(now) {
            tracing::warn!(op = OP, user_id = %current.user_id, "refresh with expired session");
            return Err(self.refresh_rejected(TOKEN_EXPIRED, client, OP));
        }

        let Some(user) = self.store.find_user_by_id(current.user_id).await? else {
            tracing::error!(op = OP, user_id = %current.user_id, "session owner does not exist");
            return Err(AppError::unauthorized(OP));
        };

        if !user.is_active {
            tracing::warn!(op = OP, user_id = %user.id, "refresh for blocked account");
            return Err(self.refresh_rejected(ACCOUNT_BLOCKED, client, OP));
        }

        let (access_token, session) = self.new_session(&user, client, OP)?;
        match self.store.rotate_session(refresh_token, &session).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                tracing::warn!(op = OP, user_id = %user.id, "refresh token already rotated");
                return Err(self.refresh_rejected(INVALID_CREDENTIALS, client, OP));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(op = OP, user_id = %user.id, "refresh token rotated");
        audit_log(&AuditEvent::TokenRefresh {
            user_id: user.id,
            email: user.email.clone(),
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
        });

        Ok(session_response(user, access_token, session))
    }

    /// End the caller's session holding `refresh_token`
    pub async fn revoke_session(
        &self,
        refresh_token: &str,
        identity: &CurrentUser,
        client: &ClientInfo,
    ) -> Result<(), AppError> {
        const OP: &str = "AuthService::revoke_session";

        match self.store.delete_session(refresh_token, identity.id).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                tracing::warn!(op = OP, user_id = %identity.id, "revoke of unknown session");
                return Err(AppError::validation(INVALID_CREDENTIALS, OP));
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(op = OP, user_id = %identity.id, "session revoked");
        audit_log(&AuditEvent::SessionRevoked {
            user_id: identity.id,
            email: identity.email.clone(),
            ip_address: client.ip_address.clone(),
        });
        Ok(())
    }

    /// Verify an access token. Every failure is the same `Unauthorized`.
    pub fn verify_access(&self, token: &str) -> Result<CurrentUser, AppError> {
        const OP: &str = "AuthService::verify_access";

        self.tokens.verify(token).map_err(|e| {
            tracing::debug!(op = OP, error = %e, "access token rejected");
            AppError::unauthorized(OP)
        })
    }

    fn new_session(
        &self,
        user: &User,
        client: &ClientInfo,
        op: &'static str,
    ) -> Result<(String, Session), AppError> {
        let access_token = self
            .tokens
            .issue(&user.current_user(), self.policy.access_token_ttl)
            .map_err(|e| AppError::internal(e, op))?;

        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: user.id,
            refresh_token: generate_opaque_token(),
            user_agent: client.agent(),
            ip_address: client.ip(),
            expired_at: now + self.policy.refresh_token_ttl,
            created_at: now,
        };

        Ok((access_token, session))
    }

    fn send_confirmation(&self, registration: Registration) {
        let email = self.email.clone();
        self.tasks.spawn("AuthService::send_confirmation", async move {
            email.send_confirmation(&registration).await
        });
    }

    async fn hash_password(&self, password: String, op: &'static str) -> Result<String, AppError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AppError::internal(e, op))?
            .map_err(|e| AppError::internal(e, op))
    }

    async fn verify_password(
        &self,
        password: String,
        hash: String,
        op: &'static str,
    ) -> Result<bool, AppError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AppError::internal(e, op))
    }

    fn activation_failed(
        &self,
        email: Option<String>,
        reason: &str,
        message: &'static str,
        op: &'static str,
    ) -> AppError {
        audit_log(&AuditEvent::ActivationFailed {
            email,
            reason: reason.to_string(),
        });
        AppError::validation(message, op)
    }

    fn refresh_rejected(
        &self,
        message: &'static str,
        client: &ClientInfo,
        op: &'static str,
    ) -> AppError {
        audit_log(&AuditEvent::RefreshRejected {
            reason: message.to_string(),
            ip_address: client.ip_address.clone(),
        });
        AppError::validation(message, op)
    }
}

fn session_response(mut user: User, access_token: String, session: Session) -> SessionResponse {
    user.last_login_at = Some(session.created_at);
    SessionResponse {
        user,
        access_token,
        refresh_token: session.refresh_token,
    }
}

fn has_field_error(errors: &ValidationErrors, field: &str) -> bool {
    errors.field_errors().contains_key(field)
}

/// Lowercase and trim an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// 256 random bits, base64url without padding
fn generate_opaque_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Uniform five digit code in 10000..=99999
fn generate_verify_code() -> String {
    rand::thread_rng().gen_range(10_000..=99_999).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::email::RecordingEmailSender;
    use crate::auth::jwt::{Claims, SESSION_SUBJECT};
    use crate::auth::memory::InMemoryAuthRepository;
    use crate::auth::password::test_config;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &str = "service-test-secret-service-test-secret";

    /// Argon2 hasher that counts verifications
    struct CountingHasher {
        inner: Argon2Hasher,
        verifications: AtomicUsize,
    }

    impl CountingHasher {
        fn new() -> Self {
            Self {
                inner: Argon2Hasher::new(&test_config()).unwrap(),
                verifications: AtomicUsize::new(0),
            }
        }

        fn verifications(&self) -> usize {
            self.verifications.load(Ordering::SeqCst)
        }
    }

    impl CredentialHasher for CountingHasher {
        fn hash(&self, password: &str) -> Result<String, PasswordError> {
            self.inner.hash(password)
        }

        fn verify(&self, password: &str, hash: &str) -> bool {
            self.verifications.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(password, hash)
        }

        fn dummy_hash(&self) -> &str {
            self.inner.dummy_hash()
        }
    }

    struct Fixture {
        service: AuthService,
        repo: Arc<InMemoryAuthRepository>,
        emails: Arc<RecordingEmailSender>,
        hasher: Arc<CountingHasher>,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryAuthRepository::new());
        let emails = Arc::new(RecordingEmailSender::default());
        let hasher = Arc::new(CountingHasher::new());
        let service = AuthService::new(
            repo.clone(),
            hasher.clone(),
            Arc::new(JwtCodec::new(SECRET)),
            emails.clone(),
            AuthPolicy::default(),
        );
        Fixture {
            service,
            repo,
            emails,
            hasher,
        }
    }

    fn client() -> ClientInfo {
        ClientInfo {
            ip_address: Some("203.0.113.7".to_string()),
            user_agent: Some("test-agent".to_string()),
        }
    }

    fn register_request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: "Alice".to_string(),
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        }
    }

    async fn wait_for_emails(emails: &RecordingEmailSender, count: usize) {
        for _ in 0..200 {
            if emails.sent().len() >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("expected {count} confirmation emails, got {}", emails.sent().len());
    }

    /// Register and activate `email`, returning the new account
    async fn activated(f: &Fixture, email: &str, password: &str) -> User {
        f.service
            .register(register_request(email, password), &client())
            .await
            .unwrap();
        let registration = f.repo.registrations_for(email).await.pop().unwrap();
        f.service
            .activate(&registration.activation_token, &registration.verify_code)
            .await
            .unwrap()
    }

    fn assert_validation(err: &AppError, message: &str) {
        assert_eq!(err.kind(), "BAD_REQUEST", "{err}");
        assert_eq!(err.public_message(), message);
    }

    #[tokio::test]
    async fn test_end_to_end_session_lifecycle() {
        let f = fixture();

        f.service
            .register(register_request("alice@x.com", "pass1"), &client())
            .await
            .unwrap();

        let registration = f.repo.registrations_for("alice@x.com").await.remove(0);
        assert_eq!(registration.verify_code.len(), 5);

        let user = f
            .service
            .activate(&registration.activation_token, &registration.verify_code)
            .await
            .unwrap();
        assert_eq!(user.email, "alice@x.com");
        assert!(user.is_active);
        assert!(!user.is_admin);

        let session = f
            .service
            .login(login_request("alice@x.com", "pass1"), &client())
            .await
            .unwrap();
        assert!(!session.access_token.is_empty());
        assert!(!session.refresh_token.is_empty());
        assert_ne!(session.access_token, session.refresh_token);
        assert!(session.user.last_login_at.is_some());

        let rotated = f
            .service
            .refresh(&session.refresh_token, &client())
            .await
            .unwrap();
        assert_ne!(rotated.refresh_token, session.refresh_token);

        let replay = f
            .service
            .refresh(&session.refresh_token, &client())
            .await
            .unwrap_err();
        assert_validation(&replay, INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn test_rapid_reregistration_resends() {
        let f = fixture();

        for _ in 0..2 {
            f.service
                .register(register_request("alice@x.com", "pass1"), &client())
                .await
                .unwrap();
        }

        let rows = f.repo.registrations_for("alice@x.com").await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_live_at(Utc::now()));

        wait_for_emails(&f.emails, 2).await;
        let sent = f.emails.sent();
        assert_eq!(sent[0].activation_token, sent[1].activation_token);
    }

    #[tokio::test]
    async fn test_reregistration_after_window_supersedes() {
        let f = fixture();
        f.service
            .register(register_request("alice@x.com", "pass1"), &client())
            .await
            .unwrap();

        let first = f.repo.registrations_for("alice@x.com").await.remove(0);
        f.repo
            .update_registration(&first.activation_token, |r| {
                r.created_at = Utc::now() - Duration::minutes(16);
            })
            .await;

        f.service
            .register(register_request("alice@x.com", "pass2"), &client())
            .await
            .unwrap();

        let now = Utc::now();
        let rows = f.repo.registrations_for("alice@x.com").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|r| r.is_live_at(now)).count(), 1);
        assert!(!rows[0].is_live_at(now));

        let err = f
            .service
            .activate(&first.activation_token, &first.verify_code)
            .await
            .unwrap_err();
        assert_validation(&err, LINK_EXPIRED);
    }

    #[tokio::test]
    async fn test_register_normalizes_input() {
        let f = fixture();
        let request = RegisterRequest {
            name: "   ".to_string(),
            email: "  Alice@X.com ".to_string(),
            password: "pass1".to_string(),
        };
        f.service.register(request, &client()).await.unwrap();

        let rows = f.repo.registrations_for("alice@x.com").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "alice@x.com");
        assert_eq!(rows[0].ip_address, "203.0.113.7");
        assert_eq!(rows[0].user_agent, "test-agent");
        assert_ne!(rows[0].password_hash, "pass1");
    }

    #[tokio::test]
    async fn test_password_length_boundaries() {
        let f = fixture();
        let cases = [
            ("four@x.com", "abcd", false),
            ("five@x.com", "abcde", true),
            ("fifteen@x.com", "abcdefghijklmno", true),
            ("sixteen@x.com", "abcdefghijklmnop", false),
        ];

        for (email, password, accepted) in cases {
            let result = f
                .service
                .register(register_request(email, password), &client())
                .await;
            assert_eq!(result.is_ok(), accepted, "{password}");
            if let Err(err) = result {
                assert_validation(&err, PASSWORD_LENGTH);
            }
        }
    }

    #[tokio::test]
    async fn test_register_rejects_bad_email() {
        let f = fixture();
        let err = f
            .service
            .register(register_request("not-an-email", "pass1"), &client())
            .await
            .unwrap_err();
        assert_validation(&err, "invalid email format");
        assert!(f.repo.registrations_for("not-an-email").await.is_empty());
    }

    #[tokio::test]
    async fn test_register_taken_email_conflicts() {
        let f = fixture();
        activated(&f, "alice@x.com", "pass1").await;

        let err = f
            .service
            .register(register_request("alice@x.com", "other1"), &client())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CONFLICT");
        assert_eq!(err.public_message(), EMAIL_TAKEN);
    }

    #[tokio::test]
    async fn test_activation_failures_are_indistinguishable() {
        let f = fixture();

        // Already activated
        f.service
            .register(register_request("used@x.com", "pass1"), &client())
            .await
            .unwrap();
        let used = f.repo.registrations_for("used@x.com").await.remove(0);
        f.service
            .activate(&used.activation_token, &used.verify_code)
            .await
            .unwrap();

        // Expired
        f.service
            .register(register_request("expired@x.com", "pass1"), &client())
            .await
            .unwrap();
        let expired = f.repo.registrations_for("expired@x.com").await.remove(0);
        f.repo
            .update_registration(&expired.activation_token, |r| {
                r.expired_at = Utc::now() - Duration::seconds(1);
            })
            .await;

        // Superseded
        f.service
            .register(register_request("old@x.com", "pass1"), &client())
            .await
            .unwrap();
        let superseded = f.repo.registrations_for("old@x.com").await.remove(0);
        f.repo
            .update_registration(&superseded.activation_token, |r| r.is_active = false)
            .await;

        let attempts = [
            ("unknown-token".to_string(), "12345".to_string()),
            (used.activation_token, used.verify_code),
            (expired.activation_token, expired.verify_code),
            (superseded.activation_token, superseded.verify_code),
        ];

        for (token, code) in attempts {
            let err = f.service.activate(&token, &code).await.unwrap_err();
            assert_validation(&err, LINK_EXPIRED);
        }
        assert_eq!(f.repo.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_wrong_code_creates_no_user() {
        let f = fixture();
        f.service
            .register(register_request("alice@x.com", "pass1"), &client())
            .await
            .unwrap();
        let registration = f.repo.registrations_for("alice@x.com").await.remove(0);

        let wrong = if registration.verify_code == "10000" {
            "10001"
        } else {
            "10000"
        };
        let err = f
            .service
            .activate(&registration.activation_token, wrong)
            .await
            .unwrap_err();

        assert_validation(&err, WRONG_CODE);
        assert_eq!(f.repo.user_count().await, 0);

        let stored = f.repo.registrations_for("alice@x.com").await.remove(0);
        assert!(stored.is_live_at(Utc::now()));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let f = fixture();
        activated(&f, "alice@x.com", "pass1").await;
        let before = f.hasher.verifications();

        let unknown = f
            .service
            .login(login_request("nobody@x.com", "pass1"), &client())
            .await
            .unwrap_err();
        assert_eq!(f.hasher.verifications(), before + 1);

        let wrong = f
            .service
            .login(login_request("alice@x.com", "wrong1"), &client())
            .await
            .unwrap_err();
        assert_eq!(f.hasher.verifications(), before + 2);

        assert_eq!(unknown.kind(), wrong.kind());
        assert_eq!(unknown.public_message(), wrong.public_message());
        assert_validation(&unknown, INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn test_login_blocked_account() {
        let f = fixture();
        activated(&f, "alice@x.com", "pass1").await;
        f.repo
            .update_user("alice@x.com", |u| u.is_active = false)
            .await;

        let err = f
            .service
            .login(login_request("alice@x.com", "pass1"), &client())
            .await
            .unwrap_err();
        assert_validation(&err, ACCOUNT_BLOCKED);

        // Wrong password on a blocked account still reads as bad credentials
        let err = f
            .service
            .login(login_request("alice@x.com", "wrong1"), &client())
            .await
            .unwrap_err();
        assert_validation(&err, INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn test_login_access_token_carries_identity() {
        let f = fixture();
        let user = activated(&f, "alice@x.com", "pass1").await;

        let session = f
            .service
            .login(login_request("ALICE@x.com ", "pass1"), &client())
            .await
            .unwrap();

        let identity = f.service.verify_access(&session.access_token).unwrap();
        assert_eq!(identity, user.current_user());
        assert_eq!(f.repo.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_refresh_token_is_single_use() {
        let f = fixture();
        activated(&f, "alice@x.com", "pass1").await;
        let first = f
            .service
            .login(login_request("alice@x.com", "pass1"), &client())
            .await
            .unwrap();

        let second = f
            .service
            .refresh(&first.refresh_token, &client())
            .await
            .unwrap();
        assert!(f.service.verify_access(&second.access_token).is_ok());

        let third = f
            .service
            .refresh(&second.refresh_token, &client())
            .await
            .unwrap();

        for spent in [&first.refresh_token, &second.refresh_token] {
            let err = f.service.refresh(spent, &client()).await.unwrap_err();
            assert_validation(&err, INVALID_CREDENTIALS);
        }
        assert!(f.service.refresh(&third.refresh_token, &client()).await.is_ok());
        assert_eq!(f.repo.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_one_winner() {
        let f = fixture();
        activated(&f, "alice@x.com", "pass1").await;
        let session = f
            .service
            .login(login_request("alice@x.com", "pass1"), &client())
            .await
            .unwrap();

        let client = client();
        let (a, b) = tokio::join!(
            f.service.refresh(&session.refresh_token, &client),
            f.service.refresh(&session.refresh_token, &client),
        );

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        let loser = a.err().or(b.err()).unwrap();
        assert_validation(&loser, INVALID_CREDENTIALS);
        assert_eq!(f.repo.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_refresh_expired_session() {
        let f = fixture();
        activated(&f, "alice@x.com", "pass1").await;
        let session = f
            .service
            .login(login_request("alice@x.com", "pass1"), &client())
            .await
            .unwrap();
        f.repo
            .update_session(&session.refresh_token, |s| {
                s.expired_at = Utc::now() - Duration::seconds(1);
            })
            .await;

        let err = f
            .service
            .refresh(&session.refresh_token, &client())
            .await
            .unwrap_err();
        assert_validation(&err, TOKEN_EXPIRED);
    }

    #[tokio::test]
    async fn test_refresh_for_blocked_or_missing_user() {
        let f = fixture();
        activated(&f, "alice@x.com", "pass1").await;
        let session = f
            .service
            .login(login_request("alice@x.com", "pass1"), &client())
            .await
            .unwrap();

        f.repo
            .update_user("alice@x.com", |u| u.is_active = false)
            .await;
        let err = f
            .service
            .refresh(&session.refresh_token, &client())
            .await
            .unwrap_err();
        assert_validation(&err, ACCOUNT_BLOCKED);

        f.repo.remove_user("alice@x.com").await;
        let err = f
            .service
            .refresh(&session.refresh_token, &client())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_revoke_session() {
        let f = fixture();
        let alice = activated(&f, "alice@x.com", "pass1").await;
        let bob = activated(&f, "bob@x.com", "pass2").await;
        let session = f
            .service
            .login(login_request("alice@x.com", "pass1"), &client())
            .await
            .unwrap();

        let err = f
            .service
            .revoke_session(&session.refresh_token, &bob.current_user(), &client())
            .await
            .unwrap_err();
        assert_validation(&err, INVALID_CREDENTIALS);

        f.service
            .revoke_session(&session.refresh_token, &alice.current_user(), &client())
            .await
            .unwrap();

        let err = f
            .service
            .refresh(&session.refresh_token, &client())
            .await
            .unwrap_err();
        assert_validation(&err, INVALID_CREDENTIALS);
    }

    #[tokio::test]
    async fn test_verify_access_rejects_uniformly() {
        let f = fixture();
        let user = activated(&f, "alice@x.com", "pass1").await;
        let identity = user.current_user();

        let foreign = JwtCodec::new("another-secret-another-secret-another")
            .issue(&identity, std::time::Duration::from_secs(3600))
            .unwrap();

        let now = Utc::now().timestamp() as u64;
        let expired = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &Claims {
                sub: SESSION_SUBJECT.to_string(),
                iat: now - 120,
                exp: now - 60,
                id: identity.id,
                name: identity.name.clone(),
                email: identity.email.clone(),
                is_active: true,
                is_admin: false,
            },
            &jsonwebtoken::EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let errors: Vec<AppError> = [foreign.as_str(), expired.as_str(), "garbage"]
            .into_iter()
            .map(|token| f.service.verify_access(token).unwrap_err())
            .collect();

        for err in &errors {
            assert_eq!(err.kind(), "UNAUTHORIZED");
            assert_eq!(err.public_message(), errors[0].public_message());
        }
    }

    #[test]
    fn test_generated_secrets_shape() {
        for _ in 0..100 {
            let code: u32 = generate_verify_code().parse().unwrap();
            assert!((10_000..=99_999).contains(&code));
        }

        let a = generate_opaque_token();
        let b = generate_opaque_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_policy_from_config() {
        let policy = AuthPolicy::from(&AuthConfig::default());
        assert_eq!(policy.access_token_ttl, std::time::Duration::from_secs(3600));
        assert_eq!(policy.refresh_token_ttl, Duration::days(7));
        assert_eq!(policy.registration_ttl, Duration::hours(24));
        assert_eq!(policy.resend_window, Duration::minutes(15));
    }

    #[test]
    fn test_policy_clamps_oversized_lifetimes() {
        let config = AuthConfig {
            refresh_token_ttl_secs: u64::MAX,
            registration_ttl_secs: u64::MAX,
            ..AuthConfig::default()
        };
        let policy = AuthPolicy::from(&config);

        let ceiling = Duration::seconds(MAX_TTL_SECS as i64);
        assert_eq!(policy.refresh_token_ttl, ceiling);
        assert_eq!(policy.registration_ttl, ceiling);
        assert!(Utc::now() + policy.refresh_token_ttl > Utc::now());
    }
}
