//! tplatform API - registration, login and session server
//!
//! Provides HTTP endpoints for account registration with email activation,
//! password login, access token issuance and refresh token rotation.

pub mod audit;
pub mod auth;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;

/// Signing secret of routers built for tests
#[cfg(any(test, feature = "test-utils"))]
pub const TEST_JWT_SECRET: &str = "test-secret-key-for-testing-only-32chars";

/// Router over an in-memory store, returning the store for inspection
///
/// Argon2 runs with minimal cost so tests stay fast.
#[cfg(any(test, feature = "test-utils"))]
pub fn create_test_app() -> (axum::Router, std::sync::Arc<auth::InMemoryAuthRepository>) {
    use crate::auth::{
        Argon2Hasher, AuthPolicy, AuthService, InMemoryAuthRepository, JwtCodec, LogEmailSender,
    };
    use std::sync::Arc;
    use tplatform_core::{AppConfig, PasswordHashConfig};

    let mut config = AppConfig::default();
    config.auth.jwt_secret = TEST_JWT_SECRET.to_string();
    config.server.cors_origins = vec!["*".to_string()];

    let hash_config = PasswordHashConfig {
        memory_cost: 1024,
        time_cost: 1,
        parallelism: 1,
    };

    let store = Arc::new(InMemoryAuthRepository::new());
    let hasher = match Argon2Hasher::new(&hash_config) {
        Ok(hasher) => hasher,
        Err(e) => panic!("test hash parameters rejected: {e}"),
    };
    let auth = AuthService::new(
        store.clone(),
        Arc::new(hasher),
        Arc::new(JwtCodec::new(TEST_JWT_SECRET)),
        Arc::new(LogEmailSender),
        AuthPolicy::from(&config.auth),
    );

    let state = Arc::new(state::AppState::new(config, auth));
    (create_router(state), store)
}

/// Router over an in-memory store
#[cfg(any(test, feature = "test-utils"))]
pub fn create_router_for_testing() -> axum::Router {
    create_test_app().0
}
