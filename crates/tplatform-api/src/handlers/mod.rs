//! API handlers

pub mod auth;
pub mod health;

pub use auth::{
    activate_handler, login_handler, logout_handler, profile_handler, refresh_handler,
    register_handler, ApiJson, ApiResponse,
};
pub use health::{health_check, HealthResponse};
