//! Application state management

use crate::auth::AuthService;
use std::time::Instant;
use tplatform_core::AppConfig;

/// Application state shared across handlers
#[derive(Debug)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,
    /// Registration, login and session lifecycle
    pub auth: AuthService,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, auth: AuthService) -> Self {
        Self {
            config,
            auth,
            start_time: Instant::now(),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
