//! tplatform core
//!
//! Shared configuration types for the tplatform authentication service.

pub mod config;

pub use config::{
    AppConfig, AuthConfig, ConfigError, DatabaseConfig, LoggingConfig, PasswordHashConfig,
    ServerConfig,
};
