//! Authentication and session lifecycle
//!
//! - `password`: Argon2id credential hashing
//! - `jwt`: access token signing and verification
//! - `models`: registrations, users, sessions and the token identity
//! - `repository`: persistence capabilities, with `memory` and `postgres`
//!   implementations
//! - `email`, `tasks`: confirmation delivery and detached side effects
//! - `service`: registration, activation, login, refresh and revocation
//! - `middleware`: per-request access guard

pub mod email;
pub mod jwt;
pub mod memory;
pub mod middleware;
pub mod models;
pub mod password;
pub mod postgres;
pub mod repository;
pub mod service;
pub mod tasks;

pub use email::{EmailSender, LogEmailSender};
pub use jwt::{Claims, JwtCodec, TokenCodec, TokenError};
pub use memory::InMemoryAuthRepository;
pub use middleware::{access_guard, check_access, PathPolicy};
pub use models::{CurrentUser, Registration, Session, SessionResponse, User};
pub use password::{Argon2Hasher, CredentialHasher, PasswordError};
pub use postgres::PgAuthRepository;
pub use repository::{AuthStore, RegistrationStore, RepositoryError, SessionStore, UserStore};
pub use service::{
    ActivateRequest, AuthPolicy, AuthService, ClientInfo, LoginRequest, RefreshRequest,
    RegisterRequest,
};
pub use tasks::DetachedTasks;
