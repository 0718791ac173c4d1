//! # Taskflow Sync Server
//!
//! HTTP front for the delta sync engine.
//!
//! ```text
//! client ──► axum ──► require_auth (JWT) ──► rate limit ──► SyncCoordinator
//!                                                      └──► UndoService
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod routes;

pub use config::ServerConfig;
pub use error::ApiError;
pub use routes::{app_router, AppState};
