//! HTTP admin surface for the gateway: basic-auth token handling, a
//! shared middleware stack (tracing, security headers, timeouts), and
//! the REST router over the Gateway Coordinator.

pub mod admin;
pub mod auth;
pub mod middleware;
pub mod server;

pub use admin::build_router;
pub use middleware::{MiddlewareConfig, MiddlewareStack};
pub use server::{HttpServer, HttpServerBuilder};

pub use axum;
pub use tower;
pub use tower_http;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server binding error: {0}")]
    BindError(#[from] std::io::Error),

    #[error("router configuration error: {0}")]
    RouterError(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::admin::build_router;
    pub use super::auth;
    pub use super::axum::{
        extract::{Json, Path, Query, State},
        response::{IntoResponse, Response},
        routing::{delete, get, post, put},
        Router,
    };
    pub use super::middleware::{MiddlewareConfig, MiddlewareStack};
    pub use super::server::{HttpServer, HttpServerBuilder};
    pub use super::Result;
}
