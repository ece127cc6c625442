//! Admin HTTP server binding.
//!
//! The admin surface is reached over loopback (or an SSH tunnel), never
//! exposed directly, so this is plain HTTP with no TLS listener — unlike
//! the op-dbus server this crate started from, which dual-listened on
//! HTTP and HTTPS for a public-facing API.

use crate::middleware::{apply_middleware, MiddlewareConfig};
use crate::{Result, ServerError};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// Bound admin server, ready to [`serve`](HttpServer::serve).
pub struct HttpServer {
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    pub fn builder() -> HttpServerBuilder {
        HttpServerBuilder::new()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(ServerError::BindError)?;
        info!("admin HTTP server listening on http://{}", self.addr);
        axum::serve(listener, self.router)
            .await
            .map_err(|e| ServerError::BindError(std::io::Error::other(e)))?;
        Ok(())
    }
}

pub struct HttpServerBuilder {
    addr: SocketAddr,
    router: Option<Router>,
    middleware_config: MiddlewareConfig,
}

impl HttpServerBuilder {
    pub fn new() -> Self {
        Self {
            addr: vrr_core::config::DEFAULT_ADMIN_LISTEN
                .parse()
                .expect("DEFAULT_ADMIN_LISTEN is a valid socket address"),
            router: None,
            // the admin API is loopback-only and has no browser clients to
            // placate with CORS, and its bodies are small JSON/YAML
            middleware_config: MiddlewareConfig::default().cors(false).compression(false),
        }
    }

    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn middleware(mut self, config: MiddlewareConfig) -> Self {
        self.middleware_config = config;
        self
    }

    pub fn build(self) -> Result<HttpServer> {
        let router = apply_middleware(self.router.unwrap_or_default(), self.middleware_config);
        Ok(HttpServer {
            addr: self.addr,
            router,
        })
    }
}

impl Default for HttpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
