//! Shared error types and environment configuration for openvrr.
//!
//! # Modules
//!
//! - `config`: environment file loading, shared across the gateway binary
//!   and the driver/net crate
//! - `error`: the gateway-wide `Error`/`Result` types

pub mod config;
pub mod error;

pub use error::{Error, Result};
