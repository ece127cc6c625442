//! Error types for openvrr

use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("kernel subsystem error: {0}")]
    Kernel(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn driver(msg: impl Into<String>) -> Self {
        Error::Driver(msg.into())
    }

    pub fn kernel(msg: impl Into<String>) -> Self {
        Error::Kernel(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// True for errors that only ever occur on the kernel-event path, which
    /// logs and swallows rather than propagating to an operator response.
    pub fn is_kernel(&self) -> bool {
        matches!(self, Error::Kernel(_))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_not_kernel_errors() {
        assert!(!Error::config("bad body").is_kernel());
        assert!(Error::kernel("netlink subscribe failed").is_kernel());
    }
}
