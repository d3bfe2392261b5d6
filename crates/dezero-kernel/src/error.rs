//! Kernel error types.

use dezero_config::ConfigError;
use dezero_payload::PayloadError;
use dezero_store::StoreError;
use thiserror::Error;

/// Errors raised while booting or driving the kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Configuration could not be loaded or applied.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The backing store could not be opened.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A payload operation failed during boot.
    #[error("payload error: {0}")]
    Payload(#[from] PayloadError),

    /// A command envelope could not be decoded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;
