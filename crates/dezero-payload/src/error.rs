//! Payload error taxonomy and the response codes it maps onto.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dezero_store::StoreError;

use crate::permission::PermissionSet;

/// Errors that can occur during payload operations.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The manifest bytes are not a well-formed manifest document.
    #[error("Failed to parse manifest: {0}")]
    Parse(String),

    /// A mandatory manifest field is absent.
    #[error("Manifest is missing required field `{0}`")]
    MissingField(&'static str),

    /// The manifest parsed but fails domain checks.
    #[error("Invalid manifest: {0}")]
    Validation(String),

    /// No payload is registered under this id.
    #[error("Payload not found: {0}")]
    NotFound(String),

    /// The payload already has a live execution context.
    #[error("Payload already running: {0}")]
    AlreadyRunning(String),

    /// The permission policy refused part of the requested permission set.
    #[error("Payload {id} requests permissions that are not granted: {denied}")]
    PermissionDenied {
        /// Payload id.
        id: String,
        /// The refused permissions.
        denied: PermissionSet,
    },

    /// Free memory is below the manifest's requirement.
    #[error("Insufficient memory: need {needed} bytes, {available} free")]
    InsufficientMemory {
        /// Required bytes.
        needed: u64,
        /// Free bytes at check time.
        available: u64,
    },

    /// Free storage is below the manifest's requirement.
    #[error("Insufficient storage: need {needed} bytes, {available} free")]
    InsufficientStorage {
        /// Required bytes.
        needed: u64,
        /// Free bytes at check time.
        available: u64,
    },

    /// The execution backend refused or failed to load the payload.
    #[error("Backend failed to load {id}: {reason}")]
    BackendLoad {
        /// Payload id.
        id: String,
        /// Backend-provided reason.
        reason: String,
    },

    /// A built-in module failed while executing.
    #[error("Built-in module {module} failed: {reason}")]
    Builtin {
        /// Module name.
        module: String,
        /// Failure reason.
        reason: String,
    },

    /// The manifest names a built-in module that does not exist.
    #[error("Unknown built-in module: {0}")]
    UnknownBuiltin(String),

    /// Read/write/delete failure in the backing store.
    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),

    /// The install id is not a usable payload identifier.
    #[error("Invalid payload id: {0}")]
    InvalidId(String),

    /// The manifest inside an install package declares another id.
    #[error("Install id `{install}` does not match manifest id `{manifest}`")]
    IdMismatch {
        /// Id the install was requested under.
        install: String,
        /// Id declared by the manifest.
        manifest: String,
    },

    /// The artifact digest differs from `payload.checksum`.
    #[error("Artifact checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Digest declared by the manifest.
        expected: String,
        /// Digest of the uploaded artifact.
        actual: String,
    },

    /// The artifact exceeds the per-payload size limit.
    #[error("Artifact is {size} bytes, limit is {max}")]
    PayloadTooLarge {
        /// Artifact size.
        size: u64,
        /// Configured limit.
        max: u64,
    },

    /// The registry already holds the maximum number of payloads.
    #[error("Registry is full ({max} payloads)")]
    RegistryFull {
        /// Configured limit.
        max: usize,
    },
}

impl PayloadError {
    /// The protocol response code this failure is reported as.
    #[must_use]
    pub fn response_code(&self) -> ResponseCode {
        match self {
            Self::NotFound(_) | Self::UnknownBuiltin(_) => ResponseCode::NotFound,
            Self::AlreadyRunning(_) => ResponseCode::AlreadyRunning,
            Self::PermissionDenied { .. } => ResponseCode::PermissionDenied,
            Self::InsufficientMemory { .. } => ResponseCode::OutOfMemory,
            Self::InsufficientStorage { .. }
            | Self::RegistryFull { .. }
            | Self::Storage(StoreError::NoSpace { .. }) => ResponseCode::StorageFull,
            Self::Parse(_)
            | Self::MissingField(_)
            | Self::Validation(_)
            | Self::InvalidId(_)
            | Self::IdMismatch { .. }
            | Self::ChecksumMismatch { .. }
            | Self::PayloadTooLarge { .. } => ResponseCode::InvalidParams,
            Self::BackendLoad { .. } | Self::Builtin { .. } | Self::Storage(_) => {
                ResponseCode::Error
            },
        }
    }
}

/// Response codes of the device command protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ResponseCode {
    /// Success.
    Ok = 0x00,
    /// Unclassified failure.
    Error = 0x01,
    /// Unknown opcode.
    InvalidCommand = 0x02,
    /// Malformed or rejected arguments.
    InvalidParams = 0x03,
    /// Permission policy refusal.
    PermissionDenied = 0x04,
    /// Unknown payload.
    NotFound = 0x05,
    /// Payload already has a live run.
    AlreadyRunning = 0x06,
    /// Not enough free memory.
    OutOfMemory = 0x07,
    /// Not enough free storage.
    StorageFull = 0x08,
}

impl ResponseCode {
    /// Wire value of this code.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ResponseCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0x00 => Self::Ok,
            0x01 => Self::Error,
            0x02 => Self::InvalidCommand,
            0x03 => Self::InvalidParams,
            0x04 => Self::PermissionDenied,
            0x05 => Self::NotFound,
            0x06 => Self::AlreadyRunning,
            0x07 => Self::OutOfMemory,
            0x08 => Self::StorageFull,
            other => return Err(other),
        })
    }
}

/// A specialized Result type for payload operations.
pub type PayloadResult<T> = Result<T, PayloadError>;
