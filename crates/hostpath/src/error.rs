//! Errors returned by the volume lifecycle.

use std::path::PathBuf;

use thiserror::Error;

/// Why a [crate::types::VolumeRequest] was refused before touching the disk.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("requested storage size is missing")]
    MissingCapacity,

    #[error("requested storage size is zero")]
    ZeroCapacity,

    #[error("access mode is not specified")]
    NoAccessModes,

    #[error("unknown access mode `{0}`")]
    UnknownAccessMode(String),

    #[error("invalid quantity `{quantity}`: {reason}")]
    InvalidQuantity { quantity: String, reason: String },

    #[error("invalid claim {field} `{value}`: must be a single path component")]
    InvalidClaimName { field: &'static str, value: String },
}

/// Coarse classification of an [Error], used by callers to pick a retry policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("volume {name} already exists at {}", path.display())]
    Conflict { name: String, path: PathBuf },

    #[error("could not {action} volume directory {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    /// Whether retrying with the same input can never succeed.
    ///
    /// I/O failures are opaque, so they are left to the caller's retry policy.
    pub fn is_permanent(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Io)
    }
}
