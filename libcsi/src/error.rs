//! CSI error types.
//!
//! All errors in the `libcsi` crate are represented by the [`CsiError`] enum,
//! which derives [`thiserror::Error`] for ergonomic error handling and also
//! implements [`Serialize`]/[`Deserialize`] so errors can travel across the
//! QUIC transport layer.
//!
//! Every variant maps onto one of the coarse [`ErrorCode`] classes that the
//! container orchestrator understands (see [`CsiError::code`]).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// No volume is known under the requested identifier.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// A ZFS dataset that had to exist was not present on the storage host.
    #[error("dataset {0} not found")]
    DatasetNotFound(String),

    /// A mount operation failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A command ran on the storage host but exited unsuccessfully.
    ///
    /// The combined output is carried verbatim.
    #[error("command `{command}` failed: {output}")]
    CommandFailed {
        /// The full command line, including any elevation prefix.
        command: String,
        /// Combined stdout/stderr of the command.
        output: String,
    },

    /// The storage backend returned an error.
    #[error("backend error: {0}")]
    BackendError(String),

    /// A QUIC / transport-level error, or the remote shell could not be
    /// reached.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested operation is not offered by this plugin.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse status classes, modelled after the gRPC codes used by CSI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    Internal,
    Unimplemented,
    Unavailable,
}

impl CsiError {
    /// Create a [`CsiError::BackendError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn backend<E: std::fmt::Display>(e: E) -> Self {
        Self::BackendError(e.to_string())
    }

    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`CsiError::Unimplemented`] naming the unsupported operation.
    pub fn unimplemented(operation: &str) -> Self {
        Self::Unimplemented(format!("{operation} not supported"))
    }

    /// Status class reported to the caller.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::VolumeNotFound(_) | Self::DatasetNotFound(_) => ErrorCode::NotFound,
            Self::Unimplemented(_) => ErrorCode::Unimplemented,
            Self::TransportError(_) => ErrorCode::Unavailable,
            Self::MountFailed { .. }
            | Self::UnmountFailed { .. }
            | Self::CommandFailed { .. }
            | Self::BackendError(_)
            | Self::Internal(_) => ErrorCode::Internal,
        }
    }
}
