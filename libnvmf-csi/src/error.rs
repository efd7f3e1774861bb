//! Node plugin error types.
//!
//! All errors in the crate are represented by the [`NodeError`] enum, which
//! derives [`thiserror::Error`] for ergonomic error handling and also
//! implements [`Serialize`]/[`Deserialize`] so errors can travel across the
//! QUIC transport layer.
//!
//! The variants map onto the orchestration caller's retry policy:
//! [`NodeError::OperationPending`] means "retry later", everything else is
//! terminal for the current call (the call itself stays idempotent, so the
//! caller may still re-issue it).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for node lifecycle operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum NodeError {
    /// The volume identifier has no record on this node.
    #[error("volume {0} not found")]
    NotFound(String),

    /// The remote controller connected, but its reported inventory does not
    /// contain the requested volume.  Distinct from [`NodeError::NotFound`]:
    /// this indicates a caller/remote inconsistency, not missing local state.
    #[error("volume {0} not found at remote target")]
    NotFoundAtTarget(String),

    /// Another lifecycle call for the same volume is in flight.
    #[error("operation already in progress for volume {0}")]
    OperationPending(String),

    /// Publish was requested before the volume was staged.
    #[error("volume {0} unstaged")]
    VolumeUnstaged(String),

    /// The requested access mode cannot be served by a block-backed volume.
    #[error("unsupported access mode: {0}")]
    UnsupportedAccessMode(String),

    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The storage-management control plane returned an error.
    #[error("control plane error: {0}")]
    ControlPlane(String),

    /// The local transport initiator returned an error.
    #[error("initiator error: {0}")]
    Initiator(String),

    /// A mount or format operation failed.
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

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NodeError {
    /// Create a [`NodeError::ControlPlane`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn control_plane<E: std::fmt::Display>(e: E) -> Self {
        Self::ControlPlane(e.to_string())
    }

    /// Create a [`NodeError::Initiator`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn initiator<E: std::fmt::Display>(e: E) -> Self {
        Self::Initiator(e.to_string())
    }

    /// Create a [`NodeError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Create a [`NodeError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}
