//! # libnvmf-csi — NVMe-oF volume node plugin
//!
//! `libnvmf-csi` implements the node-side half of a storage plugin that
//! attaches remote NVMe-oF backed volumes to a host and mounts them into
//! workload filesystems.  It mediates between an orchestration caller
//! issuing Stage/Unstage/Publish/Unpublish calls, a remote
//! storage-management control plane, the local NVMe initiator, and the host
//! mount namespace, following the usual conventions (Tokio async runtime,
//! `tracing` for observability, `thiserror` for structured errors, QUIC via
//! [`quinn`] for the request transport).
//!
//! The heart of the crate is the volume lifecycle state machine in
//! [`service`]: per-volume attachment state, at most one in-flight lifecycle
//! operation per volume, refcounted sharing of remote transport controllers,
//! and a step ordering that keeps every operation idempotent and every
//! partial failure cleanly rolled back.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `VolumeId`, capabilities, requests. |
//! | [`error`] | [`NodeError`] enum covering all failure modes. |
//! | [`config`] | [`NodeConfig`] loaded once at startup. |
//! | [`message`] | [`NodeMessage`] protocol envelope for QUIC transport. |
//! | [`sma`] | [`StorageManagement`] trait — control-plane contract. |
//! | [`initiator`] | [`Initiator`] trait — per-volume transport sessions. |
//! | [`mount`] | [`Mounter`] trait — host mount-namespace operations. |
//! | [`trylock`] | Non-blocking per-volume exclusion lock. |
//! | [`registry`] | Volume records and controller refcount table. |
//! | [`node`] | [`CsiNode`] trait — stage, publish, unpublish, unstage. |
//! | [`service`] | [`NvmfNode`] — the lifecycle orchestrator. |
//! | [`transport`] | QUIC client/server built on `quinn`. |

pub mod config;
pub mod error;
pub mod initiator;
pub mod message;
pub mod mount;
pub mod node;
pub mod registry;
pub mod service;
pub mod sma;
pub mod transport;
pub mod trylock;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export the most commonly used items at crate root for convenience.
pub use config::NodeConfig;
pub use error::NodeError;
pub use initiator::Initiator;
pub use message::NodeMessage;
pub use mount::Mounter;
pub use node::CsiNode;
pub use service::NvmfNode;
pub use sma::StorageManagement;
pub use types::*;
