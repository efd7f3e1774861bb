//! Core data model: volume identity, capabilities, and node requests.
//!
//! These types are shared by the node service traits, the transport layer,
//! and the lifecycle orchestrator.  They are all [`Serialize`]/[`Deserialize`]
//! so they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, globally unique identifier for a volume, supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Volume context keys
// ---------------------------------------------------------------------------

/// Well-known keys in the `volume_context` map carried by stage requests.
///
/// The context describes the remote target a volume lives behind.  For the
/// shared (`tcp`) transport path the node derives the actual initiator
/// endpoint from its own configuration rather than from these values, so a
/// caller cannot redirect the data plane.
pub mod ctx {
    /// Transport type of the remote target (`tcp` selects the shared path).
    pub const TARGET_TYPE: &str = "targetType";
    /// Remote target address.
    pub const TARGET_ADDR: &str = "targetAddr";
    /// Remote target service port.
    pub const TARGET_PORT: &str = "targetPort";
    /// NVMe qualified name of the remote subsystem.
    pub const NQN: &str = "nqn";
    /// Model string used to locate the local block device after connect.
    pub const MODEL: &str = "model";
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.  Not supported by block-backed volumes.
    ReadWriteMany,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type created on the block device at first stage.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
}

fn default_fs_type() -> String {
    "ext4".to_owned()
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWriteOnce,
            mount_flags: Vec::new(),
            fs_type: default_fs_type(),
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to stage (attach and globally mount) a volume on this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageVolumeRequest {
    /// Volume to stage.
    pub volume_id: VolumeId,
    /// Base directory for staging mounts; the actual staging path is
    /// `<staging_target_path>/<volume_id>`.
    pub staging_target_path: String,
    /// Requested capability.
    pub volume_capability: VolumeCapability,
    /// Remote target descriptor, see [`ctx`] for well-known keys.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

/// Request to publish (bind-mount) a staged volume into a workload path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// Target path inside the workload filesystem.
    pub target_path: String,
    /// Requested capability.
    pub volume_capability: VolumeCapability,
    /// Whether the bind mount should be read-only.
    #[serde(default)]
    pub read_only: bool,
}

// ---------------------------------------------------------------------------
// Node info & capabilities
// ---------------------------------------------------------------------------

/// Capabilities advertised by the node service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeServiceCapability {
    /// The node supports the Stage/Unstage volume lifecycle.
    StageUnstageVolume,
}

/// Information about the node on which the service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host.
    pub max_volumes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId("vol-abc".into());
        assert_eq!(id.to_string(), "vol-abc");
    }

    #[test]
    fn stage_request_serde_roundtrip() {
        let req = StageVolumeRequest {
            volume_id: "v1".into(),
            staging_target_path: "/var/lib/nvmf-csi/staging".into(),
            volume_capability: VolumeCapability::default(),
            volume_context: HashMap::from([(ctx::TARGET_TYPE.to_owned(), "tcp".to_owned())]),
        };
        let json = serde_json::to_string(&req).expect("serialize");
        let de: StageVolumeRequest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(de.volume_id, req.volume_id);
        assert_eq!(de.volume_context.get(ctx::TARGET_TYPE).unwrap(), "tcp");
    }

    #[test]
    fn volume_capability_default() {
        let cap = VolumeCapability::default();
        assert_eq!(cap.access_mode, AccessMode::ReadWriteOnce);
        assert_eq!(cap.fs_type, "ext4");
        assert!(cap.mount_flags.is_empty());
    }
}
