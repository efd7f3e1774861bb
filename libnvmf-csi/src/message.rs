//! Protocol messages exchanged with the orchestration caller.
//!
//! [`NodeMessage`] is the envelope for all request and response variants
//! carried over the QUIC transport.  Each bi-directional stream carries
//! exactly one request followed by one response (or
//! [`NodeMessage::Error`]).

use serde::{Deserialize, Serialize};

use crate::error::NodeError;
use crate::types::{
    NodeInfo, NodeServiceCapability, PublishVolumeRequest, StageVolumeRequest, VolumeId,
};

/// Top-level message envelope for the node service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeMessage {
    // ----- Requests --------------------------------------------------------
    /// Stage a volume on this node.
    StageVolume(StageVolumeRequest),
    /// Unstage a previously staged volume.
    UnstageVolume {
        volume_id: VolumeId,
        staging_target_path: String,
    },
    /// Publish a staged volume into a workload path.
    PublishVolume(PublishVolumeRequest),
    /// Unpublish a previously published volume.
    UnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    /// Query the node service capabilities.
    GetCapabilities,
    /// Query node information.
    GetNodeInfo,

    // ----- Responses -------------------------------------------------------
    /// Generic success acknowledgement (no payload).
    Ok,
    /// Node service capabilities.
    Capabilities(Vec<NodeServiceCapability>),
    /// Node information.
    NodeInfoResponse(NodeInfo),
    /// An error occurred.
    Error(NodeError),
}

impl std::fmt::Display for NodeMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StageVolume(req) => write!(f, "StageVolume({})", req.volume_id),
            Self::UnstageVolume { volume_id, .. } => write!(f, "UnstageVolume({})", volume_id),
            Self::PublishVolume(req) => write!(f, "PublishVolume({})", req.volume_id),
            Self::UnpublishVolume { volume_id, .. } => {
                write!(f, "UnpublishVolume({})", volume_id)
            }
            Self::GetCapabilities => f.write_str("GetCapabilities"),
            Self::GetNodeInfo => f.write_str("GetNodeInfo"),
            Self::Ok => f.write_str("Ok"),
            Self::Capabilities(caps) => write!(f, "Capabilities(count={})", caps.len()),
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::Error(e) => write!(f, "Error({})", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VolumeCapability;

    #[test]
    fn message_serde_roundtrip() {
        let msg = NodeMessage::StageVolume(StageVolumeRequest {
            volume_id: "vol-1".into(),
            staging_target_path: "/var/lib/nvmf-csi/staging".into(),
            volume_capability: VolumeCapability::default(),
            volume_context: Default::default(),
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: NodeMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, NodeMessage::StageVolume(_)));
    }

    #[test]
    fn error_message_roundtrip() {
        let msg = NodeMessage::Error(NodeError::OperationPending("vol-1".into()));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: NodeMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, NodeMessage::Error(NodeError::OperationPending(_))));
    }

    #[test]
    fn display_formatting() {
        assert_eq!(NodeMessage::Ok.to_string(), "Ok");
        assert_eq!(
            NodeMessage::UnstageVolume {
                volume_id: "vol-9".into(),
                staging_target_path: "/s".into(),
            }
            .to_string(),
            "UnstageVolume(vol-9)"
        );
    }
}
