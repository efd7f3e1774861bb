//! Storage-management control-plane client contract.
//!
//! The node never talks to the remote control plane directly; it consumes
//! the [`StorageManagement`] trait, implemented by the deployment glue that
//! owns the actual RPC channel.  All calls are synchronous request/response
//! RPCs from the node's perspective, and any error is treated as
//! non-retriable at this layer — retries belong to the orchestration caller.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::types::{VolumeId, ctx};

/// NVMe-oF transport endpoint description used by device and controller
/// creation calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportParams {
    /// Transport type (`tcp` / `rdma`).
    pub trtype: String,
    /// Address family (`ipv4` / `ipv6`).
    pub adrfam: String,
    /// Target address.
    pub traddr: String,
    /// Target service port.
    pub trsvcid: String,
    /// Subsystem NQN.
    pub subnqn: String,
}

impl TransportParams {
    /// Parameters of this node's own local target endpoint.
    pub fn from_config(cfg: &NodeConfig) -> Self {
        Self {
            trtype: cfg.transport_type.clone(),
            adrfam: cfg.transport_adrfam.clone(),
            traddr: cfg.transport_addr.clone(),
            trsvcid: cfg.transport_port.clone(),
            subnqn: cfg.subnqn.clone(),
        }
    }

    /// Parameters of the remote target a volume lives behind, taken from a
    /// stage request's volume context.
    pub fn from_context(context: &HashMap<String, String>) -> Result<Self, NodeError> {
        let get = |key: &str| {
            context
                .get(key)
                .cloned()
                .ok_or_else(|| NodeError::InvalidArgument(format!("missing volume context key: {key}")))
        };
        Ok(Self {
            trtype: get(ctx::TARGET_TYPE)?.to_ascii_lowercase(),
            adrfam: "ipv4".to_owned(),
            traddr: get(ctx::TARGET_ADDR)?,
            trsvcid: get(ctx::TARGET_PORT)?,
            subnqn: get(ctx::NQN)?,
        })
    }
}

/// Result of connecting a shared remote controller: its identifier plus the
/// volume inventory it reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedController {
    /// Identifier of the controller, used by later disconnect calls.
    pub controller_id: String,
    /// Volumes reachable through the controller.
    pub volume_ids: Vec<String>,
}

/// Control-plane operations the node lifecycle depends on.
///
/// Contract notes:
/// - `connect_controller` is idempotent on the remote side: connecting to an
///   already-connected target returns the existing controller id and its
///   current volume inventory.
/// - `remove_device` and `disconnect_controller` succeed if the resource is
///   already gone.
#[async_trait]
pub trait StorageManagement: Send + Sync {
    /// Create this node's local target device.  Called once at startup; the
    /// returned id is referenced by every attach/detach call.
    async fn create_device(&self, params: &TransportParams) -> Result<String, NodeError>;

    /// Remove the local target device.  Called once at shutdown.
    async fn remove_device(&self, device_id: &str) -> Result<(), NodeError>;

    /// Connect a shared remote controller for the given target.
    async fn connect_controller(
        &self,
        params: &TransportParams,
    ) -> Result<ConnectedController, NodeError>;

    /// Disconnect a shared remote controller.
    async fn disconnect_controller(&self, controller_id: &str) -> Result<(), NodeError>;

    /// Attach a volume to the local target device, making it visible to the
    /// initiator.
    async fn attach_volume(&self, volume_id: &VolumeId, device_id: &str) -> Result<(), NodeError>;

    /// Detach a volume from the local target device.
    async fn detach_volume(&self, volume_id: &VolumeId, device_id: &str) -> Result<(), NodeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_from_context_requires_endpoint_keys() {
        let context = HashMap::from([(ctx::TARGET_TYPE.to_owned(), "TCP".to_owned())]);
        let err = TransportParams::from_context(&context).unwrap_err();
        assert!(matches!(err, NodeError::InvalidArgument(_)));

        let context = HashMap::from([
            (ctx::TARGET_TYPE.to_owned(), "TCP".to_owned()),
            (ctx::TARGET_ADDR.to_owned(), "10.0.0.9".to_owned()),
            (ctx::TARGET_PORT.to_owned(), "4420".to_owned()),
            (ctx::NQN.to_owned(), "nqn.2024-01.io.csi.nvmf:target".to_owned()),
        ]);
        let params = TransportParams::from_context(&context).unwrap();
        assert_eq!(params.trtype, "tcp");
        assert_eq!(params.traddr, "10.0.0.9");
    }
}
