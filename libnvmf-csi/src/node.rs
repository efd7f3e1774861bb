//! Node service trait.
//!
//! The node service runs on each worker host and makes remote NVMe-oF
//! volumes available to workloads:
//!
//! 1. **Stage** — attach the volume remotely, connect the initiator, and
//!    mount the block device at a global staging path.
//! 2. **Publish** — bind-mount the staging path into the workload's target
//!    path.
//! 3. **Unpublish** — remove the bind mount.
//! 4. **Unstage** — unmount, disconnect the initiator, and detach remotely.

use async_trait::async_trait;

use crate::error::NodeError;
use crate::types::{
    NodeInfo, NodeServiceCapability, PublishVolumeRequest, StageVolumeRequest, VolumeId,
};

/// Node service — the volume lifecycle operations exposed to the
/// orchestration caller.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume: attach it to this node and mount it at
    /// `<staging_target_path>/<volume_id>`.
    ///
    /// Idempotent — staging an already-staged volume succeeds without
    /// repeating the underlying operations.
    async fn stage_volume(&self, req: StageVolumeRequest) -> Result<(), NodeError>;

    /// Unstage a volume: unmount the staging path, disconnect the initiator,
    /// and detach the volume remotely.
    ///
    /// Idempotent — unstaging an already-unstaged or unknown volume succeeds
    /// without side effects.
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), NodeError>;

    /// Publish a volume: bind-mount the staging path into the target path.
    /// A staged volume may be published to multiple target paths.
    ///
    /// Idempotent — publishing to an already-mounted target succeeds.
    async fn publish_volume(&self, req: PublishVolumeRequest) -> Result<(), NodeError>;

    /// Unpublish a volume: remove one target-path bind mount.  Never touches
    /// the staging mount.
    ///
    /// Idempotent — succeeds even if the target was never mounted.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), NodeError>;

    /// The fixed capability declaration of this node service.
    async fn get_capabilities(&self) -> Result<Vec<NodeServiceCapability>, NodeError>;

    /// Information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, NodeError>;
}
