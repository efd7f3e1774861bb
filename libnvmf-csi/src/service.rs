//! Volume lifecycle orchestrator.
//!
//! [`NvmfNode`] implements [`CsiNode`] by composing the volume registry,
//! the storage-management control plane, the per-volume initiator, and the
//! mount adapter into the Stage/Unstage/Publish/Unpublish state machine.
//!
//! Per-volume state is derived from the [`VolumeRecord`] fields rather than
//! stored separately: no record means unregistered, an empty staging path
//! means registered-but-unstaged, a non-empty one means staged.  Publish and
//! Unpublish never change record-level state — a staged volume may be
//! bind-mounted into several target paths at once.
//!
//! Ordering invariant: stage performs remote attach, then local connect,
//! then mount; unstage performs unmount, then local disconnect, then remote
//! detach — the exact reverse — so that a crash between steps leaves state
//! that is safe to retry forward or unwind.  No step is retried internally;
//! every call is idempotent so the orchestration caller can retry the whole
//! operation.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::initiator::{InitiatorFactory, default_factory};
use crate::mount::Mounter;
use crate::node::CsiNode;
use crate::registry::{VolumeRecord, VolumeRegistry};
use crate::sma::{StorageManagement, TransportParams};
use crate::types::{
    AccessMode, NodeInfo, NodeServiceCapability, PublishVolumeRequest, StageVolumeRequest,
    VolumeId,
};

/// The node-side volume lifecycle service.
pub struct NvmfNode {
    registry: VolumeRegistry,
    sma: Arc<dyn StorageManagement>,
    mounter: Arc<dyn Mounter>,
    /// Process-lifetime local target device; every attach/detach references it.
    device_id: String,
    node_id: String,
}

impl NvmfNode {
    /// Create the node service, registering this node's local target device
    /// with the control plane.
    ///
    /// A failure here must prevent the hosting daemon from serving any
    /// request.
    pub async fn new(
        config: NodeConfig,
        sma: Arc<dyn StorageManagement>,
        mounter: Arc<dyn Mounter>,
    ) -> Result<Self, NodeError> {
        Self::with_initiator_factory(config, sma, mounter, default_factory()).await
    }

    /// Like [`NvmfNode::new`] with a custom initiator constructor, for
    /// alternative transports.
    pub async fn with_initiator_factory(
        config: NodeConfig,
        sma: Arc<dyn StorageManagement>,
        mounter: Arc<dyn Mounter>,
        make_initiator: InitiatorFactory,
    ) -> Result<Self, NodeError> {
        let config = Arc::new(config);
        let device_id = sma.create_device(&TransportParams::from_config(&config)).await?;
        info!(%device_id, "created local target device");
        Ok(Self {
            registry: VolumeRegistry::new(Arc::clone(&sma), Arc::clone(&config), make_initiator),
            node_id: config.name.clone(),
            sma,
            mounter,
            device_id,
        })
    }

    /// Remove the local target device.  Called once at process shutdown;
    /// failures are logged, there is nobody left to surface them to.
    pub async fn shutdown(&self) {
        info!(device_id = %self.device_id, "removing local target device");
        if let Err(e) = self.sma.remove_device(&self.device_id).await {
            error!(device_id = %self.device_id, error = %e, "failed to remove local target device");
        }
    }

    /// Identifier of the local target device.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Create the mount-point directory if absent; returns whether the path
    /// is already mounted.
    async fn create_mount_point(&self, path: &Path) -> Result<bool, NodeError> {
        match self.mounter.is_mount_point(path).await {
            Ok(true) => {
                info!(path = %path.display(), "already mounted");
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.mounter
                    .create_dir_all(path)
                    .await
                    .map_err(|e| mount_failed(path, e))?;
                Ok(false)
            }
            Err(e) => Err(mount_failed(path, e)),
        }
    }

    /// Unmount (if mounted) and remove the mount-point directory.  Succeeds
    /// when the path is already gone.
    async fn delete_mount_point(&self, path: &Path) -> Result<(), NodeError> {
        match self.mounter.is_mount_point(path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "mount point already deleted");
                return Ok(());
            }
            Err(e) => return Err(unmount_failed(path, e)),
            Ok(true) => {
                self.mounter
                    .unmount(path)
                    .await
                    .map_err(|e| unmount_failed(path, e))?;
            }
            Ok(false) => {}
        }
        self.mounter
            .remove_path(path)
            .await
            .map_err(|e| unmount_failed(path, e))
    }

    /// Mount the volume's block device at the staging path, formatting it on
    /// first use.  Idempotent: an already-mounted staging path is returned
    /// as-is.
    async fn stage_mount(
        &self,
        device_path: &str,
        req: &StageVolumeRequest,
    ) -> Result<String, NodeError> {
        let staging = format!(
            "{}/{}",
            req.staging_target_path.trim_end_matches('/'),
            req.volume_id
        );
        let staging_path = Path::new(&staging);
        if self.create_mount_point(staging_path).await? {
            return Ok(staging);
        }

        let cap = &req.volume_capability;
        let mut flags = cap.mount_flags.clone();
        match cap.access_mode {
            AccessMode::ReadWriteOnce => {}
            AccessMode::ReadOnlyMany => flags.push("ro".to_owned()),
            AccessMode::ReadWriteMany => {
                return Err(NodeError::UnsupportedAccessMode("ReadWriteMany".to_owned()));
            }
        }

        info!(device = device_path, path = %staging, fs_type = %cap.fs_type, ?flags, "mounting staging path");
        self.mounter
            .format_and_mount(device_path, staging_path, &cap.fs_type, &flags)
            .await
            .map_err(|e| mount_failed(staging_path, e))?;
        Ok(staging)
    }

    /// Bind-mount the staging path onto the publish target.  Idempotent.
    async fn publish_mount(
        &self,
        staging: &str,
        req: &PublishVolumeRequest,
    ) -> Result<(), NodeError> {
        let target = Path::new(&req.target_path);
        if self.create_mount_point(target).await? {
            return Ok(());
        }

        let cap = &req.volume_capability;
        let mut flags = cap.mount_flags.clone();
        flags.push("bind".to_owned());
        if req.read_only {
            flags.push("ro".to_owned());
        }

        info!(source = staging, target = %req.target_path, ?flags, "bind-mounting publish target");
        self.mounter
            .mount(Path::new(staging), target, &cap.fs_type, &flags)
            .await
            .map_err(|e| mount_failed(target, e))
    }
}

fn mount_failed(path: &Path, e: impl std::fmt::Display) -> NodeError {
    NodeError::MountFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn unmount_failed(path: &Path, e: impl std::fmt::Display) -> NodeError {
    NodeError::UnmountFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn pending(record: &VolumeRecord) -> NodeError {
    NodeError::OperationPending(record.id.to_string())
}

#[async_trait]
impl CsiNode for NvmfNode {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn stage_volume(&self, req: StageVolumeRequest) -> Result<(), NodeError> {
        let record = self
            .registry
            .find_or_create(&req.volume_id, &req.volume_context)
            .await?;

        let _guard = record.op_lock.try_acquire().ok_or_else(|| pending(&record))?;

        if record.is_staged() {
            warn!("volume already staged");
            return Ok(());
        }

        // Remote attach must complete before the local connect so the
        // namespace is visible when the initiator logs in.
        if !record.controller_id.is_empty() {
            self.sma.attach_volume(&req.volume_id, &self.device_id).await?;
        }

        let device_path = record.initiator.connect().await?;

        match self.stage_mount(&device_path, &req).await {
            Ok(staging) => {
                record.set_staging_path(staging);
                Ok(())
            }
            Err(e) => {
                // Best-effort compensation so a retry starts from a clean
                // transport state; the mount error stays the primary error.
                if let Err(de) = record.initiator.disconnect().await {
                    warn!(error = %de, "initiator disconnect during stage rollback failed");
                }
                Err(e)
            }
        }
    }

    #[instrument(skip(self, _staging_target_path), fields(volume_id = %volume_id))]
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        _staging_target_path: &str,
    ) -> Result<(), NodeError> {
        let Some(record) = self.registry.lookup(volume_id).await else {
            warn!("unstage of unknown volume, nothing to do");
            return Ok(());
        };

        {
            let _guard = record.op_lock.try_acquire().ok_or_else(|| pending(&record))?;

            let staging = record.staging_path();
            if staging.is_empty() {
                warn!("volume already unstaged");
            } else {
                // Reverse of the stage order: unmount, local disconnect,
                // remote detach.  A failure leaves the record staged so the
                // caller can retry the whole operation.
                self.delete_mount_point(Path::new(&staging)).await?;
                record.initiator.disconnect().await?;
                if !record.controller_id.is_empty() {
                    self.sma.detach_volume(volume_id, &self.device_id).await?;
                }
                record.set_staging_path(String::new());
            }
        }

        // The exclusion lock is released; record deletion and controller
        // teardown happen under the registry lock.
        self.registry.remove(volume_id).await;
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn publish_volume(&self, req: PublishVolumeRequest) -> Result<(), NodeError> {
        let Some(record) = self.registry.lookup(&req.volume_id).await else {
            return Err(NodeError::VolumeUnstaged(req.volume_id.to_string()));
        };

        let _guard = record.op_lock.try_acquire().ok_or_else(|| pending(&record))?;

        let staging = record.staging_path();
        if staging.is_empty() {
            return Err(NodeError::VolumeUnstaged(req.volume_id.to_string()));
        }
        self.publish_mount(&staging, &req).await
    }

    #[instrument(skip(self), fields(volume_id = %volume_id))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), NodeError> {
        let Some(record) = self.registry.lookup(volume_id).await else {
            return Err(NodeError::NotFound(volume_id.to_string()));
        };

        let _guard = record.op_lock.try_acquire().ok_or_else(|| pending(&record))?;

        self.delete_mount_point(Path::new(target_path)).await
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeServiceCapability>, NodeError> {
        Ok(vec![NodeServiceCapability::StageUnstageVolume])
    }

    async fn get_info(&self) -> Result<NodeInfo, NodeError> {
        Ok(NodeInfo {
            node_id: self.node_id.clone(),
            max_volumes: 256,
        })
    }
}
