//! Local block-device initiator.
//!
//! An [`Initiator`] owns the transport session for exactly one volume.  Both
//! operations are idempotent: repeated `connect` calls after a success return
//! the same device path without re-establishing the session, and
//! `disconnect` succeeds if the session is already gone.  That property is
//! what makes the stage/unstage lifecycle safely retriable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::NodeError;
use crate::types::ctx;

/// How long to wait for the kernel to surface the namespace block device
/// after `nvme connect` returns.
const DEVICE_WAIT_TIMEOUT: Duration = Duration::from_secs(20);
const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Transport connect/disconnect for a single volume.
#[async_trait]
pub trait Initiator: Send + Sync {
    /// Establish the transport session and return the local block-device
    /// path.  Idempotent.
    async fn connect(&self) -> Result<String, NodeError>;

    /// Tear down the transport session.  Idempotent.
    async fn disconnect(&self) -> Result<(), NodeError>;
}

/// Constructor signature for initiators, injectable so the lifecycle
/// orchestrator can be exercised without shelling out to nvme-cli.
pub type InitiatorFactory =
    Arc<dyn Fn(&HashMap<String, String>) -> Result<Arc<dyn Initiator>, NodeError> + Send + Sync>;

/// The default factory, dispatching on the context's transport type.
pub fn default_factory() -> InitiatorFactory {
    Arc::new(new_initiator)
}

/// Build an initiator from a connection context.
///
/// Supported transport types are `tcp` and `rdma`, both served by
/// [`NvmfInitiator`].
pub fn new_initiator(context: &HashMap<String, String>) -> Result<Arc<dyn Initiator>, NodeError> {
    let target_type = context
        .get(ctx::TARGET_TYPE)
        .map(|t| t.to_ascii_lowercase())
        .unwrap_or_default();
    match target_type.as_str() {
        "tcp" | "rdma" => Ok(Arc::new(NvmfInitiator::from_context(&target_type, context)?)),
        other => Err(NodeError::InvalidArgument(format!(
            "unsupported transport type: {other:?}"
        ))),
    }
}

/// NVMe-oF initiator driven through nvme-cli.
///
/// The namespace block device is located under `/dev/disk/by-id` via the
/// volume's model string, which the remote target sets per volume.
pub struct NvmfInitiator {
    trtype: String,
    traddr: String,
    trsvcid: String,
    nqn: String,
    model: String,
}

impl NvmfInitiator {
    fn from_context(trtype: &str, context: &HashMap<String, String>) -> Result<Self, NodeError> {
        let get = |key: &str| {
            context
                .get(key)
                .cloned()
                .ok_or_else(|| NodeError::InvalidArgument(format!("missing volume context key: {key}")))
        };
        Ok(Self {
            trtype: trtype.to_owned(),
            traddr: get(ctx::TARGET_ADDR)?,
            trsvcid: get(ctx::TARGET_PORT)?,
            nqn: get(ctx::NQN)?,
            model: get(ctx::MODEL)?,
        })
    }

    /// Look for the namespace block device belonging to this volume.
    async fn find_device(&self) -> Option<String> {
        let mut dir = tokio::fs::read_dir("/dev/disk/by-id").await.ok()?;
        while let Ok(Some(entry)) = dir.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.contains(&self.model) {
                let resolved = tokio::fs::canonicalize(entry.path())
                    .await
                    .unwrap_or_else(|_| entry.path());
                return Some(resolved.to_string_lossy().into_owned());
            }
        }
        None
    }

    async fn wait_for_device(&self) -> Result<String, NodeError> {
        let deadline = tokio::time::Instant::now() + DEVICE_WAIT_TIMEOUT;
        loop {
            if let Some(path) = self.find_device().await {
                return Ok(path);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(NodeError::Initiator(format!(
                    "timed out waiting for device of model {}",
                    self.model
                )));
            }
            tokio::time::sleep(DEVICE_POLL_INTERVAL).await;
        }
    }
}

/// Run an nvme-cli subcommand, mapping failures to [`NodeError::Initiator`].
async fn run_nvme(args: &[&str]) -> Result<(), NodeError> {
    let output = tokio::process::Command::new("nvme")
        .args(args)
        .output()
        .await
        .map_err(|e| NodeError::Initiator(format!("spawn nvme {}: {e}", args.join(" "))))?;
    if !output.status.success() {
        return Err(NodeError::Initiator(format!(
            "nvme {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[async_trait]
impl Initiator for NvmfInitiator {
    async fn connect(&self) -> Result<String, NodeError> {
        // Already connected from a previous call: return the existing path.
        if let Some(path) = self.find_device().await {
            debug!(nqn = %self.nqn, %path, "initiator already connected");
            return Ok(path);
        }

        run_nvme(&[
            "connect",
            "-t",
            &self.trtype,
            "-a",
            &self.traddr,
            "-s",
            &self.trsvcid,
            "-n",
            &self.nqn,
        ])
        .await?;

        let path = self.wait_for_device().await?;
        info!(nqn = %self.nqn, %path, "initiator connected");
        Ok(path)
    }

    async fn disconnect(&self) -> Result<(), NodeError> {
        if self.find_device().await.is_none() {
            debug!(nqn = %self.nqn, "initiator already disconnected");
            return Ok(());
        }
        run_nvme(&["disconnect", "-n", &self.nqn]).await?;
        info!(nqn = %self.nqn, "initiator disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_context(target_type: &str) -> HashMap<String, String> {
        HashMap::from([
            (ctx::TARGET_TYPE.to_owned(), target_type.to_owned()),
            (ctx::TARGET_ADDR.to_owned(), "127.0.0.1".to_owned()),
            (ctx::TARGET_PORT.to_owned(), "4421".to_owned()),
            (ctx::NQN.to_owned(), "nqn.2024-01.io.csi.nvmf:n1".to_owned()),
            (ctx::MODEL.to_owned(), "vol-1-model".to_owned()),
        ])
    }

    #[test]
    fn factory_rejects_unknown_transport() {
        assert!(matches!(
            new_initiator(&full_context("iscsi")),
            Err(NodeError::InvalidArgument(_))
        ));
        assert!(matches!(
            new_initiator(&HashMap::new()),
            Err(NodeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn factory_accepts_tcp_and_rdma() {
        assert!(new_initiator(&full_context("tcp")).is_ok());
        assert!(new_initiator(&full_context("TCP")).is_ok());
        assert!(new_initiator(&full_context("rdma")).is_ok());
    }

    #[test]
    fn factory_requires_model() {
        let mut context = full_context("tcp");
        context.remove(ctx::MODEL);
        assert!(matches!(
            new_initiator(&context),
            Err(NodeError::InvalidArgument(_))
        ));
    }
}
