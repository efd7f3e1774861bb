//! Volume registry and controller refcount table.
//!
//! The registry is the single source of in-process bookkeeping: a map from
//! volume id to [`VolumeRecord`], plus a map from shared controller id to
//! the number of volumes attached through it.  Both maps live behind one
//! coarse async mutex.  The lock is held for map and refcount work and, on
//! the first-stage path only, across the single connect-controller RPC that
//! record creation may issue — it is never held across initiator or mount
//! calls, and the controller disconnect triggered by a refcount reaching
//! zero runs after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::initiator::{Initiator, InitiatorFactory};
use crate::sma::{StorageManagement, TransportParams};
use crate::trylock::TryLock;
use crate::types::{VolumeId, ctx};

/// Per-volume state.  One record exists per live volume id, created lazily
/// on the first stage call and deleted only after a successful unstage.
pub struct VolumeRecord {
    /// Volume identifier, immutable for the record's lifetime.
    pub id: VolumeId,
    /// Shared remote controller this volume is attached through; empty for
    /// the direct transport path.  Immutable for the record's lifetime.
    pub controller_id: String,
    /// Transport session owner, created once and reused across operations.
    pub initiator: Arc<dyn Initiator>,
    /// Non-blocking exclusion lock held across every lifecycle call that
    /// touches this volume.
    pub op_lock: TryLock,
    /// Staging mount path; empty means unstaged.  Mutated only while
    /// holding `op_lock`.
    staging_path: StdMutex<String>,
}

impl VolumeRecord {
    fn new(id: VolumeId, controller_id: String, initiator: Arc<dyn Initiator>) -> Self {
        Self {
            id,
            controller_id,
            initiator,
            op_lock: TryLock::new(),
            staging_path: StdMutex::new(String::new()),
        }
    }

    /// Current staging path; empty when the volume is unstaged.
    pub fn staging_path(&self) -> String {
        self.staging_path.lock().expect("staging_path poisoned").clone()
    }

    /// Whether the volume is currently staged.
    pub fn is_staged(&self) -> bool {
        !self.staging_path.lock().expect("staging_path poisoned").is_empty()
    }

    /// Set or clear the staging path.  Callers must hold `op_lock`.
    pub(crate) fn set_staging_path(&self, path: String) {
        *self.staging_path.lock().expect("staging_path poisoned") = path;
    }
}

#[derive(Default)]
struct RegistryInner {
    volumes: HashMap<VolumeId, Arc<VolumeRecord>>,
    /// Shared controller id -> number of live volumes attached through it.
    controllers: HashMap<String, usize>,
}

impl RegistryInner {
    /// Drop one reference on `controller_id`.  Returns the id when the count
    /// reached zero and the entry was removed, meaning the caller now owns
    /// the disconnect.
    fn release_controller(&mut self, controller_id: &str) -> Option<String> {
        let count = self.controllers.get_mut(controller_id)?;
        *count -= 1;
        if *count == 0 {
            self.controllers.remove(controller_id);
            Some(controller_id.to_owned())
        } else {
            None
        }
    }
}

/// The map of volume ids to per-volume records, and the controller refcount
/// table that decides controller teardown timing.
pub struct VolumeRegistry {
    inner: Mutex<RegistryInner>,
    sma: Arc<dyn StorageManagement>,
    config: Arc<NodeConfig>,
    make_initiator: InitiatorFactory,
}

impl VolumeRegistry {
    pub fn new(
        sma: Arc<dyn StorageManagement>,
        config: Arc<NodeConfig>,
        make_initiator: InitiatorFactory,
    ) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            sma,
            config,
            make_initiator,
        }
    }

    /// Look up an existing record.
    pub async fn lookup(&self, id: &VolumeId) -> Option<Arc<VolumeRecord>> {
        self.inner.lock().await.volumes.get(id).cloned()
    }

    /// Return the record for `id`, creating it if absent.
    ///
    /// For a new record on the shared transport path (`targetType: tcp`)
    /// this connects a remote controller, verifies the volume appears in the
    /// controller's reported inventory, and takes one reference on the
    /// controller.  The initiator endpoint is derived from node
    /// configuration, never from the raw request.  On the direct path the
    /// initiator is built from the request context and no controller
    /// bookkeeping occurs.
    ///
    /// Any failure after the controller reference was taken releases it
    /// again, disconnecting the controller if no other volume has joined it.
    pub async fn find_or_create(
        &self,
        id: &VolumeId,
        context: &HashMap<String, String>,
    ) -> Result<Arc<VolumeRecord>, NodeError> {
        let mut inner = self.inner.lock().await;

        if let Some(record) = inner.volumes.get(id) {
            return Ok(Arc::clone(record));
        }

        let shared = context
            .get(ctx::TARGET_TYPE)
            .is_some_and(|t| t.eq_ignore_ascii_case("tcp"));

        let mut controller_id = String::new();
        let initiator_ctx;
        if shared {
            let params = TransportParams::from_context(context)?;
            let connected = self.sma.connect_controller(&params).await?;
            controller_id = connected.controller_id;
            *inner.controllers.entry(controller_id.clone()).or_insert(0) += 1;

            // The volume must exist behind this controller.
            if !connected.volume_ids.iter().any(|v| *v == id.0) {
                error!(volume_id = %id, %controller_id, "volume absent from controller inventory");
                self.undo_controller_ref(&mut inner, &controller_id).await;
                return Err(NodeError::NotFoundAtTarget(id.to_string()));
            }

            initiator_ctx = self.config.initiator_context(context);
        } else {
            initiator_ctx = context.clone();
        }

        let initiator = match (self.make_initiator)(&initiator_ctx) {
            Ok(initiator) => initiator,
            Err(e) => {
                if shared {
                    self.undo_controller_ref(&mut inner, &controller_id).await;
                }
                return Err(e);
            }
        };

        let record = Arc::new(VolumeRecord::new(id.clone(), controller_id, initiator));
        inner.volumes.insert(id.clone(), Arc::clone(&record));
        Ok(record)
    }

    /// Delete the record for `id` and drop its controller reference; the
    /// last reference triggers a disconnect RPC issued after the registry
    /// lock is released.  Disconnect failures are logged, never surfaced:
    /// the volume itself has already been unstaged, and the controller may
    /// be a shared resource whose cleanup must not fail the caller.
    pub async fn remove(&self, id: &VolumeId) {
        let disconnect = {
            let mut inner = self.inner.lock().await;
            let Some(record) = inner.volumes.remove(id) else {
                return;
            };
            if record.controller_id.is_empty() {
                None
            } else {
                inner.release_controller(&record.controller_id)
            }
        };

        if let Some(controller_id) = disconnect {
            info!(%controller_id, "disconnecting controller after last volume unstaged");
            if let Err(e) = self.sma.disconnect_controller(&controller_id).await {
                warn!(%controller_id, error = %e, "controller disconnect failed");
            }
        }
    }

    /// Compensation for a failed record creation: drop the reference taken
    /// on `controller_id` and disconnect the controller if nobody else holds
    /// it.  Errors are logged; the caller's primary error wins.
    async fn undo_controller_ref(&self, inner: &mut RegistryInner, controller_id: &str) {
        if let Some(controller_id) = inner.release_controller(controller_id)
            && let Err(e) = self.sma.disconnect_controller(&controller_id).await
        {
            warn!(%controller_id, error = %e, "compensating controller disconnect failed");
        }
    }

    #[cfg(test)]
    pub(crate) async fn controller_refcount(&self, controller_id: &str) -> usize {
        self.inner
            .lock()
            .await
            .controllers
            .get(controller_id)
            .copied()
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.volumes.len()
    }
}
