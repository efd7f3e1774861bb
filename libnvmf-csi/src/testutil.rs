//! Mock adapters shared by the registry and lifecycle tests.
//!
//! All mocks write into one [`CallLog`], so tests can assert not just call
//! counts but the relative order of control-plane, initiator, and mount
//! operations.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::NodeError;
use crate::initiator::Initiator;
use crate::mount::Mounter;
use crate::sma::{ConnectedController, StorageManagement, TransportParams};
use crate::types::{VolumeId, ctx};

/// Ordered record of adapter calls.
#[derive(Clone, Default)]
pub struct CallLog(Arc<StdMutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Number of entries starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Index of the first entry starting with `prefix`.
    pub fn index_of(&self, prefix: &str) -> Option<usize> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .position(|c| c.starts_with(prefix))
    }
}

/// Volume context selecting the shared (tcp) transport path.
pub fn shared_context() -> HashMap<String, String> {
    HashMap::from([
        (ctx::TARGET_TYPE.to_owned(), "tcp".to_owned()),
        (ctx::TARGET_ADDR.to_owned(), "10.0.0.9".to_owned()),
        (ctx::TARGET_PORT.to_owned(), "4420".to_owned()),
        (ctx::NQN.to_owned(), "nqn.2024-01.io.csi.nvmf:target".to_owned()),
        (ctx::MODEL.to_owned(), "vol-model".to_owned()),
    ])
}

/// Volume context selecting the direct (non-shared) transport path.
pub fn direct_context() -> HashMap<String, String> {
    HashMap::from([
        (ctx::TARGET_TYPE.to_owned(), "local".to_owned()),
        (ctx::MODEL.to_owned(), "vol-model".to_owned()),
    ])
}

// ---------------------------------------------------------------------------
// Control plane
// ---------------------------------------------------------------------------

pub struct MockSma {
    pub log: CallLog,
    inventory: StdMutex<Vec<String>>,
    pub fail_create_device: AtomicBool,
    pub fail_attach: AtomicBool,
    pub fail_detach: AtomicBool,
    pub fail_disconnect: AtomicBool,
}

impl MockSma {
    pub const CONTROLLER_ID: &'static str = "ctrlr-a";
    pub const DEVICE_ID: &'static str = "dev-0";

    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            inventory: StdMutex::new(Vec::new()),
            fail_create_device: AtomicBool::new(false),
            fail_attach: AtomicBool::new(false),
            fail_detach: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
        }
    }

    /// Set the volume inventory reported by `connect_controller`.
    pub fn set_inventory(&self, ids: &[&str]) {
        *self.inventory.lock().unwrap() = ids.iter().map(|s| s.to_string()).collect();
    }
}

#[async_trait]
impl StorageManagement for MockSma {
    async fn create_device(&self, _params: &TransportParams) -> Result<String, NodeError> {
        self.log.record("create_device");
        if self.fail_create_device.load(Ordering::SeqCst) {
            return Err(NodeError::ControlPlane("device creation refused".into()));
        }
        Ok(Self::DEVICE_ID.to_owned())
    }

    async fn remove_device(&self, device_id: &str) -> Result<(), NodeError> {
        self.log.record(format!("remove_device:{device_id}"));
        Ok(())
    }

    async fn connect_controller(
        &self,
        _params: &TransportParams,
    ) -> Result<ConnectedController, NodeError> {
        self.log.record("connect_controller");
        Ok(ConnectedController {
            controller_id: Self::CONTROLLER_ID.to_owned(),
            volume_ids: self.inventory.lock().unwrap().clone(),
        })
    }

    async fn disconnect_controller(&self, controller_id: &str) -> Result<(), NodeError> {
        self.log.record(format!("disconnect_controller:{controller_id}"));
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(NodeError::ControlPlane("disconnect refused".into()));
        }
        Ok(())
    }

    async fn attach_volume(&self, volume_id: &VolumeId, device_id: &str) -> Result<(), NodeError> {
        self.log.record(format!("attach:{volume_id}:{device_id}"));
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(NodeError::ControlPlane("attach refused".into()));
        }
        Ok(())
    }

    async fn detach_volume(&self, volume_id: &VolumeId, device_id: &str) -> Result<(), NodeError> {
        self.log.record(format!("detach:{volume_id}:{device_id}"));
        if self.fail_detach.load(Ordering::SeqCst) {
            return Err(NodeError::ControlPlane("detach refused".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Initiator
// ---------------------------------------------------------------------------

/// Rendezvous used to park a mock `connect` mid-flight: the test waits on
/// `entered`, then issues a competing call, then releases via `release`.
#[derive(Clone)]
pub struct Gate {
    pub entered: Arc<Semaphore>,
    pub release: Arc<Semaphore>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            entered: Arc::new(Semaphore::new(0)),
            release: Arc::new(Semaphore::new(0)),
        }
    }
}

pub struct MockInitiator {
    log: CallLog,
    pub connected: AtomicBool,
    pub fail_disconnect: AtomicBool,
    gate: StdMutex<Option<Gate>>,
}

impl MockInitiator {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            connected: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
            gate: StdMutex::new(None),
        }
    }

    pub fn with_gate(log: CallLog, gate: Gate) -> Self {
        let this = Self::new(log);
        *this.gate.lock().unwrap() = Some(gate);
        this
    }
}

#[async_trait]
impl Initiator for MockInitiator {
    async fn connect(&self) -> Result<String, NodeError> {
        self.log.record("initiator_connect");
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.entered.add_permits(1);
            gate.release.acquire().await.unwrap().forget();
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok("/dev/nvme0n1".to_owned())
    }

    async fn disconnect(&self) -> Result<(), NodeError> {
        self.log.record("initiator_disconnect");
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(NodeError::Initiator("disconnect refused".into()));
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mounter
// ---------------------------------------------------------------------------

pub struct MockMounter {
    pub log: CallLog,
    mounted: StdMutex<HashSet<PathBuf>>,
    dirs: StdMutex<HashSet<PathBuf>>,
    pub fail_format: AtomicBool,
}

impl MockMounter {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            mounted: StdMutex::new(HashSet::new()),
            dirs: StdMutex::new(HashSet::new()),
            fail_format: AtomicBool::new(false),
        }
    }

    pub fn is_mounted(&self, path: &Path) -> bool {
        self.mounted.lock().unwrap().contains(path)
    }
}

#[async_trait]
impl Mounter for MockMounter {
    async fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        if self.mounted.lock().unwrap().contains(path) {
            Ok(true)
        } else if self.dirs.lock().unwrap().contains(path) {
            Ok(false)
        } else {
            Err(io::Error::from(io::ErrorKind::NotFound))
        }
    }

    async fn format_and_mount(
        &self,
        _device: &str,
        target: &Path,
        _fs_type: &str,
        _flags: &[String],
    ) -> io::Result<()> {
        self.log.record(format!("format_and_mount:{}", target.display()));
        if self.fail_format.load(Ordering::SeqCst) {
            return Err(io::Error::other("format failed"));
        }
        self.mounted.lock().unwrap().insert(target.to_owned());
        Ok(())
    }

    async fn mount(
        &self,
        _source: &Path,
        target: &Path,
        _fs_type: &str,
        _flags: &[String],
    ) -> io::Result<()> {
        self.log.record(format!("bind_mount:{}", target.display()));
        self.mounted.lock().unwrap().insert(target.to_owned());
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> io::Result<()> {
        self.log.record(format!("unmount:{}", target.display()));
        self.mounted.lock().unwrap().remove(target);
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.dirs.lock().unwrap().insert(path.to_owned());
        Ok(())
    }

    async fn remove_path(&self, path: &Path) -> io::Result<()> {
        self.dirs.lock().unwrap().remove(path);
        Ok(())
    }
}
