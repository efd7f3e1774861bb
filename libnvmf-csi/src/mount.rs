//! Host mount-namespace adapter.
//!
//! The lifecycle orchestrator never touches the filesystem directly; it goes
//! through the [`Mounter`] trait so its idempotence and rollback behavior can
//! be tested without real mounts.  [`SysMounter`] is the production
//! implementation: `nix::mount` for the syscalls, `/proc/self/mounts` for
//! mount-point detection, and `blkid`/`mkfs` via `tokio::process` for
//! formatting.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use nix::mount::MsFlags;
use tracing::{debug, info};

/// Filesystem operations used by the volume lifecycle.
///
/// Idempotence is a call-site policy: the orchestrator checks
/// [`Mounter::is_mount_point`] before mounting or unmounting, so the
/// individual operations may fail on repetition.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Whether `path` is currently a mount point.  Returns an
    /// [`io::ErrorKind::NotFound`] error when the path does not exist, which
    /// callers use to distinguish "not mounted" from "never created".
    async fn is_mount_point(&self, path: &Path) -> io::Result<bool>;

    /// Create a filesystem on `device` if it has none, then mount it.
    async fn format_and_mount(
        &self,
        device: &str,
        target: &Path,
        fs_type: &str,
        flags: &[String],
    ) -> io::Result<()>;

    /// Mount `source` at `target`.  Used with a `bind` flag for publish.
    async fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        flags: &[String],
    ) -> io::Result<()>;

    /// Unmount `target`.
    async fn unmount(&self, target: &Path) -> io::Result<()>;

    /// Create a directory (and parents) for a mount point.
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Remove a mount-point directory tree.
    async fn remove_path(&self, path: &Path) -> io::Result<()>;
}

/// Production [`Mounter`] operating on the host mount namespace.
#[derive(Debug, Default)]
pub struct SysMounter;

/// Translate string mount flags into [`MsFlags`] plus a data string for
/// everything the kernel takes as filesystem options.
fn parse_flags(flags: &[String]) -> (MsFlags, Option<String>) {
    let mut ms = MsFlags::empty();
    let mut data = Vec::new();
    for flag in flags {
        match flag.as_str() {
            "bind" => ms |= MsFlags::MS_BIND,
            "ro" => ms |= MsFlags::MS_RDONLY,
            "remount" => ms |= MsFlags::MS_REMOUNT,
            "noatime" => ms |= MsFlags::MS_NOATIME,
            "nodev" => ms |= MsFlags::MS_NODEV,
            "nosuid" => ms |= MsFlags::MS_NOSUID,
            "noexec" => ms |= MsFlags::MS_NOEXEC,
            other => data.push(other.to_owned()),
        }
    }
    let data = if data.is_empty() {
        None
    } else {
        Some(data.join(","))
    };
    (ms, data)
}

impl SysMounter {
    /// Whether `device` already carries a filesystem signature, probed with
    /// `blkid`.  An empty probe (exit code 2) means unformatted.
    async fn has_filesystem(&self, device: &str) -> io::Result<bool> {
        let output = tokio::process::Command::new("blkid")
            .args(["-o", "value", "-s", "TYPE", device])
            .output()
            .await?;
        Ok(output.status.success() && !output.stdout.is_empty())
    }

    async fn mkfs(&self, device: &str, fs_type: &str) -> io::Result<()> {
        let output = tokio::process::Command::new(format!("mkfs.{fs_type}"))
            .arg(device)
            .output()
            .await?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "mkfs.{fs_type} {device} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Mounter for SysMounter {
    async fn is_mount_point(&self, path: &Path) -> io::Result<bool> {
        // Propagates NotFound when the path itself is missing.
        tokio::fs::metadata(path).await?;

        // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>.
        // Mount paths managed by this plugin contain no whitespace, so the
        // octal escaping /proc uses for spaces does not apply.
        let mounts = tokio::fs::read_to_string("/proc/self/mounts").await?;
        let path = path.to_string_lossy();
        Ok(mounts
            .lines()
            .any(|line| line.split_whitespace().nth(1) == Some(path.as_ref())))
    }

    async fn format_and_mount(
        &self,
        device: &str,
        target: &Path,
        fs_type: &str,
        flags: &[String],
    ) -> io::Result<()> {
        let fs_type = if fs_type.is_empty() { "ext4" } else { fs_type };
        if !self.has_filesystem(device).await? {
            info!(device, fs_type, "creating filesystem");
            self.mkfs(device, fs_type).await?;
        } else {
            debug!(device, "device already formatted");
        }
        self.mount(Path::new(device), target, fs_type, flags).await
    }

    async fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        flags: &[String],
    ) -> io::Result<()> {
        let (ms, data) = parse_flags(flags);
        let fs_type = (!fs_type.is_empty() && !ms.contains(MsFlags::MS_BIND)).then_some(fs_type);
        nix::mount::mount(Some(source), target, fs_type, ms, data.as_deref())
            .map_err(io::Error::from)?;

        // Some kernels ignore MS_RDONLY on the initial bind-mount call; a
        // separate remount is required to actually enforce read-only access.
        if ms.contains(MsFlags::MS_BIND) && ms.contains(MsFlags::MS_RDONLY) {
            nix::mount::mount(
                None::<&str>,
                target,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            )
            .map_err(io::Error::from)?;
        }
        info!(source = %source.display(), target = %target.display(), ?flags, "mounted");
        Ok(())
    }

    async fn unmount(&self, target: &Path) -> io::Result<()> {
        nix::mount::umount(target).map_err(io::Error::from)?;
        info!(target = %target.display(), "unmounted");
        Ok(())
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn remove_path(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }
}
