//! Node service: mounting volumes into pods.
//!
//! On the storage host itself a volume is bind-mounted from the local dataset
//! tree.  Everywhere else its exported mountpoint is mounted over NFSv4 from
//! the storage host's first address.

use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::mount::MsFlags;
use tracing::{debug, info, instrument};

use super::ZfsBackend;
use super::resolver::dataset_path;
use crate::error::CsiError;
use crate::node::CsiNode;
use crate::types::*;

/// Host-local mount table operations.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Whether `target` is currently a mount point.
    async fn is_mounted(&self, target: &str) -> Result<bool, CsiError>;

    async fn bind_mount(&self, source: &str, target: &str, read_only: bool) -> Result<(), CsiError>;

    /// Mount `source` (`:<remote path>`) over NFSv4 from `address`.
    async fn nfs_mount(
        &self,
        source: &str,
        target: &str,
        address: IpAddr,
        read_only: bool,
    ) -> Result<(), CsiError>;

    /// Unmount `target`.  A target that is not mounted is not an error.
    async fn unmount(&self, target: &str) -> Result<(), CsiError>;
}

/// Name resolution for the storage host.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, CsiError>;
}

/// [`Mounter`] backed by `mount(2)` / `umount(2)`.
pub struct SystemMounter;

/// [`HostResolver`] backed by the system resolver.
pub struct SystemHostResolver;

fn mount_failed(target: &str, reason: impl std::fmt::Display) -> CsiError {
    CsiError::MountFailed {
        path: target.to_owned(),
        reason: reason.to_string(),
    }
}

/// Whether any line of a mounts table has `path` as its mount point field.
///
/// Mount tables escape whitespace in paths (`\040`); target paths never
/// contain any, so the field is compared as is.
fn listed_in(mounts: &str, path: &str) -> bool {
    // <device> <mountpoint> <fstype> <options> <dump> <pass>
    mounts
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(path))
}

#[async_trait]
impl Mounter for SystemMounter {
    async fn is_mounted(&self, target: &str) -> Result<bool, CsiError> {
        let mounts = tokio::fs::read_to_string("/proc/self/mounts")
            .await
            .map_err(|e| CsiError::Internal(format!("read /proc/self/mounts: {e}")))?;
        Ok(listed_in(&mounts, target))
    }

    async fn bind_mount(&self, source: &str, target: &str, read_only: bool) -> Result<(), CsiError> {
        nix::mount::mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| mount_failed(target, format!("bind {source}: {e}")))?;

        // MS_RDONLY is ignored on the initial bind; it takes a remount.
        if read_only {
            nix::mount::mount(
                None::<&str>,
                target,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            )
            .map_err(|e| mount_failed(target, format!("remount read-only: {e}")))?;
        }
        Ok(())
    }

    async fn nfs_mount(
        &self,
        source: &str,
        target: &str,
        address: IpAddr,
        read_only: bool,
    ) -> Result<(), CsiError> {
        let mut flags = MsFlags::empty();
        if read_only {
            flags |= MsFlags::MS_RDONLY;
        }
        // The kernel NFS client takes the server address as an option rather
        // than resolving the source itself.
        let options = format!("addr={address}");
        nix::mount::mount(
            Some(source),
            target,
            Some("nfs4"),
            flags,
            Some(options.as_str()),
        )
        .map_err(|e| mount_failed(target, format!("nfs4 {source} ({options}): {e}")))
    }

    async fn unmount(&self, target: &str) -> Result<(), CsiError> {
        match nix::mount::umount(target) {
            Ok(()) | Err(Errno::EINVAL) | Err(Errno::ENOENT) => Ok(()),
            Err(e) => Err(CsiError::UnmountFailed {
                path: target.to_owned(),
                reason: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl HostResolver for SystemHostResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, CsiError> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| CsiError::TransportError(format!("resolve {host}: {e}")))?;
        Ok(addrs.map(|a| a.ip()).collect())
    }
}

impl ZfsBackend {
    async fn publish_local(&self, req: &NodePublishVolumeRequest) -> Result<(), CsiError> {
        let source = self
            .config
            .local_dataset_root
            .join(req.volume_id.as_str());
        let source = source.to_string_lossy();
        self.mounter
            .bind_mount(&source, &req.target_path, req.read_only)
            .await?;
        info!(%source, target_path = %req.target_path, "volume published (bind mount)");
        Ok(())
    }

    async fn publish_nfs(&self, req: &NodePublishVolumeRequest) -> Result<(), CsiError> {
        let path = dataset_path(&self.config.parent_dataset, req.volume_id.as_str())?;
        let mountpoint = self.client.mountpoint(&path).await?;

        let host = &self.config.storage_host;
        let address = self
            .hosts
            .resolve(host)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| mount_failed(&req.target_path, format!("no address for {host}")))?;

        let source = format!(":{mountpoint}");
        self.mounter
            .nfs_mount(&source, &req.target_path, address, req.read_only)
            .await?;
        info!(%source, %address, target_path = %req.target_path, "volume published (nfs)");
        Ok(())
    }
}

#[async_trait]
impl CsiNode for ZfsBackend {
    async fn stage_volume(&self, _req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("node stage volume"))
    }

    async fn unstage_volume(
        &self,
        _volume_id: &VolumeId,
        _staging_target_path: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("node unstage volume"))
    }

    #[instrument(skip(self), fields(volume_id = %req.volume_id, target_path = %req.target_path))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        if req.target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path must be set".into()));
        }
        // Validates the identifier before touching the filesystem.
        dataset_path(&self.config.parent_dataset, req.volume_id.as_str())?;

        if self.mounter.is_mounted(&req.target_path).await? {
            debug!("target already mounted");
            return Ok(());
        }

        tokio::fs::create_dir_all(Path::new(&req.target_path))
            .await
            .map_err(|e| mount_failed(&req.target_path, e))?;

        if self.config.is_storage_host() {
            self.publish_local(&req).await
        } else {
            self.publish_nfs(&req).await
        }
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        if !self.mounter.is_mounted(target_path).await? {
            debug!("target not mounted, nothing to unpublish");
            return Ok(());
        }
        self.mounter.unmount(target_path).await?;
        info!("volume unpublished");
        Ok(())
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            max_volumes: 0,
            accessible_topology: None,
        })
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(Vec::new())
    }

    async fn expand_volume(&self, _volume_id: &VolumeId, _volume_path: &str) -> Result<u64, CsiError> {
        Err(CsiError::unimplemented("node expand volume"))
    }

    async fn get_volume_stats(
        &self,
        _volume_id: &VolumeId,
        _volume_path: &str,
    ) -> Result<VolumeStats, CsiError> {
        Err(CsiError::unimplemented("node get volume stats"))
    }
}
