use crate::{
  driver::{Driver, MAX_VOLUMES_PER_NODE},
  error::host_status,
};
use async_trait::async_trait;
use std::{
  io,
  path::{Path, PathBuf},
};
use tokio::fs;
use tracing::{debug, info};
use virt_csi_host::Error as HostError;
use virt_csi_mount_utils::{FileType, MountError, Mounter};
use virt_csi_proto::node::*;

/// Filesystems volumes can be formatted with.
pub(crate) const SUPPORTED_FS_TYPES: &[&str] = &["ext4", "xfs"];
pub(crate) const DEFAULT_FS_TYPE: &str = "ext4";

fn fs_type(requested: Option<&str>) -> Result<&str, NodePublishVolumeError> {
  match requested {
    None => Ok(DEFAULT_FS_TYPE),
    Some(v) if SUPPORTED_FS_TYPES.contains(&v) => Ok(v),
    Some(v) => Err(NodePublishVolumeError::UnsupportedFsType(format!(
      "{} (supported: {})",
      v,
      SUPPORTED_FS_TYPES.join(", ")
    ))),
  }
}

fn internal(context: impl AsRef<str>, err: impl std::fmt::Display) -> String {
  format!("{}: {}", context.as_ref(), err)
}

async fn create_target_dir(path: &Path) -> io::Result<()> {
  use std::os::unix::fs::DirBuilderExt as _;

  let mut builder = std::fs::DirBuilder::new();
  builder.recursive(true).mode(0o755);
  let path = path.to_owned();
  tokio::task::spawn_blocking(move || builder.create(path))
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

async fn create_target_file(path: &Path) -> io::Result<()> {
  if let Some(parent) = path.parent() {
    create_target_dir(parent).await?;
  }

  fs::OpenOptions::new()
    .write(true)
    .create(true)
    .mode(0o666)
    .open(path)
    .await?;
  Ok(())
}

impl<M: Mounter> Driver<M> {
  async fn resolve_device(&self, volume_id: &str) -> Result<PathBuf, NodePublishVolumeError> {
    self.resolver.resolve(volume_id).await.map_err(|e| match e {
      MountError::DeviceNotFound(v) => NodePublishVolumeError::VolumeNotFound(v),
      e => NodePublishVolumeError::Internal(internal("failed to resolve device", e)),
    })
  }

  async fn require_block_device(&self, device: &Path) -> Result<(), NodePublishVolumeError> {
    match self.mounter.file_type(device).await {
      Ok(FileType::BlockDevice) => Ok(()),
      Ok(other) => Err(NodePublishVolumeError::Internal(format!(
        "{} is not a block device but {:?}",
        device.display(),
        other
      ))),
      Err(e) => Err(NodePublishVolumeError::Internal(internal("failed to stat device", e))),
    }
  }

  async fn publish_block(
    &self,
    device: &Path,
    target: &Path,
    mut options: Vec<String>,
  ) -> Result<(), NodePublishVolumeError> {
    self.require_block_device(device).await?;

    create_target_file(target).await.map_err(|e| {
      NodePublishVolumeError::Internal(internal(
        format!("failed to create target file {}", target.display()),
        e,
      ))
    })?;

    if !self.is_not_mount_point(target).await? {
      info!(target = %target.display(), "block volume already published");
      return Ok(());
    }

    options.push("bind".to_owned());
    info!(
      source = %device.display(),
      target = %target.display(),
      "mounting block device"
    );
    self
      .mounter
      .mount(Some(device), target, "", options)
      .await
      .map_err(|e| NodePublishVolumeError::Internal(internal("failed to bind mount device", e)))
  }

  async fn publish_filesystem(
    &self,
    device: &Path,
    target: &Path,
    fs_type: &str,
    options: Vec<String>,
  ) -> Result<(), NodePublishVolumeError> {
    self.require_block_device(device).await?;

    create_target_dir(target).await.map_err(|e| {
      NodePublishVolumeError::Internal(internal(
        format!("failed to create target directory {}", target.display()),
        e,
      ))
    })?;

    if !self.is_not_mount_point(target).await? {
      info!(target = %target.display(), "filesystem volume already published");
      return Ok(());
    }

    info!(
      source = %device.display(),
      target = %target.display(),
      fs_type,
      "mounting filesystem"
    );
    self
      .mounter
      .format_and_mount(device, target, fs_type, options)
      .await
      .map_err(|e| NodePublishVolumeError::Internal(internal("failed to mount filesystem", e)))
  }

  async fn is_not_mount_point(&self, target: &Path) -> Result<bool, NodePublishVolumeError> {
    self.mounter.is_not_mount_point(target).await.map_err(|e| {
      NodePublishVolumeError::Internal(internal(
        format!("failed to check mount point {}", target.display()),
        e,
      ))
    })
  }

  /// Whether the volume at `path` is used as a raw block device.
  async fn is_block_volume(&self, path: &Path, capability: Option<&VolumeCapability>) -> bool {
    match capability {
      Some(c) => c.access_type().is_block(),
      None => matches!(self.mounter.file_type(path).await, Ok(FileType::BlockDevice)),
    }
  }
}

#[async_trait]
impl<M: Mounter> NodeService for Driver<M> {
  fn node_capabilities(&self) -> NodeCapabilities {
    NodeCapabilities::EXPAND_VOLUME
  }

  async fn node_publish_volume(
    &self,
    request: NodePublishVolumeRequest,
  ) -> Result<(), NodePublishVolumeError> {
    let mut options = Vec::new();
    if request.readonly() {
      options.push("ro".to_owned());
    }

    // Validated before the device is touched.
    let fs_type = match request.volume_capability().access_type() {
      AccessType::Block => None,
      AccessType::Mount(mount) => {
        options.extend(mount.mount_flags().map(ToOwned::to_owned));
        Some(fs_type(mount.fs_type())?)
      }
    };

    let device = self.resolve_device(request.volume_id()).await?;
    let target = request.target_path();
    match fs_type {
      None => self.publish_block(&device, target, options).await,
      Some(fs_type) => self.publish_filesystem(&device, target, fs_type, options).await,
    }
  }

  async fn node_unpublish_volume(
    &self,
    request: NodeUnpublishVolumeRequest,
  ) -> Result<(), NodeUnpublishVolumeError> {
    let target = request.target_path();
    self.mounter.cleanup_mount_point(target).await.map_err(|e| {
      NodeUnpublishVolumeError::Internal(internal(
        format!("failed to unpublish {}", target.display()),
        e,
      ))
    })?;

    info!(target = %target.display(), "volume unpublished");
    Ok(())
  }

  async fn node_expand_volume(
    &self,
    request: NodeExpandVolumeRequest,
  ) -> Result<NodeExpandVolumeResponse, NodeExpandVolumeError> {
    let path = request.volume_path();
    let capacity_bytes = request.capacity_range().map(|r| r.required_bytes());

    if self.is_block_volume(path, request.volume_capability()).await {
      debug!(path = %path.display(), "raw block volume, no filesystem to resize");
      return Ok(NodeExpandVolumeResponse::new(capacity_bytes));
    }

    let device = match self.mounter.get_device_name_from_mount(path).await {
      Ok(Some((device, _))) => device,
      Ok(None) => match self.resolver.resolve(request.volume_id()).await {
        Ok(device) => device,
        Err(MountError::DeviceNotFound(v)) => return Err(NodeExpandVolumeError::VolumeNotFound(v)),
        Err(e) => {
          return Err(NodeExpandVolumeError::Internal(internal(
            "failed to resolve device",
            e,
          )))
        }
      },
      Err(e) => {
        return Err(NodeExpandVolumeError::Internal(internal(
          format!("failed to find device mounted at {}", path.display()),
          e,
        )))
      }
    };

    self.mounter.resize_fs(device, path).await.map_err(|e| {
      NodeExpandVolumeError::Internal(internal(
        format!("failed to resize filesystem at {}", path.display()),
        e,
      ))
    })?;

    Ok(NodeExpandVolumeResponse::new(capacity_bytes))
  }

  async fn node_get_info(&self) -> Result<NodeGetInfoResponse, NodeGetInfoError> {
    let count = match self.host.get_attached_device_count(&self.node_name).await {
      Ok(v) => v,
      Err(HostError::MachineNotFound) => {
        return Err(NodeGetInfoError::NodeNotFound(self.node_name.clone()))
      }
      Err(e) => return Err(host_status(e).into()),
    };

    let max_volumes = MAX_VOLUMES_PER_NODE.saturating_sub(count) as u64;
    Ok(NodeGetInfoResponse::new(&self.node_name, max_volumes).with_accessible_topology(Topology::new()))
  }
}
