use crate::{driver::Driver, error::host_status};
use async_trait::async_trait;
use std::num::NonZeroU64;
use tonic::Status;
use tracing::{debug, info};
use virt_csi_host::Error as HostError;
use virt_csi_mount_utils::Mounter;
use virt_csi_proto::controller::*;

/// Optional `CreateVolume` parameter naming the control plane storage
/// class.
pub(crate) const STORAGE_CLASS_PARAMETER: &str = "dvpStorageClass";

/// Only modes that keep a disk on one virtual machine at a time can be
/// served by hot-plugging it.
fn unsupported_access_mode(capabilities: &[VolumeCapability]) -> Option<AccessMode> {
  capabilities
    .iter()
    .map(|c| c.access_mode())
    .find(|mode| !mode.is_single_node())
}

#[async_trait]
impl<M: Mounter> ControllerService for Driver<M> {
  fn capabilities(&self) -> ControllerCapabilities {
    ControllerCapabilities::CREATE_DELETE_VOLUME
      | ControllerCapabilities::PUBLISH_UNPUBLISH_VOLUME
      | ControllerCapabilities::EXPAND_VOLUME
  }

  async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume, CreateVolumeError> {
    if let Some(mode) = unsupported_access_mode(request.volume_capabilities()) {
      return Err(CreateVolumeError::UnsupportedCapability(format!(
        "access mode {:?} is not supported",
        mode
      )));
    }

    let capacity = request
      .capacity_range()
      .map(CapacityRange::required_bytes)
      .ok_or_else(|| Status::invalid_argument("CreateVolumeRequest.capacity_range is required"))?;
    let storage_class = request
      .parameters()
      .get(STORAGE_CLASS_PARAMETER)
      .map(String::as_str)
      .filter(|v| !v.is_empty());

    let name = request.name();
    self
      .host
      .create_disk(name, capacity.get(), storage_class)
      .await
      .map_err(host_status)?;
    self
      .host
      .wait_disk_creation(name)
      .await
      .map_err(host_status)?;

    Ok(Volume::new(name, Some(capacity)).with_content_source(request.volume_content_source().cloned()))
  }

  async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<(), DeleteVolumeError> {
    let disk = match self.host.delete_disk(request.volume_id()).await {
      Ok(disk) => disk,
      Err(HostError::DiskAlreadyDeleted) => {
        info!(volume_id = request.volume_id(), "volume already deleted");
        return Ok(());
      }
      Err(e) => return Err(host_status(e).into()),
    };

    self
      .host
      .wait_disk_deletion(&disk.name)
      .await
      .map_err(host_status)?;
    Ok(())
  }

  async fn controller_publish_volume(
    &self,
    request: ControllerPublishVolumeRequest,
  ) -> Result<ControllerPublishVolumeResponse, ControllerPublishVolumeError> {
    let attachment = self
      .host
      .attach_disk(request.volume_id(), request.node_id())
      .await
      .map_err(host_status)?;
    debug!(attachment = %attachment.name, "waiting for disk to attach");
    self
      .host
      .wait_disk_attaching(&attachment.name)
      .await
      .map_err(host_status)?;

    Ok(ControllerPublishVolumeResponse::new())
  }

  async fn controller_unpublish_volume(
    &self,
    request: ControllerUnpublishVolumeRequest,
  ) -> Result<(), ControllerUnpublishVolumeError> {
    let attachment = match self
      .host
      .detach_disk(request.volume_id(), request.node_id())
      .await
    {
      Ok(attachment) => attachment,
      Err(HostError::AttachmentAlreadyDeleted) => {
        info!(
          volume_id = request.volume_id(),
          node_id = request.node_id(),
          "volume already detached"
        );
        return Ok(());
      }
      Err(e) => return Err(host_status(e).into()),
    };

    self
      .host
      .wait_disk_detaching(&attachment.name)
      .await
      .map_err(host_status)?;
    Ok(())
  }

  async fn validate_volume_capabilities(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
  ) -> Result<ValidateVolumeCapabilitiesResponse, ValidateVolumeCapabilitiesError> {
    match self.host.get_disk(request.volume_id()).await {
      Ok(_) => (),
      Err(HostError::DiskNotFound) => {
        return Err(ValidateVolumeCapabilitiesError::VolumeNotFound(
          request.volume_id().to_owned(),
        ))
      }
      Err(e) => return Err(host_status(e).into()),
    }

    if let Some(mode) = unsupported_access_mode(request.volume_capabilities()) {
      return Ok(ValidateVolumeCapabilitiesResponse::Message(format!(
        "access mode {:?} is not supported",
        mode
      )));
    }

    Ok(ValidateVolumeCapabilitiesResponse::Confirmed(Confirmed::new(
      request.volume_capabilities().to_vec(),
      request.volume_context().clone(),
      request.parameters().clone(),
    )))
  }

  async fn controller_expand_volume(
    &self,
    request: ControllerExpandVolumeRequest,
  ) -> Result<ControllerExpandVolumeResponse, ControllerExpandVolumeError> {
    let volume_id = request.volume_id();
    let requested = request.capacity_range().required_bytes();
    let node_expansion_required = request
      .volume_capability()
      .map_or(true, |c| !c.access_type().is_block());

    let not_found = |e: HostError| match e {
      HostError::DiskNotFound => ControllerExpandVolumeError::VolumeNotFound(volume_id.to_owned()),
      e => host_status(e).into(),
    };

    self
      .host
      .wait_disk_creation(volume_id)
      .await
      .map_err(not_found)?;
    let disk = self.host.get_disk(volume_id).await.map_err(not_found)?;

    if let Some(observed) = disk.capacity.and_then(NonZeroU64::new) {
      if observed >= requested {
        info!(volume_id, observed = observed.get(), "volume already large enough");
        return Ok(ControllerExpandVolumeResponse::new(
          observed,
          node_expansion_required,
        ));
      }
    }

    self
      .host
      .update_disk_capacity(volume_id, requested.get())
      .await
      .map_err(not_found)?;

    Ok(ControllerExpandVolumeResponse::new(
      requested,
      node_expansion_required,
    ))
  }
}
