mod capabilities;
mod create_volume;
mod delete_volume;
mod expand_volume;
mod publish_volume;
mod unpublish_volume;
mod validate_volume_capabilities;

use crate::{
  identity, proto,
  secrets::*,
  utils::{record_request, record_response},
  IdentityService,
};
use async_trait::async_trait;
use std::{convert::TryInto, sync::Arc};
use tracing::instrument;

pub use crate::volume::*;
pub use capabilities::*;
pub use create_volume::*;
pub use delete_volume::*;
pub use expand_volume::*;
pub use publish_volume::*;
pub use unpublish_volume::*;
pub use validate_volume_capabilities::*;

#[async_trait]
pub trait ControllerService: IdentityService {
  /// Get the set of services provided by this controller.
  #[inline]
  fn capabilities(&self) -> ControllerCapabilities {
    ControllerCapabilities::empty()
  }

  /// Provision a new volume. Required with the `CREATE_DELETE_VOLUME`
  /// capability.
  ///
  /// This operation MUST be idempotent: a second call with the same `name`
  /// and compatible arguments replies with the same volume.
  #[allow(unused_variables)]
  async fn create_volume(&self, request: CreateVolumeRequest) -> Result<Volume, CreateVolumeError> {
    unsupported!("CreateVolume")
  }

  /// Deprovision a volume. Required with the `CREATE_DELETE_VOLUME`
  /// capability.
  ///
  /// This operation MUST be idempotent. A volume that no longer exists is
  /// reported as deleted.
  #[allow(unused_variables)]
  async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<(), DeleteVolumeError> {
    unsupported!("DeleteVolume")
  }

  /// Make a volume available on the given node. Required with the
  /// `PUBLISH_UNPUBLISH_VOLUME` capability. This RPC is not executed on the
  /// node where the volume will be used.
  ///
  /// Publishing a volume that is already published to the same node with a
  /// compatible capability replies `0 OK`.
  #[allow(unused_variables)]
  async fn controller_publish_volume(
    &self,
    request: ControllerPublishVolumeRequest,
  ) -> Result<ControllerPublishVolumeResponse, ControllerPublishVolumeError> {
    unsupported!("ControllerPublishVolume")
  }

  /// The reverse of `controller_publish_volume`. Required with the
  /// `PUBLISH_UNPUBLISH_VOLUME` capability.
  ///
  /// A volume that is not published to the node replies `0 OK`.
  #[allow(unused_variables)]
  async fn controller_unpublish_volume(
    &self,
    request: ControllerUnpublishVolumeRequest,
  ) -> Result<(), ControllerUnpublishVolumeError> {
    unsupported!("ControllerUnpublishVolume")
  }

  /// Check whether a pre-provisioned volume has all the capabilities the CO
  /// wants. Every controller plugin implements this.
  async fn validate_volume_capabilities(
    &self,
    request: ValidateVolumeCapabilitiesRequest,
  ) -> Result<ValidateVolumeCapabilitiesResponse, ValidateVolumeCapabilitiesError>;

  /// Grow a volume. Required with the `EXPAND_VOLUME` capability.
  ///
  /// Only the storage backing is grown here. When the response sets
  /// `node_expansion_required` the CO calls `NodeExpandVolume` afterwards.
  #[allow(unused_variables)]
  async fn controller_expand_volume(
    &self,
    request: ControllerExpandVolumeRequest,
  ) -> Result<ControllerExpandVolumeResponse, ControllerExpandVolumeError> {
    unsupported!("ControllerExpandVolume")
  }
}

/// Adapter serving the `Identity` and `Controller` gRPC services from a
/// [`ControllerService`].
pub struct Controller<T: ControllerService>(Arc<T>);

impl<T: ControllerService> Controller<T> {
  pub fn new(service: Arc<T>) -> Self {
    Controller(service)
  }

  pub fn identity_server(&self) -> proto::identity_server::IdentityServer<Self> {
    proto::identity_server::IdentityServer::new(self.clone())
  }

  pub fn controller_server(&self) -> proto::controller_server::ControllerServer<Self> {
    proto::controller_server::ControllerServer::new(self.clone())
  }
}

impl<T: ControllerService> Clone for Controller<T> {
  fn clone(&self) -> Self {
    Controller(self.0.clone())
  }
}

#[async_trait]
impl<T: ControllerService> proto::identity_server::Identity for Controller<T> {
  #[instrument(
    name = "identity.get_plugin_info",
    skip(self, _request),
    fields(name, vendor_version, manifest)
  )]
  async fn get_plugin_info(
    &self,
    _request: tonic::Request<proto::GetPluginInfoRequest>,
  ) -> Result<tonic::Response<proto::GetPluginInfoResponse>, tonic::Status> {
    Ok(tonic::Response::new(identity::get_plugin_info(&*self.0)))
  }

  #[instrument(
    name = "identity.get_plugin_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn get_plugin_capabilities(
    &self,
    _request: tonic::Request<proto::GetPluginCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::GetPluginCapabilitiesResponse>, tonic::Status> {
    let response = identity::get_capabilities(&*self.0, true);

    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "identity.probe", skip(self, _request), fields(ready))]
  async fn probe(
    &self,
    _request: tonic::Request<proto::ProbeRequest>,
  ) -> Result<tonic::Response<proto::ProbeResponse>, tonic::Status> {
    Ok(tonic::Response::new(identity::probe(&*self.0)))
  }
}

#[async_trait]
impl<T: ControllerService> proto::controller_server::Controller for Controller<T> {
  #[instrument(
    name = "controller.create_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn create_volume(
    &self,
    request: tonic::Request<proto::CreateVolumeRequest>,
  ) -> Result<tonic::Response<proto::CreateVolumeResponse>, tonic::Status> {
    let request = record_request(request)?;
    let response = record_response(self.0.create_volume(request).await)?.try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.delete_volume",
    skip(self, request),
    fields(request)
  )]
  async fn delete_volume(
    &self,
    request: tonic::Request<proto::DeleteVolumeRequest>,
  ) -> Result<tonic::Response<proto::DeleteVolumeResponse>, tonic::Status> {
    let request = record_request(request)?;
    record_response(self.0.delete_volume(request).await)?;
    Ok(tonic::Response::new(proto::DeleteVolumeResponse {}))
  }

  #[instrument(
    name = "controller.controller_publish_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn controller_publish_volume(
    &self,
    request: tonic::Request<proto::ControllerPublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerPublishVolumeResponse>, tonic::Status> {
    let request = record_request(request)?;
    let response = record_response(self.0.controller_publish_volume(request).await)?.into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "controller.controller_unpublish_volume",
    skip(self, request),
    fields(request)
  )]
  async fn controller_unpublish_volume(
    &self,
    request: tonic::Request<proto::ControllerUnpublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerUnpublishVolumeResponse>, tonic::Status> {
    let request = record_request(request)?;
    record_response(self.0.controller_unpublish_volume(request).await)?;
    Ok(tonic::Response::new(
      proto::ControllerUnpublishVolumeResponse {},
    ))
  }

  #[instrument(
    name = "controller.validate_volume_capabilities",
    skip(self, request),
    fields(request, response)
  )]
  async fn validate_volume_capabilities(
    &self,
    request: tonic::Request<proto::ValidateVolumeCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::ValidateVolumeCapabilitiesResponse>, tonic::Status> {
    let request = record_request(request)?;
    let response = record_response(self.0.validate_volume_capabilities(request).await)?.into();
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "controller.list_volumes", skip(self, _request))]
  async fn list_volumes(
    &self,
    _request: tonic::Request<proto::ListVolumesRequest>,
  ) -> Result<tonic::Response<proto::ListVolumesResponse>, tonic::Status> {
    unsupported!("ListVolumes")
  }

  #[instrument(name = "controller.get_capacity", skip(self, _request))]
  async fn get_capacity(
    &self,
    _request: tonic::Request<proto::GetCapacityRequest>,
  ) -> Result<tonic::Response<proto::GetCapacityResponse>, tonic::Status> {
    unsupported!("GetCapacity")
  }

  #[instrument(
    name = "controller.controller_get_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn controller_get_capabilities(
    &self,
    _request: tonic::Request<proto::ControllerGetCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::ControllerGetCapabilitiesResponse>, tonic::Status> {
    let response = record_response(Ok::<_, tonic::Status>(self.0.capabilities()))?.try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "controller.create_snapshot", skip(self, _request))]
  async fn create_snapshot(
    &self,
    _request: tonic::Request<proto::CreateSnapshotRequest>,
  ) -> Result<tonic::Response<proto::CreateSnapshotResponse>, tonic::Status> {
    unsupported!("CreateSnapshot")
  }

  #[instrument(name = "controller.delete_snapshot", skip(self, _request))]
  async fn delete_snapshot(
    &self,
    _request: tonic::Request<proto::DeleteSnapshotRequest>,
  ) -> Result<tonic::Response<proto::DeleteSnapshotResponse>, tonic::Status> {
    unsupported!("DeleteSnapshot")
  }

  #[instrument(name = "controller.list_snapshots", skip(self, _request))]
  async fn list_snapshots(
    &self,
    _request: tonic::Request<proto::ListSnapshotsRequest>,
  ) -> Result<tonic::Response<proto::ListSnapshotsResponse>, tonic::Status> {
    unsupported!("ListSnapshots")
  }

  #[instrument(
    name = "controller.controller_expand_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn controller_expand_volume(
    &self,
    request: tonic::Request<proto::ControllerExpandVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerExpandVolumeResponse>, tonic::Status> {
    let request = record_request(request)?;
    let response = record_response(self.0.controller_expand_volume(request).await)?.try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(name = "controller.controller_get_volume", skip(self, _request))]
  async fn controller_get_volume(
    &self,
    _request: tonic::Request<proto::ControllerGetVolumeRequest>,
  ) -> Result<tonic::Response<proto::ControllerGetVolumeResponse>, tonic::Status> {
    unsupported!("ControllerGetVolume")
  }
}
