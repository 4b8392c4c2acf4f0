mod capabilities;
mod expand_volume;
mod get_info;
mod publish_volume;
mod staging;
mod unpublish_volume;

use crate::{
  proto,
  utils::{record_request, record_response},
  IdentityService,
};
use async_trait::async_trait;
use std::{convert::TryInto, sync::Arc};
use tracing::{debug, instrument};

pub use crate::volume::*;
pub use capabilities::*;
pub use expand_volume::*;
pub use get_info::*;
pub use publish_volume::*;
pub use staging::*;
pub use unpublish_volume::*;

#[async_trait]
pub trait NodeService: IdentityService {
  /// Get the set of node services provided by this plugin.
  #[inline]
  fn node_capabilities(&self) -> NodeCapabilities {
    NodeCapabilities::empty()
  }

  /// Make the volume available at the target path. The volume is a block
  /// device or a mounted filesystem depending on the capability's access
  /// type.
  ///
  /// This operation MUST be idempotent.
  async fn node_publish_volume(
    &self,
    request: NodePublishVolumeRequest,
  ) -> Result<(), NodePublishVolumeError>;

  /// Undo `node_publish_volume`. A target that is not published replies
  /// `0 OK`.
  async fn node_unpublish_volume(
    &self,
    request: NodeUnpublishVolumeRequest,
  ) -> Result<(), NodeUnpublishVolumeError>;

  /// Grow the filesystem on a volume the controller already expanded.
  #[allow(unused_variables)]
  async fn node_expand_volume(
    &self,
    request: NodeExpandVolumeRequest,
  ) -> Result<NodeExpandVolumeResponse, NodeExpandVolumeError> {
    unsupported!("NodeExpandVolume")
  }

  async fn node_get_info(&self) -> Result<NodeGetInfoResponse, NodeGetInfoError>;
}

/// Adapter serving the `Node` gRPC service from a [`NodeService`].
pub struct Node<T: NodeService>(Arc<T>);

impl<T: NodeService> Node<T> {
  pub fn new(service: Arc<T>) -> Self {
    Node(service)
  }

  pub fn node_server(&self) -> proto::node_server::NodeServer<Self> {
    proto::node_server::NodeServer::new(self.clone())
  }
}

impl<T: NodeService> Clone for Node<T> {
  fn clone(&self) -> Self {
    Node(self.0.clone())
  }
}

#[async_trait]
impl<T: NodeService> proto::node_server::Node for Node<T> {
  #[instrument(
    name = "node.node_stage_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn node_stage_volume(
    &self,
    request: tonic::Request<proto::NodeStageVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeStageVolumeResponse>, tonic::Status> {
    let request: NodeStageVolumeRequest = record_request(request)?;
    debug!(volume_id = request.volume_id(), "nothing to stage");
    let response = record_response(Ok::<_, tonic::Status>(proto::NodeStageVolumeResponse {}))?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "node.node_unstage_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn node_unstage_volume(
    &self,
    request: tonic::Request<proto::NodeUnstageVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeUnstageVolumeResponse>, tonic::Status> {
    let request: NodeUnstageVolumeRequest = record_request(request)?;
    debug!(volume_id = request.volume_id(), "nothing to unstage");
    let response = record_response(Ok::<_, tonic::Status>(proto::NodeUnstageVolumeResponse {}))?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "node.node_publish_volume",
    skip(self, request),
    fields(request)
  )]
  async fn node_publish_volume(
    &self,
    request: tonic::Request<proto::NodePublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodePublishVolumeResponse>, tonic::Status> {
    let request = record_request(request)?;
    record_response(self.0.node_publish_volume(request).await)?;
    Ok(tonic::Response::new(proto::NodePublishVolumeResponse {}))
  }

  #[instrument(
    name = "node.node_unpublish_volume",
    skip(self, request),
    fields(request)
  )]
  async fn node_unpublish_volume(
    &self,
    request: tonic::Request<proto::NodeUnpublishVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeUnpublishVolumeResponse>, tonic::Status> {
    let request = record_request(request)?;
    record_response(self.0.node_unpublish_volume(request).await)?;
    Ok(tonic::Response::new(proto::NodeUnpublishVolumeResponse {}))
  }

  #[instrument(
    name = "node.node_get_volume_stats",
    skip(self, request),
    fields(request, response)
  )]
  async fn node_get_volume_stats(
    &self,
    request: tonic::Request<proto::NodeGetVolumeStatsRequest>,
  ) -> Result<tonic::Response<proto::NodeGetVolumeStatsResponse>, tonic::Status> {
    let request: NodeGetVolumeStatsRequest = record_request(request)?;
    debug!(volume_id = request.volume_id(), "volume stats are not collected");
    let response = record_response(Ok::<_, tonic::Status>(
      proto::NodeGetVolumeStatsResponse::default(),
    ))?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "node.node_expand_volume",
    skip(self, request),
    fields(request, response)
  )]
  async fn node_expand_volume(
    &self,
    request: tonic::Request<proto::NodeExpandVolumeRequest>,
  ) -> Result<tonic::Response<proto::NodeExpandVolumeResponse>, tonic::Status> {
    let request = record_request(request)?;
    let response = record_response(self.0.node_expand_volume(request).await)?.try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "node.node_get_capabilities",
    skip(self, _request),
    fields(response)
  )]
  async fn node_get_capabilities(
    &self,
    _request: tonic::Request<proto::NodeGetCapabilitiesRequest>,
  ) -> Result<tonic::Response<proto::NodeGetCapabilitiesResponse>, tonic::Status> {
    let response =
      record_response(Ok::<_, tonic::Status>(self.0.node_capabilities()))?.try_into()?;
    Ok(tonic::Response::new(response))
  }

  #[instrument(
    name = "node.node_get_info",
    skip(self, _request),
    fields(response)
  )]
  async fn node_get_info(
    &self,
    _request: tonic::Request<proto::NodeGetInfoRequest>,
  ) -> Result<tonic::Response<proto::NodeGetInfoResponse>, tonic::Status> {
    let response = record_response(self.0.node_get_info().await)?.try_into()?;
    Ok(tonic::Response::new(response))
  }
}
