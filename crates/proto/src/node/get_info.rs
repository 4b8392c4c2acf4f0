use super::Topology;
use crate::proto;
use std::convert::TryFrom;
use thiserror::Error;

#[derive(Debug)]
pub struct NodeGetInfoResponse {
  node_id: String,
  max_volumes_per_node: u64,
  accessible_topology: Option<Topology>,
}

impl NodeGetInfoResponse {
  /// `node_id` is what the CO passes to `ControllerPublishVolume` to refer
  /// to this node. A `max_volumes_per_node` of zero leaves the limit up to
  /// the CO.
  pub fn new(node_id: impl Into<String>, max_volumes_per_node: u64) -> Self {
    NodeGetInfoResponse {
      node_id: node_id.into(),
      max_volumes_per_node,
      accessible_topology: None,
    }
  }

  pub fn with_accessible_topology(mut self, topology: Topology) -> Self {
    self.accessible_topology = Some(topology);
    self
  }

  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  #[inline]
  pub fn max_volumes_per_node(&self) -> u64 {
    self.max_volumes_per_node
  }
}

impl TryFrom<NodeGetInfoResponse> for proto::NodeGetInfoResponse {
  type Error = tonic::Status;

  fn try_from(value: NodeGetInfoResponse) -> Result<Self, Self::Error> {
    let max_volumes_per_node = i64::try_from(value.max_volumes_per_node).map_err(|_| {
      tonic::Status::out_of_range("NodeGetInfoResponse.max_volumes_per_node overflows int64")
    })?;
    let accessible_topology = value
      .accessible_topology
      .map(|segments| proto::Topology { segments });

    Ok(proto::NodeGetInfoResponse {
      node_id: value.node_id,
      max_volumes_per_node,
      accessible_topology,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeGetInfoError {
  /// The node could not be found in the control plane.
  #[error("Node does not exist: {0}")]
  NodeNotFound(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<NodeGetInfoError> for tonic::Status {
  fn from(value: NodeGetInfoError) -> Self {
    match value {
      value @ NodeGetInfoError::NodeNotFound(_) => tonic::Status::not_found(value.to_string()),
      NodeGetInfoError::Other(v) => v,
    }
  }
}
