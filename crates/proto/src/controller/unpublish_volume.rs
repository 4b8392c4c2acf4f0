use super::Secrets;
use crate::proto;
use std::{collections::HashMap, convert::TryFrom};
use thiserror::Error;

#[derive(Debug)]
pub struct ControllerUnpublishVolumeRequest {
  volume_id: String,
  node_id: String,
  secrets: Secrets,
}

impl ControllerUnpublishVolumeRequest {
  /// The ID of the volume. This field is REQUIRED.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The ID of the node, as returned by `NodeGetInfo`.
  #[inline]
  pub fn node_id(&self) -> &str {
    &self.node_id
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::ControllerUnpublishVolumeRequest> for ControllerUnpublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerUnpublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = match value.volume_id {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "ControllerUnpublishVolumeRequest.volume_id is empty",
        ))
      }
      v => v,
    };

    // Detaching from "all nodes" has no meaning for a disk that is
    // hot-plugged into exactly one virtual machine.
    let node_id = match value.node_id {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "ControllerUnpublishVolumeRequest.node_id is empty",
        ))
      }
      v => v,
    };

    let secrets = value.secrets.into();

    Ok(ControllerUnpublishVolumeRequest {
      volume_id,
      node_id,
      secrets,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ControllerUnpublishVolumeError {
  /// Indicates that a volume corresponding to the specified `volume_id`
  /// does not exist and is not assumed to be ControllerUnpublished from
  /// node corresponding to the specified `node_id`.
  #[error("Volume does not exist and volume not assumed ControllerUnpublished from node: {0}")]
  VolumeNotFound(String),

  /// Indicates that a node corresponding to the specified `node_id` does
  /// not exist and the volume corresponding to the specified `volume_id`
  /// is not assumed to be ControllerUnpublished from node.
  #[error("Node does not exist and volume not assumed ControllerUnpublished from node: {0}")]
  NodeNotFound(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<ControllerUnpublishVolumeError> for tonic::Status {
  fn from(value: ControllerUnpublishVolumeError) -> Self {
    use tonic::{Code, Status};

    match value {
      ControllerUnpublishVolumeError::Other(v) => v,
      value @ ControllerUnpublishVolumeError::VolumeNotFound(_)
      | value @ ControllerUnpublishVolumeError::NodeNotFound(_) => {
        Status::new(Code::NotFound, value.to_string())
      }
    }
  }
}
