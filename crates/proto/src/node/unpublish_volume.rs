use crate::proto;
use std::{
  convert::TryFrom,
  path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug)]
pub struct NodeUnpublishVolumeRequest {
  volume_id: String,
  target_path: PathBuf,
}

impl NodeUnpublishVolumeRequest {
  /// The ID of the volume. This field is REQUIRED.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The absolute path at which the volume was published. The SP MUST
  /// delete the file or directory it created at this path.
  #[inline]
  pub fn target_path(&self) -> &Path {
    &self.target_path
  }
}

impl TryFrom<proto::NodeUnpublishVolumeRequest> for NodeUnpublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeUnpublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = match value.volume_id {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "NodeUnpublishVolumeRequest.volume_id is empty",
        ))
      }
      v => v,
    };

    // A target that is already gone is still a valid request; unpublish
    // must stay idempotent.
    let target_path = match value.target_path {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "NodeUnpublishVolumeRequest.target_path is empty",
        ))
      }
      v => match PathBuf::from(v) {
        v if !v.is_absolute() => {
          return Err(tonic::Status::invalid_argument(
            "NodeUnpublishVolumeRequest.target_path is not absolute",
          ))
        }
        v => v,
      },
    };

    Ok(NodeUnpublishVolumeRequest {
      volume_id,
      target_path,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodeUnpublishVolumeError {
  /// Unmounting or removing the target failed.
  #[error("{0}")]
  Internal(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<NodeUnpublishVolumeError> for tonic::Status {
  fn from(value: NodeUnpublishVolumeError) -> Self {
    match value {
      NodeUnpublishVolumeError::Internal(v) => tonic::Status::internal(v),
      NodeUnpublishVolumeError::Other(v) => v,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_target_is_still_valid() {
    let parsed = NodeUnpublishVolumeRequest::try_from(proto::NodeUnpublishVolumeRequest {
      volume_id: "pvc-1".into(),
      target_path: "/does/not/exist/anywhere".into(),
    })
    .unwrap();

    assert_eq!(parsed.target_path(), Path::new("/does/not/exist/anywhere"));
  }

  #[test]
  fn requires_volume_id() {
    let err = NodeUnpublishVolumeRequest::try_from(proto::NodeUnpublishVolumeRequest {
      volume_id: String::new(),
      target_path: "/mnt/target".into(),
    })
    .unwrap_err();

    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }
}
