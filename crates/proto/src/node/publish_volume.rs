use super::VolumeCapability;
use crate::{proto, secrets::Secrets};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug)]
pub struct NodePublishVolumeRequest {
  volume_id: String,
  publish_context: HashMap<String, String>,
  target_path: PathBuf,
  volume_capability: VolumeCapability,
  readonly: bool,
  secrets: Secrets,
  volume_context: HashMap<String, String>,
}

impl NodePublishVolumeRequest {
  /// The ID of the volume to publish. This field is REQUIRED.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// The value returned by `ControllerPublishVolume`.
  #[inline]
  pub fn publish_context(&self) -> &HashMap<String, String> {
    &self.publish_context
  }

  /// The absolute path to which the volume will be published.
  /// For volumes with an access type of block, the SP SHALL place the
  /// block device at target_path.
  /// For volumes with an access type of mount, the SP SHALL place the
  /// mounted directory at target_path.
  /// Creation of target_path is the responsibility of the SP.
  #[inline]
  pub fn target_path(&self) -> &Path {
    &self.target_path
  }

  #[inline]
  pub fn volume_capability(&self) -> &VolumeCapability {
    &self.volume_capability
  }

  /// Indicates SP MUST publish the volume in readonly mode.
  #[inline]
  pub fn readonly(&self) -> bool {
    self.readonly
  }

  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }
}

impl TryFrom<proto::NodePublishVolumeRequest> for NodePublishVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodePublishVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = match value.volume_id {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "NodePublishVolumeRequest.volume_id is empty",
        ))
      }
      v => v,
    };

    let publish_context = value.publish_context;
    let target_path = match value.target_path {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "NodePublishVolumeRequest.target_path is empty",
        ))
      }
      v => match PathBuf::from(v) {
        v if !v.is_absolute() => {
          return Err(tonic::Status::invalid_argument(
            "NodePublishVolumeRequest.target_path is not absolute",
          ))
        }
        v => v,
      },
    };

    let volume_capability = match value.volume_capability {
      None => {
        return Err(tonic::Status::invalid_argument(
          "NodePublishVolumeRequest.volume_capability missing",
        ))
      }
      Some(v) => v.try_into()?,
    };

    let readonly = value.readonly;
    let secrets = value.secrets.into();
    let volume_context = value.volume_context;

    Ok(NodePublishVolumeRequest {
      volume_id,
      publish_context,
      target_path,
      volume_capability,
      readonly,
      secrets,
      volume_context,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum NodePublishVolumeError {
  /// Indicates that a volume corresponding to the specified `volume_id` is
  /// not present on this node.
  #[error("Volume not found on this node: {0}")]
  VolumeNotFound(String),

  /// Indicates that the requested filesystem type cannot be created or
  /// mounted by the plugin.
  #[error("Unsupported filesystem type: {0}")]
  UnsupportedFsType(String),

  /// Indicates that a volume corresponding to the specified `volume_id` has already
  /// been published at the specified `target_path` but is incompatible with the specified
  /// `volume_capability` or `readonly` flag.
  #[error("Volume published but is incompatible: {0}")]
  IncompatibleVolumePublished(String),

  /// A local operation (stat, mkdir, format, mount) failed.
  #[error("{0}")]
  Internal(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<NodePublishVolumeError> for tonic::Status {
  fn from(value: NodePublishVolumeError) -> Self {
    use tonic::{Code, Status};

    match value {
      NodePublishVolumeError::Other(v) => v,
      value @ NodePublishVolumeError::VolumeNotFound(_) => {
        Status::new(Code::NotFound, value.to_string())
      }
      value @ NodePublishVolumeError::UnsupportedFsType(_) => {
        Status::new(Code::InvalidArgument, value.to_string())
      }
      value @ NodePublishVolumeError::IncompatibleVolumePublished(_) => {
        Status::new(Code::AlreadyExists, value.to_string())
      }
      NodePublishVolumeError::Internal(v) => Status::new(Code::Internal, v),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request(target_path: &str) -> proto::NodePublishVolumeRequest {
    proto::NodePublishVolumeRequest {
      volume_id: "pvc-1".into(),
      target_path: target_path.into(),
      volume_capability: Some(proto::VolumeCapability {
        access_mode: Some(proto::volume_capability::AccessMode {
          mode: proto::volume_capability::access_mode::Mode::SingleNodeWriter.into(),
        }),
        access_type: Some(proto::volume_capability::AccessType::Mount(
          proto::volume_capability::MountVolume::default(),
        )),
      }),
      readonly: true,
      ..Default::default()
    }
  }

  #[test]
  fn rejects_relative_target() {
    let err = NodePublishVolumeRequest::try_from(request("pods/vol")).unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }

  #[test]
  fn parses_mount_request() {
    let parsed = NodePublishVolumeRequest::try_from(request("/var/lib/kubelet/pods/vol")).unwrap();
    assert_eq!(parsed.target_path(), Path::new("/var/lib/kubelet/pods/vol"));
    assert!(parsed.readonly());
    assert!(!parsed.volume_capability().access_type().is_block());
  }

  #[test]
  fn error_codes() {
    let status: tonic::Status = NodePublishVolumeError::VolumeNotFound("pvc-1".into()).into();
    assert_eq!(status.code(), tonic::Code::NotFound);

    let status: tonic::Status = NodePublishVolumeError::UnsupportedFsType("btrfs".into()).into();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);

    let status: tonic::Status = NodePublishVolumeError::Internal("mount failed".into()).into();
    assert_eq!(status.code(), tonic::Code::Internal);
    assert_eq!(status.message(), "mount failed");
  }
}
