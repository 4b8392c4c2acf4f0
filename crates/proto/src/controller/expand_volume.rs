use super::{CapacityRange, Secrets, VolumeCapability};
use crate::proto;
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  num::NonZeroU64,
};
use thiserror::Error;

#[derive(Debug)]
pub struct ControllerExpandVolumeRequest {
  volume_id: String,
  capacity_range: CapacityRange,
  secrets: Secrets,
  volume_capability: Option<VolumeCapability>,
}

impl ControllerExpandVolumeRequest {
  /// The ID of the volume to expand. This field is REQUIRED.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// This allows CO to specify the capacity requirements of the volume
  /// after expansion. This field is REQUIRED.
  #[inline]
  pub fn capacity_range(&self) -> &CapacityRange {
    &self.capacity_range
  }

  /// Secrets required by the plugin for expanding the volume.
  /// This field is OPTIONAL.
  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  /// Volume capability describing how the CO intends to use this volume.
  /// This allows SP to determine if volume is being used as a block
  /// device or mounted file system. For example - if volume is
  /// being used as a block device - the SP MAY set
  /// node_expansion_required to false in ControllerExpandVolumeResponse
  /// to skip invocation of NodeExpandVolume on the node by the CO.
  /// This is an OPTIONAL field.
  #[inline]
  pub fn volume_capability(&self) -> Option<&VolumeCapability> {
    self.volume_capability.as_ref()
  }
}

impl TryFrom<proto::ControllerExpandVolumeRequest> for ControllerExpandVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ControllerExpandVolumeRequest) -> Result<Self, Self::Error> {
    let volume_id = match value.volume_id {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "ControllerExpandVolumeRequest.volume_id is empty",
        ))
      }
      v => v,
    };

    let capacity_range = match value.capacity_range {
      None => {
        return Err(tonic::Status::invalid_argument(
          "ControllerExpandVolumeRequest.capacity_range missing",
        ))
      }
      Some(v) => v.try_into()?,
    };

    let secrets = value.secrets.into();
    let volume_capability = value.volume_capability.map(TryInto::try_into).transpose()?;

    Ok(ControllerExpandVolumeRequest {
      volume_id,
      capacity_range,
      secrets,
      volume_capability,
    })
  }
}

#[derive(Debug)]
pub struct ControllerExpandVolumeResponse {
  capacity_bytes: NonZeroU64,
  node_expansion_required: bool,
}

impl ControllerExpandVolumeResponse {
  /// `capacity_bytes` is the size of the volume after expansion. When
  /// `node_expansion_required` is set the CO follows up with
  /// `NodeExpandVolume` on the node the volume is published to.
  #[inline]
  pub fn new(capacity_bytes: NonZeroU64, node_expansion_required: bool) -> Self {
    Self {
      capacity_bytes,
      node_expansion_required,
    }
  }

  #[inline]
  pub fn capacity_bytes(&self) -> NonZeroU64 {
    self.capacity_bytes
  }

  #[inline]
  pub fn node_expansion_required(&self) -> bool {
    self.node_expansion_required
  }
}

impl TryFrom<ControllerExpandVolumeResponse> for proto::ControllerExpandVolumeResponse {
  type Error = tonic::Status;

  fn try_from(value: ControllerExpandVolumeResponse) -> Result<Self, Self::Error> {
    let capacity_bytes = i64::try_from(value.capacity_bytes.get()).map_err(|_| {
      tonic::Status::out_of_range("ControllerExpandVolumeResponse.capacity_bytes overflows int64")
    })?;

    Ok(proto::ControllerExpandVolumeResponse {
      capacity_bytes,
      node_expansion_required: value.node_expansion_required,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ControllerExpandVolumeError {
  /// Indicates that CO has specified capabilities not supported by the volume.
  #[error("Exceeds capabilities: {0}")]
  ExceedsCapabilities(String),

  /// Indicates that a volume corresponding to the specified volume_id does not exist.
  #[error("Volume does not exist: {0}")]
  VolumeNotFound(String),

  /// Indicates that the volume corresponding to the specified `volume_id` could not
  /// be expanded because it is currently published on a node but the plugin does not
  /// have ONLINE expansion capability.
  #[error("Volume in use: {0}")]
  VolumeInUse(String),

  /// Indicates that the capacity range is not allowed by the Plugin. More human-readable
  /// information MAY be provided in the gRPC `status.message` field.
  #[error("Unsupported 'capacity_range': {0}")]
  UnsupportedCapacityRange(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<ControllerExpandVolumeError> for tonic::Status {
  fn from(value: ControllerExpandVolumeError) -> Self {
    use tonic::{Code, Status};

    match value {
      ControllerExpandVolumeError::ExceedsCapabilities(v) => Status::new(Code::InvalidArgument, v),
      ControllerExpandVolumeError::VolumeNotFound(v) => Status::new(Code::NotFound, v),
      ControllerExpandVolumeError::VolumeInUse(v) => Status::new(Code::FailedPrecondition, v),
      ControllerExpandVolumeError::UnsupportedCapacityRange(v) => Status::new(Code::OutOfRange, v),
      ControllerExpandVolumeError::Other(v) => v,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn requires_capacity_range() {
    let err = ControllerExpandVolumeRequest::try_from(proto::ControllerExpandVolumeRequest {
      volume_id: "pvc-1".into(),
      ..Default::default()
    })
    .unwrap_err();

    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }

  #[test]
  fn capability_is_optional() {
    let parsed = ControllerExpandVolumeRequest::try_from(proto::ControllerExpandVolumeRequest {
      volume_id: "pvc-1".into(),
      capacity_range: Some(proto::CapacityRange {
        required_bytes: 2048,
        limit_bytes: 0,
      }),
      ..Default::default()
    })
    .unwrap();

    assert!(parsed.volume_capability().is_none());
    assert_eq!(parsed.capacity_range().required_bytes().get(), 2048);
  }

  #[test]
  fn response_carries_node_expansion_flag() {
    let response: proto::ControllerExpandVolumeResponse =
      ControllerExpandVolumeResponse::new(NonZeroU64::new(4096).unwrap(), true)
        .try_into()
        .unwrap();

    assert_eq!(response.capacity_bytes, 4096);
    assert!(response.node_expansion_required);
  }
}
