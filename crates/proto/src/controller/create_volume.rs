use super::{CapacityRange, Secrets, VolumeCapability, VolumeContentSource};
use crate::{proto, volume::volume_capabilities};
use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
};
use thiserror::Error;

#[derive(Debug)]
pub struct CreateVolumeRequest {
  name: String,
  capacity_range: Option<CapacityRange>,
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
  secrets: Secrets,
  volume_content_source: Option<VolumeContentSource>,
}

impl CreateVolumeRequest {
  /// The suggested name for the storage space. This field is REQUIRED.
  /// It serves two purposes:
  /// 1) Idempotency - This name is generated by the CO to achieve
  ///    idempotency. The Plugin SHOULD ensure that multiple
  ///    `CreateVolume` calls for the same name do not result in more
  ///    than one piece of storage provisioned corresponding to that
  ///    name.
  /// 2) Suggested name - Some storage systems allow callers to specify
  ///    an identifier by which to refer to the newly provisioned
  ///    storage.
  #[inline]
  pub fn name(&self) -> &str {
    &self.name
  }

  /// This field is OPTIONAL. This allows the CO to specify the capacity
  /// requirement of the volume to be provisioned.
  #[inline]
  pub fn capacity_range(&self) -> Option<&CapacityRange> {
    self.capacity_range.as_ref()
  }

  /// The capabilities that the provisioned volume MUST have. SP MUST
  /// provision a volume that will satisfy ALL of the capabilities
  /// specified in this list. This field is REQUIRED.
  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }

  /// Plugin specific creation-time parameters passed in as opaque
  /// key-value pairs. This field is OPTIONAL.
  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }

  /// Secrets required by plugin to complete volume creation request.
  /// This field is OPTIONAL.
  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }

  /// If specified, the new volume will be pre-populated with data from
  /// this source. This field is OPTIONAL.
  #[inline]
  pub fn volume_content_source(&self) -> Option<&VolumeContentSource> {
    self.volume_content_source.as_ref()
  }
}

impl TryFrom<proto::CreateVolumeRequest> for CreateVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::CreateVolumeRequest) -> Result<Self, Self::Error> {
    let name = match value.name {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "CreateVolumeRequest.name is empty",
        ))
      }
      v => v,
    };

    let capacity_range = value.capacity_range.map(TryInto::try_into).transpose()?;
    let volume_capabilities = volume_capabilities(
      value.volume_capabilities,
      "CreateVolumeRequest.volume_capabilities",
    )?;
    let parameters = value.parameters;
    let secrets = value.secrets.into();
    let volume_content_source = match value.volume_content_source {
      None => None,
      Some(v) => v.try_into()?,
    };

    Ok(CreateVolumeRequest {
      name,
      capacity_range,
      volume_capabilities,
      parameters,
      secrets,
      volume_content_source,
    })
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CreateVolumeError {
  /// Indicates that one of the requested capabilities (access mode or
  /// access type) is not supported by the plugin.
  #[error("Unsupported capability: {0}")]
  UnsupportedCapability(String),

  /// Indicates that a volume corresponding to the specified volume `name`
  /// already exists but is incompatible with the specified `capacity_range`,
  /// `volume_capabilities`, `parameters`, `accessibility_requirements` or
  /// `volume_content_source`.
  #[error("Volume already exists but is incompatible: {0}")]
  VolumeAlreadyExists(String),

  /// Indicates that the capacity range is not allowed by the Plugin.
  #[error("Unsupported 'capacity_range': {0}")]
  UnsupportedCapacityRange(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<CreateVolumeError> for tonic::Status {
  fn from(value: CreateVolumeError) -> Self {
    use tonic::{Code, Status};

    match value {
      CreateVolumeError::UnsupportedCapability(v) => Status::new(Code::InvalidArgument, v),
      CreateVolumeError::VolumeAlreadyExists(v) => Status::new(Code::AlreadyExists, v),
      CreateVolumeError::UnsupportedCapacityRange(v) => Status::new(Code::OutOfRange, v),
      CreateVolumeError::Other(v) => v,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::volume::{AccessMode, AccessType};

  fn capability() -> proto::VolumeCapability {
    VolumeCapability::new(AccessMode::SingleNodeWriter, AccessType::Block).into()
  }

  #[test]
  fn requires_name() {
    let err = CreateVolumeRequest::try_from(proto::CreateVolumeRequest {
      volume_capabilities: vec![capability()],
      ..Default::default()
    })
    .unwrap_err();

    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }

  #[test]
  fn requires_capabilities() {
    let err = CreateVolumeRequest::try_from(proto::CreateVolumeRequest {
      name: "vol-a".into(),
      ..Default::default()
    })
    .unwrap_err();

    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }

  #[test]
  fn keeps_parameters_and_hides_secrets() {
    let request = CreateVolumeRequest::try_from(proto::CreateVolumeRequest {
      name: "vol-a".into(),
      volume_capabilities: vec![capability()],
      parameters: vec![("dvpStorageClass".to_owned(), "fast".to_owned())]
        .into_iter()
        .collect(),
      secrets: vec![("password".to_owned(), "hunter2".to_owned())]
        .into_iter()
        .collect(),
      ..Default::default()
    })
    .unwrap();

    assert_eq!(request.name(), "vol-a");
    assert_eq!(
      request.parameters().get("dvpStorageClass").map(String::as_str),
      Some("fast")
    );
    assert!(request.capacity_range().is_none());
    assert!(!format!("{:?}", request).contains("hunter2"));
  }
}
