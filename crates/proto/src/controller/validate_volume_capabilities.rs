use super::{Secrets, VolumeCapability};
use crate::{proto, volume::volume_capabilities};
use std::{collections::HashMap, convert::TryFrom};
use thiserror::Error;

#[derive(Debug)]
pub struct ValidateVolumeCapabilitiesRequest {
  volume_id: String,
  volume_context: HashMap<String, String>,
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
  secrets: Secrets,
}

impl ValidateVolumeCapabilitiesRequest {
  /// The ID of the volume to check. This field is REQUIRED.
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  /// Volume context as returned by SP in
  /// CreateVolumeResponse.Volume.volume_context.
  /// This field is OPTIONAL and MUST match the volume_context of the
  /// volume identified by `volume_id`.
  #[inline]
  pub fn volume_context(&self) -> &HashMap<String, String> {
    &self.volume_context
  }

  /// The capabilities that the CO wants to check for the volume. This
  /// call SHALL return "confirmed" only if all the volume capabilities
  /// specified below are supported. This field is REQUIRED.
  #[inline]
  pub fn volume_capabilities(&self) -> &[VolumeCapability] {
    &self.volume_capabilities
  }

  /// See CreateVolumeRequest.parameters.
  /// This field is OPTIONAL.
  #[inline]
  pub fn parameters(&self) -> &HashMap<String, String> {
    &self.parameters
  }

  /// Secrets required by plugin to complete volume validation request.
  /// This field is OPTIONAL. Refer to the `Secrets Requirements`
  /// section on how to use this field.
  #[inline]
  pub fn secrets(&self) -> &HashMap<String, String> {
    self.secrets.as_ref()
  }
}

impl TryFrom<proto::ValidateVolumeCapabilitiesRequest> for ValidateVolumeCapabilitiesRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::ValidateVolumeCapabilitiesRequest) -> Result<Self, Self::Error> {
    let volume_id = match value.volume_id {
      v if v.is_empty() => {
        return Err(tonic::Status::invalid_argument(
          "ValidateVolumeCapabilitiesRequest.volume_id is empty",
        ))
      }
      v => v,
    };

    let volume_context = value.volume_context;
    let volume_capabilities = volume_capabilities(
      value.volume_capabilities,
      "ValidateVolumeCapabilitiesRequest.volume_capabilities",
    )?;
    let parameters = value.parameters;
    let secrets = value.secrets.into();

    Ok(ValidateVolumeCapabilitiesRequest {
      volume_id,
      volume_context,
      volume_capabilities,
      parameters,
      secrets,
    })
  }
}

#[derive(Debug)]
pub struct Confirmed {
  volume_context: HashMap<String, String>,
  volume_capabilities: Vec<VolumeCapability>,
  parameters: HashMap<String, String>,
}

impl Confirmed {
  /// Confirms `volume_capabilities` for a volume, echoing back the context
  /// and parameters the CO asked about.
  pub fn new(
    volume_capabilities: Vec<VolumeCapability>,
    volume_context: HashMap<String, String>,
    parameters: HashMap<String, String>,
  ) -> Self {
    Self {
      volume_context,
      volume_capabilities,
      parameters,
    }
  }
}

impl From<Confirmed> for proto::validate_volume_capabilities_response::Confirmed {
  fn from(value: Confirmed) -> Self {
    proto::validate_volume_capabilities_response::Confirmed {
      volume_context: value.volume_context,
      volume_capabilities: value.volume_capabilities.into_iter().map(Into::into).collect(),
      parameters: value.parameters,
      mutable_parameters: HashMap::new(),
    }
  }
}

#[derive(Debug)]
pub enum ValidateVolumeCapabilitiesResponse {
  Confirmed(Confirmed),
  Message(String),
}

impl From<ValidateVolumeCapabilitiesResponse> for proto::ValidateVolumeCapabilitiesResponse {
  fn from(value: ValidateVolumeCapabilitiesResponse) -> Self {
    match value {
      ValidateVolumeCapabilitiesResponse::Confirmed(confirmed) => {
        proto::ValidateVolumeCapabilitiesResponse {
          confirmed: Some(confirmed.into()),
          message: String::new(),
        }
      }

      ValidateVolumeCapabilitiesResponse::Message(message) => {
        proto::ValidateVolumeCapabilitiesResponse {
          confirmed: None,
          message,
        }
      }
    }
  }
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ValidateVolumeCapabilitiesError {
  /// Indicates that a volume corresponding to the specified `volume_id` does not exist.
  #[error("Volume does not exist: {0}")]
  VolumeNotFound(String),

  #[error(transparent)]
  #[doc(hidden)]
  Other(#[from] tonic::Status),
}

impl From<ValidateVolumeCapabilitiesError> for tonic::Status {
  fn from(value: ValidateVolumeCapabilitiesError) -> Self {
    use tonic::{Code, Status};

    match value {
      ValidateVolumeCapabilitiesError::VolumeNotFound(v) => Status::new(Code::NotFound, v),
      ValidateVolumeCapabilitiesError::Other(v) => v,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::volume::{AccessMode, AccessType};

  #[test]
  fn requires_capabilities() {
    let err =
      ValidateVolumeCapabilitiesRequest::try_from(proto::ValidateVolumeCapabilitiesRequest {
        volume_id: "pvc-1".into(),
        ..Default::default()
      })
      .unwrap_err();

    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }

  #[test]
  fn message_response_has_no_confirmation() {
    let response: proto::ValidateVolumeCapabilitiesResponse =
      ValidateVolumeCapabilitiesResponse::Message("unsupported".into()).into();

    assert!(response.confirmed.is_none());
    assert_eq!(response.message, "unsupported");
  }

  #[test]
  fn confirmed_response_echoes_capabilities() {
    let capability = VolumeCapability::new(AccessMode::SingleNodeWriter, AccessType::Block);
    let response: proto::ValidateVolumeCapabilitiesResponse =
      ValidateVolumeCapabilitiesResponse::Confirmed(Confirmed::new(
        vec![capability],
        HashMap::new(),
        HashMap::new(),
      ))
      .into();

    let confirmed = response.confirmed.unwrap();
    assert_eq!(confirmed.volume_capabilities.len(), 1);
    assert!(response.message.is_empty());
  }
}
