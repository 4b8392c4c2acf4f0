use crate::{proto, secrets::Secrets};
use std::{convert::TryFrom, path::PathBuf};

// The node does not advertise STAGE_UNSTAGE_VOLUME or GET_VOLUME_STATS, yet
// some orchestrators call these anyway. They are parsed only so they can be
// logged, and are never rejected.

fn path(v: String) -> Option<PathBuf> {
  match v {
    v if v.is_empty() => None,
    v => Some(PathBuf::from(v)),
  }
}

#[derive(Debug)]
pub struct NodeStageVolumeRequest {
  volume_id: String,
  #[allow(dead_code)]
  staging_target_path: Option<PathBuf>,
  #[allow(dead_code)]
  secrets: Secrets,
}

impl NodeStageVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }
}

impl TryFrom<proto::NodeStageVolumeRequest> for NodeStageVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeStageVolumeRequest) -> Result<Self, Self::Error> {
    Ok(NodeStageVolumeRequest {
      volume_id: value.volume_id,
      staging_target_path: path(value.staging_target_path),
      secrets: value.secrets.into(),
    })
  }
}

#[derive(Debug)]
pub struct NodeUnstageVolumeRequest {
  volume_id: String,
  #[allow(dead_code)]
  staging_target_path: Option<PathBuf>,
}

impl NodeUnstageVolumeRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }
}

impl TryFrom<proto::NodeUnstageVolumeRequest> for NodeUnstageVolumeRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeUnstageVolumeRequest) -> Result<Self, Self::Error> {
    Ok(NodeUnstageVolumeRequest {
      volume_id: value.volume_id,
      staging_target_path: path(value.staging_target_path),
    })
  }
}

#[derive(Debug)]
pub struct NodeGetVolumeStatsRequest {
  volume_id: String,
  #[allow(dead_code)]
  volume_path: Option<PathBuf>,
}

impl NodeGetVolumeStatsRequest {
  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }
}

impl TryFrom<proto::NodeGetVolumeStatsRequest> for NodeGetVolumeStatsRequest {
  type Error = tonic::Status;

  fn try_from(value: proto::NodeGetVolumeStatsRequest) -> Result<Self, Self::Error> {
    Ok(NodeGetVolumeStatsRequest {
      volume_id: value.volume_id,
      volume_path: path(value.volume_path),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn stage_request_hides_secrets() {
    let parsed = NodeStageVolumeRequest::try_from(proto::NodeStageVolumeRequest {
      volume_id: "pvc-1".into(),
      staging_target_path: "/var/lib/kubelet/staging".into(),
      secrets: HashMap::from([("password".to_owned(), "hunter2".to_owned())]),
      ..Default::default()
    })
    .unwrap();

    let printed = format!("{:?}", parsed);
    assert!(printed.contains("pvc-1"), "{}", printed);
    assert!(!printed.contains("hunter2"), "{}", printed);
  }

  #[test]
  fn empty_requests_are_accepted() {
    let parsed =
      NodeGetVolumeStatsRequest::try_from(proto::NodeGetVolumeStatsRequest::default()).unwrap();

    assert_eq!(parsed.volume_id(), "");
    assert!(parsed.volume_path.is_none());
  }
}
