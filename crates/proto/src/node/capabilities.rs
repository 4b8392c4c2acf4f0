use std::convert::TryFrom;

use bitflags::bitflags;

use crate::proto;

#[rustfmt::skip]
bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
  pub struct NodeCapabilities: u32 {
    const STAGE_UNSTAGE_VOLUME         = 0b_0000_0000_0000_0001;
    const GET_VOLUME_STATS             = 0b_0000_0000_0000_0010;
    const EXPAND_VOLUME                = 0b_0000_0000_0000_0100;
    const VOLUME_CONDITION             = 0b_0000_0000_0000_1000;
    const SINGLE_NODE_MULTI_WRITER     = 0b_0000_0000_0001_0000;
  }
}

use proto::node_service_capability::rpc::Type;

const CAPABILITY_TYPES: &[(NodeCapabilities, Type)] = &[
  (NodeCapabilities::STAGE_UNSTAGE_VOLUME, Type::StageUnstageVolume),
  (NodeCapabilities::GET_VOLUME_STATS, Type::GetVolumeStats),
  (NodeCapabilities::EXPAND_VOLUME, Type::ExpandVolume),
  (NodeCapabilities::VOLUME_CONDITION, Type::VolumeCondition),
  (NodeCapabilities::SINGLE_NODE_MULTI_WRITER, Type::SingleNodeMultiWriter),
];

impl TryFrom<NodeCapabilities> for proto::NodeGetCapabilitiesResponse {
  type Error = tonic::Status;

  fn try_from(value: NodeCapabilities) -> Result<Self, Self::Error> {
    let capabilities = CAPABILITY_TYPES
      .iter()
      .filter(|(flag, _)| value.contains(*flag))
      .map(|(_, ty)| proto::NodeServiceCapability {
        r#type: Some(proto::node_service_capability::Type::Rpc(
          proto::node_service_capability::Rpc {
            r#type: (*ty).into(),
          },
        )),
      })
      .collect();

    Ok(proto::NodeGetCapabilitiesResponse { capabilities })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn expand_only() {
    let response =
      proto::NodeGetCapabilitiesResponse::try_from(NodeCapabilities::EXPAND_VOLUME).unwrap();

    assert_eq!(response.capabilities.len(), 1);
    match &response.capabilities[0].r#type {
      Some(proto::node_service_capability::Type::Rpc(rpc)) => {
        assert_eq!(rpc.r#type, i32::from(Type::ExpandVolume))
      }
      other => panic!("unexpected capability {:?}", other),
    }
  }
}
