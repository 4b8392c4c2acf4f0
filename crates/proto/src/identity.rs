use crate::{proto, utils::Record, IdentityService, VolumeExpansionSupport};
use tracing::debug;

pub(crate) fn get_plugin_info(s: &impl IdentityService) -> proto::GetPluginInfoResponse {
  proto::GetPluginInfoResponse {
    name: s.name().record_field("name").into(),
    vendor_version: s.version().record_field("vendor_version").into(),
    manifest: s.manifest().record_field("manifest").clone(),
  }
}

pub(crate) fn probe(s: &impl IdentityService) -> proto::ProbeResponse {
  proto::ProbeResponse {
    ready: Some(s.ready().record_field("ready")),
  }
}

fn service(ty: proto::plugin_capability::service::Type) -> proto::PluginCapability {
  proto::PluginCapability {
    r#type: Some(proto::plugin_capability::Type::Service(
      proto::plugin_capability::Service { r#type: ty.into() },
    )),
  }
}

fn volume_expansion(ty: proto::plugin_capability::volume_expansion::Type) -> proto::PluginCapability {
  proto::PluginCapability {
    r#type: Some(proto::plugin_capability::Type::VolumeExpansion(
      proto::plugin_capability::VolumeExpansion { r#type: ty.into() },
    )),
  }
}

/// Plugin capabilities of `s`. `controller` advertises the controller
/// service.
pub(crate) fn get_capabilities(
  s: &impl IdentityService,
  controller: bool,
) -> proto::GetPluginCapabilitiesResponse {
  use proto::plugin_capability::{service, volume_expansion};

  let mut capabilities = Vec::new();
  if controller {
    capabilities.push(service(service::Type::ControllerService));
  }

  let volume_accessibility_constraints_support = s.volume_accessibility_constraints_support();
  if volume_accessibility_constraints_support {
    capabilities.push(service(service::Type::VolumeAccessibilityConstraints));
  }

  let volume_expansion_support = s.volume_expansion_support();
  match volume_expansion_support {
    VolumeExpansionSupport::None => (),
    VolumeExpansionSupport::Offline => {
      capabilities.push(volume_expansion(volume_expansion::Type::Offline));
    }
    VolumeExpansionSupport::Online => {
      capabilities.push(volume_expansion(volume_expansion::Type::Online));
    }
    VolumeExpansionSupport::OnlineAndOffline => {
      capabilities.push(volume_expansion(volume_expansion::Type::Online));
      capabilities.push(volume_expansion(volume_expansion::Type::Offline));
    }
  }

  debug!(
    controller,
    volume_accessibility_constraints_support,
    ?volume_expansion_support,
    "plugin capabilities"
  );
  proto::GetPluginCapabilitiesResponse { capabilities }.record_response()
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Plugin(VolumeExpansionSupport);

  impl IdentityService for Plugin {
    fn name(&self) -> &str {
      "test.csi.example.com"
    }

    fn version(&self) -> &str {
      "0.0.0"
    }

    fn volume_accessibility_constraints_support(&self) -> bool {
      true
    }

    fn volume_expansion_support(&self) -> VolumeExpansionSupport {
      self.0
    }
  }

  fn kinds(response: proto::GetPluginCapabilitiesResponse) -> Vec<String> {
    response
      .capabilities
      .into_iter()
      .filter_map(|c| c.r#type)
      .map(|t| match t {
        proto::plugin_capability::Type::Service(s) => format!("service:{}", s.r#type),
        proto::plugin_capability::Type::VolumeExpansion(e) => format!("expansion:{}", e.r#type),
      })
      .collect()
  }

  #[test]
  fn advertises_both_expansion_modes() {
    use proto::plugin_capability::{service, volume_expansion};

    let response = get_capabilities(&Plugin(VolumeExpansionSupport::OnlineAndOffline), true);
    assert_eq!(
      kinds(response),
      vec![
        format!("service:{}", service::Type::ControllerService as i32),
        format!("service:{}", service::Type::VolumeAccessibilityConstraints as i32),
        format!("expansion:{}", volume_expansion::Type::Online as i32),
        format!("expansion:{}", volume_expansion::Type::Offline as i32),
      ]
    );
  }

  #[test]
  fn node_only_plugin_has_no_controller_service() {
    let response = get_capabilities(&Plugin(VolumeExpansionSupport::None), false);
    assert_eq!(kinds(response).len(), 1);
  }

  #[test]
  fn probe_reports_ready() {
    assert_eq!(probe(&Plugin(VolumeExpansionSupport::None)).ready, Some(true));
  }
}
