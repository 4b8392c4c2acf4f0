use virt_csi_host::HostClient;
use virt_csi_mount_utils::{DefaultMounter, DeviceResolver, Mounter};
use virt_csi_proto::{IdentityService, VolumeExpansionSupport};

pub const DRIVER_NAME: &str = "virtualization.csi.driver.io";

/// Devices a virtual machine can have plugged in at once, boot disks
/// included.
pub const MAX_VOLUMES_PER_NODE: usize = 16;

/// The CSI plugin. Controller calls go to the control plane through
/// `host`; node calls act on the local machine through `mounter`.
pub struct Driver<M: Mounter = DefaultMounter> {
  pub(crate) host: HostClient,
  pub(crate) mounter: M,
  pub(crate) resolver: DeviceResolver,
  pub(crate) node_name: String,
}

impl<M: Mounter> Driver<M> {
  pub fn new(host: HostClient, mounter: M, node_name: impl Into<String>) -> Self {
    Driver {
      host,
      mounter,
      resolver: DeviceResolver::default(),
      node_name: node_name.into(),
    }
  }

  /// Look for volume devices somewhere other than `/dev/disk/by-id`.
  pub fn with_device_resolver(mut self, resolver: DeviceResolver) -> Self {
    self.resolver = resolver;
    self
  }

  #[inline]
  pub fn node_name(&self) -> &str {
    &self.node_name
  }

  #[inline]
  pub fn mounter(&self) -> &M {
    &self.mounter
  }
}

impl<M: Mounter> IdentityService for Driver<M> {
  fn name(&self) -> &str {
    DRIVER_NAME
  }

  fn version(&self) -> &str {
    env!("CARGO_PKG_VERSION")
  }

  #[inline]
  fn volume_accessibility_constraints_support(&self) -> bool {
    true
  }

  #[inline]
  fn volume_expansion_support(&self) -> VolumeExpansionSupport {
    VolumeExpansionSupport::OnlineAndOffline
  }
}
