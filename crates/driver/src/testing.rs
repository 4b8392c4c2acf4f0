use crate::Driver;
use std::{
  fs,
  os::unix::fs::symlink,
  path::{Path, PathBuf},
  sync::Arc,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use virt_csi_host::{
  fake::FakeStore,
  resources::{
    AttachedBlockDevice, VirtualMachine, VirtualMachineBlockDeviceAttachment,
    VirtualMachineBlockDeviceAttachmentStatus, VirtualMachineDisk, VirtualMachineDiskStatus,
    VirtualMachineSpec, VirtualMachineStatus, ATTACHMENT_ATTACHED, DISK_READY,
  },
  HostClient,
};
use virt_csi_mount_utils::{fake, DeviceResolver, FakeMounter};

pub(crate) const GI: u64 = 1 << 30;
pub(crate) const NODE: &str = "node-1";

/// A driver over in-memory stores and mount table. Created disks turn
/// `Ready` and created attachments turn `Attached` immediately. Firing
/// `cancel` aborts every control plane wait, like process shutdown does.
pub(crate) struct Fixture {
  pub driver: Driver<FakeMounter>,
  pub disks: Arc<FakeStore<VirtualMachineDisk>>,
  pub attachments: Arc<FakeStore<VirtualMachineBlockDeviceAttachment>>,
  pub machines: Arc<FakeStore<VirtualMachine>>,
  pub cancel: CancellationToken,
  pub dir: TempDir,
}

impl Fixture {
  pub fn new() -> Self {
    let disks = Arc::new(FakeStore::<VirtualMachineDisk>::new([]).with_create_hook(|disk| {
      disk.status = Some(VirtualMachineDiskStatus {
        phase: Some(DISK_READY.into()),
        capacity: disk.spec.persistent_volume_claim.size.as_ref().map(|q| q.0.clone()),
      });
    }));
    let attachments = Arc::new(
      FakeStore::<VirtualMachineBlockDeviceAttachment>::new([]).with_create_hook(|attachment| {
        attachment.status = Some(VirtualMachineBlockDeviceAttachmentStatus {
          phase: Some(ATTACHMENT_ATTACHED.into()),
        });
      }),
    );
    let machines = Arc::new(FakeStore::<VirtualMachine>::new([]));
    let cancel = CancellationToken::new();
    let host = HostClient::new(disks.clone(), attachments.clone(), machines.clone(), "ns")
      .with_cancellation(cancel.clone());

    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("by-id")).unwrap();
    fs::create_dir_all(dir.path().join("dev")).unwrap();

    let mounter = FakeMounter::from(fake::FakeMounter::new([]));
    let driver = Driver::new(host, mounter, NODE)
      .with_device_resolver(DeviceResolver::new(dir.path().join("by-id")));

    Fixture {
      driver,
      disks,
      attachments,
      machines,
      cancel,
      dir,
    }
  }

  /// A disk the control plane is still provisioning and never finishes.
  pub fn add_provisioning_disk(&self, name: &str) {
    let mut disk = VirtualMachineDisk::new(name, Default::default());
    disk.status = Some(VirtualMachineDiskStatus {
      phase: Some("Provisioning".into()),
      capacity: None,
    });
    self.disks.insert(disk);
  }

  /// Swap in a mounter seeded for devices plugged so far.
  pub fn with_mounter(self, mounter: fake::FakeMounter) -> Self {
    let resolver = self.driver.resolver.clone();
    let driver = Driver::new(self.driver.host.clone(), FakeMounter::from(mounter), NODE)
      .with_device_resolver(resolver);

    Fixture { driver, ..self }
  }

  /// Plug a block device for `volume_id` in and return its resolved path.
  pub fn plug(&self, volume_id: &str, device: &str) -> PathBuf {
    let path = self.plug_file(volume_id, device);
    self.driver.mounter().add_block_device(&path);
    path
  }

  /// Like [`Fixture::plug`], but the by-id link points at a regular file.
  pub fn plug_file(&self, volume_id: &str, device: &str) -> PathBuf {
    let path = self.dir.path().join("dev").join(device);
    fs::write(&path, b"").unwrap();
    symlink(&path, self.dir.path().join("by-id").join(format!("virtio-{}", volume_id))).unwrap();
    fs::canonicalize(path).unwrap()
  }

  pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
    fs::canonicalize(self.dir.path()).unwrap().join(rel)
  }

  pub fn add_machine(&self, name: &str, devices: usize) {
    let mut vm = VirtualMachine::new(name, VirtualMachineSpec::default());
    vm.status = Some(VirtualMachineStatus {
      block_devices_attached: (0..devices)
        .map(|i| AttachedBlockDevice {
          kind: "VirtualMachineDisk".into(),
          name: format!("disk-{}", i),
          ..Default::default()
        })
        .collect(),
    });
    self.machines.insert(vm);
  }
}
