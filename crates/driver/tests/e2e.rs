use hyper_util::rt::TokioIo;
use std::{fs, os::unix::fs::symlink, path::Path, sync::Arc};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tonic::{
  transport::{Channel, Endpoint, Uri},
  Code,
};
use tower::service_fn;
use virt_csi_driver::{server, Driver, DRIVER_NAME};
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
use virt_csi_proto::proto::{
  self, controller_client::ControllerClient, identity_client::IdentityClient,
  node_client::NodeClient, volume_capability,
};

const GI: i64 = 1 << 30;
const NODE: &str = "node-1";

fn mount_capability() -> proto::VolumeCapability {
  proto::VolumeCapability {
    access_mode: Some(volume_capability::AccessMode {
      mode: volume_capability::access_mode::Mode::SingleNodeWriter.into(),
    }),
    access_type: Some(volume_capability::AccessType::Mount(
      volume_capability::MountVolume {
        fs_type: "ext4".into(),
        ..Default::default()
      },
    )),
  }
}

fn capacity(bytes: i64) -> Option<proto::CapacityRange> {
  Some(proto::CapacityRange {
    required_bytes: bytes,
    limit_bytes: 0,
  })
}

async fn connect(socket: &Path) -> Channel {
  let socket = socket.to_owned();
  Endpoint::try_from("http://[::]:50051")
    .unwrap()
    .connect_with_connector(service_fn(move |_: Uri| {
      let socket = socket.clone();
      async move { Ok::<_, std::io::Error>(TokioIo::new(UnixStream::connect(socket).await?)) }
    }))
    .await
    .unwrap()
}

#[tokio::test]
async fn volume_lifecycle_over_grpc() {
  let dir = tempfile::tempdir().unwrap();
  let root = fs::canonicalize(dir.path()).unwrap();

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
  let mut vm = VirtualMachine::new(NODE, VirtualMachineSpec::default());
  vm.status = Some(VirtualMachineStatus {
    block_devices_attached: vec![AttachedBlockDevice {
      kind: "VirtualMachineDisk".into(),
      name: "boot".into(),
      ..Default::default()
    }],
  });
  let machines = Arc::new(FakeStore::new([vm]));
  let host = HostClient::new(disks.clone(), attachments.clone(), machines, "ns");

  // The hypervisor exposes the volume id as the disk serial.
  fs::create_dir_all(root.join("by-id")).unwrap();
  fs::create_dir_all(root.join("dev")).unwrap();
  fs::write(root.join("dev/vdb"), b"").unwrap();
  symlink(root.join("dev/vdb"), root.join("by-id/virtio-vol-a")).unwrap();

  let driver = Arc::new(
    Driver::new(
      host,
      FakeMounter::from(fake::FakeMounter::new([]).with_block_device(root.join("dev/vdb"))),
      NODE,
    )
      .with_device_resolver(DeviceResolver::new(root.join("by-id"))),
  );

  let socket = root.join("csi.sock");
  let listener = server::bind(&socket).unwrap();
  let cancel = CancellationToken::new();
  let serving = tokio::spawn({
    let driver = driver.clone();
    let cancel = cancel.clone();
    async move { server::serve(driver, listener, async move { cancel.cancelled().await }).await }
  });

  let channel = connect(&socket).await;
  let mut identity = IdentityClient::new(channel.clone());
  let mut controller = ControllerClient::new(channel.clone());
  let mut node = NodeClient::new(channel);

  let info = identity
    .get_plugin_info(proto::GetPluginInfoRequest {})
    .await
    .unwrap()
    .into_inner();
  assert_eq!(info.name, DRIVER_NAME);

  let volume = controller
    .create_volume(proto::CreateVolumeRequest {
      name: "vol-a".into(),
      capacity_range: capacity(10 * GI),
      volume_capabilities: vec![mount_capability()],
      ..Default::default()
    })
    .await
    .unwrap()
    .into_inner()
    .volume
    .unwrap();
  assert_eq!(volume.volume_id, "vol-a");
  assert_eq!(volume.capacity_bytes, 10 * GI);

  for _ in 0..2 {
    controller
      .controller_publish_volume(proto::ControllerPublishVolumeRequest {
        volume_id: "vol-a".into(),
        node_id: NODE.into(),
        volume_capability: Some(mount_capability()),
        ..Default::default()
      })
      .await
      .unwrap();
  }
  assert_eq!(attachments.objects().len(), 1);

  let target = root.join("pods/vol-a/mount");
  node
    .node_publish_volume(proto::NodePublishVolumeRequest {
      volume_id: "vol-a".into(),
      target_path: target.to_string_lossy().into_owned(),
      volume_capability: Some(mount_capability()),
      ..Default::default()
    })
    .await
    .unwrap();
  assert!(target.is_dir());

  let info = node
    .node_get_info(proto::NodeGetInfoRequest {})
    .await
    .unwrap()
    .into_inner();
  assert_eq!(info.node_id, NODE);
  assert_eq!(info.max_volumes_per_node, 15);

  let expanded = controller
    .controller_expand_volume(proto::ControllerExpandVolumeRequest {
      volume_id: "vol-a".into(),
      capacity_range: capacity(20 * GI),
      volume_capability: Some(mount_capability()),
      ..Default::default()
    })
    .await
    .unwrap()
    .into_inner();
  assert_eq!(expanded.capacity_bytes, 20 * GI);
  assert!(expanded.node_expansion_required);

  node
    .node_expand_volume(proto::NodeExpandVolumeRequest {
      volume_id: "vol-a".into(),
      volume_path: target.to_string_lossy().into_owned(),
      capacity_range: capacity(20 * GI),
      volume_capability: Some(mount_capability()),
      ..Default::default()
    })
    .await
    .unwrap();

  node
    .node_unpublish_volume(proto::NodeUnpublishVolumeRequest {
      volume_id: "vol-a".into(),
      target_path: target.to_string_lossy().into_owned(),
    })
    .await
    .unwrap();
  assert!(!target.exists());

  controller
    .controller_unpublish_volume(proto::ControllerUnpublishVolumeRequest {
      volume_id: "vol-a".into(),
      node_id: NODE.into(),
      ..Default::default()
    })
    .await
    .unwrap();
  assert!(attachments.objects().is_empty());

  // Deleting twice succeeds both times.
  for _ in 0..2 {
    controller
      .delete_volume(proto::DeleteVolumeRequest {
        volume_id: "vol-a".into(),
        ..Default::default()
      })
      .await
      .unwrap();
  }
  assert!(disks.objects().is_empty());

  let status = controller
    .validate_volume_capabilities(proto::ValidateVolumeCapabilitiesRequest {
      volume_id: "vol-a".into(),
      volume_capabilities: vec![mount_capability()],
      ..Default::default()
    })
    .await
    .unwrap_err();
  assert_eq!(status.code(), Code::NotFound);

  drop((identity, controller, node));
  cancel.cancel();
  serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn unsupported_access_mode_is_invalid_argument() {
  let dir = tempfile::tempdir().unwrap();
  let disks = Arc::new(FakeStore::<VirtualMachineDisk>::new([]));
  let host = HostClient::new(
    disks.clone(),
    Arc::new(FakeStore::<VirtualMachineBlockDeviceAttachment>::new([])),
    Arc::new(FakeStore::<VirtualMachine>::new([])),
    "ns",
  );
  let driver = Arc::new(Driver::new(
    host,
    FakeMounter::from(fake::FakeMounter::new([])),
    NODE,
  ));

  let socket = dir.path().join("csi.sock");
  let listener = server::bind(&socket).unwrap();
  let cancel = CancellationToken::new();
  let serving = tokio::spawn({
    let cancel = cancel.clone();
    async move { server::serve(driver, listener, async move { cancel.cancelled().await }).await }
  });

  let mut controller = ControllerClient::new(connect(&socket).await);
  let mut capability = mount_capability();
  capability.access_mode = Some(volume_capability::AccessMode {
    mode: volume_capability::access_mode::Mode::MultiNodeMultiWriter.into(),
  });

  let status = controller
    .create_volume(proto::CreateVolumeRequest {
      name: "vol-a".into(),
      capacity_range: capacity(GI),
      volume_capabilities: vec![capability],
      ..Default::default()
    })
    .await
    .unwrap_err();

  assert_eq!(status.code(), Code::InvalidArgument);
  assert_eq!(disks.mutations(), 0);

  drop(controller);
  cancel.cancel();
  serving.await.unwrap().unwrap();
}
