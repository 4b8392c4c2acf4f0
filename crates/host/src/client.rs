use crate::{
  quantity,
  resources::{
    AttachmentBlockDevice, DiskPersistentVolumeClaim, DiskReference, VirtualMachine,
    VirtualMachineBlockDeviceAttachment, VirtualMachineBlockDeviceAttachmentSpec,
    VirtualMachineDisk, VirtualMachineDiskSpec, ATTACHMENT_ATTACHED, ATTACHMENT_DISK_LABEL,
    ATTACHMENT_MACHINE_LABEL, BLOCK_DEVICE_DISK, DISK_READY,
  },
  wait_for, Error, ObjectStore, Result, StoreError, DEFAULT_WAIT_INTERVAL,
};
use kube::{Api, Client};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// A volume as seen by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
  pub name: String,
  /// Observed capacity in bytes, once the control plane reports one.
  pub capacity: Option<u64>,
}

impl Disk {
  fn named(name: impl Into<String>) -> Self {
    Disk {
      name: name.into(),
      capacity: None,
    }
  }
}

/// A disk plugged into a virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
  pub name: String,
}

impl TryFrom<&VirtualMachineBlockDeviceAttachment> for Attachment {
  type Error = Error;

  fn try_from(value: &VirtualMachineBlockDeviceAttachment) -> Result<Self> {
    match &value.metadata.name {
      Some(name) => Ok(Attachment { name: name.clone() }),
      None => Err(Error::UnexpectedState("attachment without a name".into())),
    }
  }
}

/// Idempotent operations on disks and attachments in one namespace of the
/// control plane, plus waits for them to converge.
#[derive(Clone)]
pub struct HostClient {
  disks: Arc<dyn ObjectStore<VirtualMachineDisk>>,
  attachments: Arc<dyn ObjectStore<VirtualMachineBlockDeviceAttachment>>,
  machines: Arc<dyn ObjectStore<VirtualMachine>>,
  namespace: String,
  wait_interval: Duration,
  cancel: CancellationToken,
}

impl HostClient {
  pub fn new(
    disks: Arc<dyn ObjectStore<VirtualMachineDisk>>,
    attachments: Arc<dyn ObjectStore<VirtualMachineBlockDeviceAttachment>>,
    machines: Arc<dyn ObjectStore<VirtualMachine>>,
    namespace: impl Into<String>,
  ) -> Self {
    Self {
      disks,
      attachments,
      machines,
      namespace: namespace.into(),
      wait_interval: DEFAULT_WAIT_INTERVAL,
      cancel: CancellationToken::new(),
    }
  }

  pub fn from_kube(client: Client, namespace: &str) -> Self {
    Self::new(
      Arc::new(Api::<VirtualMachineDisk>::namespaced(client.clone(), namespace)),
      Arc::new(Api::<VirtualMachineBlockDeviceAttachment>::namespaced(
        client.clone(),
        namespace,
      )),
      Arc::new(Api::<VirtualMachine>::namespaced(client, namespace)),
      namespace,
    )
  }

  pub fn with_wait_interval(mut self, interval: Duration) -> Self {
    self.wait_interval = interval;
    self
  }

  /// Abort every wait once `cancel` fires.
  pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub async fn create_disk(
    &self,
    name: &str,
    size_bytes: u64,
    storage_class: Option<&str>,
  ) -> Result<Disk> {
    let spec = VirtualMachineDiskSpec {
      persistent_volume_claim: DiskPersistentVolumeClaim {
        size: Some(quantity::to_quantity(size_bytes)),
        storage_class_name: storage_class.map(ToOwned::to_owned),
        ..Default::default()
      },
      ..Default::default()
    };
    let mut disk = VirtualMachineDisk::new(name, spec);
    disk.metadata.namespace = Some(self.namespace.clone());

    match self.disks.create(&disk).await {
      Ok(_) => info!(disk = name, size_bytes, "disk created"),
      Err(StoreError::AlreadyExists) => info!(disk = name, "disk already exists"),
      Err(e) => return Err(e.into()),
    }

    Ok(Disk::named(name))
  }

  /// Wait until the disk is `Ready`. A disk that does not exist is never
  /// going to be.
  pub async fn wait_disk_creation(&self, name: &str) -> Result<()> {
    wait_for(
      &*self.disks,
      name,
      |disk| match disk {
        None => Err(Error::DiskNotFound),
        Some(_) => Ok(disk_phase(disk) == Some(DISK_READY)),
      },
      &self.cancel,
      self.wait_interval,
    )
    .await
  }

  /// Delete a disk. An absent disk is reported as
  /// [`Error::DiskAlreadyDeleted`].
  pub async fn delete_disk(&self, name: &str) -> Result<Disk> {
    match self.disks.get(name).await {
      Ok(_) => (),
      Err(StoreError::NotFound) => return Err(Error::DiskAlreadyDeleted),
      Err(e) => return Err(e.into()),
    }

    match self.disks.delete(name).await {
      Ok(()) => {
        info!(disk = name, "disk deleted");
        Ok(Disk::named(name))
      }
      Err(StoreError::NotFound) => Err(Error::DiskAlreadyDeleted),
      Err(e) => Err(e.into()),
    }
  }

  pub async fn wait_disk_deletion(&self, name: &str) -> Result<()> {
    wait_for(
      &*self.disks,
      name,
      |disk| Ok(disk.is_none()),
      &self.cancel,
      self.wait_interval,
    )
    .await
  }

  /// Attach `disk` to `machine`, reusing an existing attachment for the
  /// pair whatever its phase.
  pub async fn attach_disk(&self, disk: &str, machine: &str) -> Result<Attachment> {
    match self.find_attachment(disk, machine).await {
      Ok(attachment) => {
        debug!(disk, machine, attachment = %attachment.name, "attachment exists");
        return Ok(attachment);
      }
      Err(Error::AttachmentNotFound) => (),
      Err(e) => return Err(e),
    }

    let name = format!("vmbda-{}", Uuid::new_v4());
    let mut attachment = VirtualMachineBlockDeviceAttachment::new(
      &name,
      VirtualMachineBlockDeviceAttachmentSpec {
        virtual_machine_name: machine.to_owned(),
        block_device: AttachmentBlockDevice {
          kind: BLOCK_DEVICE_DISK.to_owned(),
          virtual_machine_disk: Some(DiskReference {
            name: disk.to_owned(),
          }),
        },
      },
    );
    attachment.metadata.namespace = Some(self.namespace.clone());
    attachment.metadata.labels = Some(attachment_labels(disk, machine));

    match self.attachments.create(&attachment).await {
      Ok(_) => info!(disk, machine, attachment = %name, "attachment created"),
      Err(StoreError::AlreadyExists) => debug!(attachment = %name, "attachment already exists"),
      Err(e) => return Err(e.into()),
    }

    Ok(Attachment { name })
  }

  pub async fn wait_disk_attaching(&self, attachment: &str) -> Result<()> {
    wait_for(
      &*self.attachments,
      attachment,
      |a| {
        Ok(
          a.and_then(|a| a.status.as_ref())
            .and_then(|s| s.phase.as_deref())
            == Some(ATTACHMENT_ATTACHED),
        )
      },
      &self.cancel,
      self.wait_interval,
    )
    .await
  }

  /// Remove the attachment of `disk` to `machine`. A missing attachment is
  /// reported as [`Error::AttachmentAlreadyDeleted`].
  pub async fn detach_disk(&self, disk: &str, machine: &str) -> Result<Attachment> {
    let attachment = match self.find_attachment(disk, machine).await {
      Ok(v) => v,
      Err(Error::AttachmentNotFound) => return Err(Error::AttachmentAlreadyDeleted),
      Err(e) => return Err(e),
    };

    match self.attachments.delete(&attachment.name).await {
      Ok(()) => {
        info!(disk, machine, attachment = %attachment.name, "attachment deleted");
        Ok(attachment)
      }
      Err(StoreError::NotFound) => Err(Error::AttachmentAlreadyDeleted),
      Err(e) => Err(e.into()),
    }
  }

  pub async fn wait_disk_detaching(&self, attachment: &str) -> Result<()> {
    wait_for(
      &*self.attachments,
      attachment,
      |a| Ok(a.is_none()),
      &self.cancel,
      self.wait_interval,
    )
    .await
  }

  /// Request a new size for `name`. Concurrent updates are not detected.
  pub async fn update_disk_capacity(&self, name: &str, size_bytes: u64) -> Result<()> {
    let mut disk = match self.disks.get(name).await {
      Ok(v) => v,
      Err(StoreError::NotFound) => return Err(Error::DiskNotFound),
      Err(e) => return Err(e.into()),
    };

    disk.spec.persistent_volume_claim.size = Some(quantity::to_quantity(size_bytes));
    self.disks.replace(name, &disk).await?;
    info!(disk = name, size_bytes, "disk capacity updated");

    Ok(())
  }

  pub async fn get_disk(&self, name: &str) -> Result<Disk> {
    let disk = match self.disks.get(name).await {
      Ok(v) => v,
      Err(StoreError::NotFound) => return Err(Error::DiskNotFound),
      Err(e) => return Err(e.into()),
    };

    let capacity = match disk.status.as_ref().and_then(|s| s.capacity.as_deref()) {
      None | Some("") => None,
      Some(v) => Some(quantity::parse(v)?),
    };

    Ok(Disk {
      name: name.to_owned(),
      capacity,
    })
  }

  /// Number of block devices attached to `machine`, attachments and boot
  /// disks alike.
  pub async fn get_attached_device_count(&self, machine: &str) -> Result<usize> {
    let vm = match self.machines.get(machine).await {
      Ok(v) => v,
      Err(StoreError::NotFound) => return Err(Error::MachineNotFound),
      Err(e) => return Err(e.into()),
    };

    Ok(vm.status.map_or(0, |s| s.block_devices_attached.len()))
  }

  /// The single attachment of `disk` to `machine`.
  pub async fn find_attachment(&self, disk: &str, machine: &str) -> Result<Attachment> {
    let selector = format!(
      "{}={},{}={}",
      ATTACHMENT_DISK_LABEL, disk, ATTACHMENT_MACHINE_LABEL, machine
    );

    let found = self.attachments.list(&selector).await?;
    match found.as_slice() {
      [] => Err(Error::AttachmentNotFound),
      [attachment] => Attachment::try_from(attachment),
      _ => Err(Error::AmbiguousAttachment),
    }
  }
}

fn disk_phase(disk: Option<&VirtualMachineDisk>) -> Option<&str> {
  disk
    .and_then(|d| d.status.as_ref())
    .and_then(|s| s.phase.as_deref())
}

fn attachment_labels(disk: &str, machine: &str) -> BTreeMap<String, String> {
  BTreeMap::from([
    (ATTACHMENT_DISK_LABEL.to_owned(), disk.to_owned()),
    (ATTACHMENT_MACHINE_LABEL.to_owned(), machine.to_owned()),
  ])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    fake::{FakeStore, StoreAction, Verb},
    resources::{
      AttachedBlockDevice, VirtualMachineBlockDeviceAttachmentStatus, VirtualMachineDiskStatus,
      VirtualMachineSpec, VirtualMachineStatus,
    },
  };
  use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
  use kube::ResourceExt;
  use tokio::time::Instant;

  const GI: u64 = 1 << 30;

  struct Fixture {
    client: HostClient,
    disks: Arc<FakeStore<VirtualMachineDisk>>,
    attachments: Arc<FakeStore<VirtualMachineBlockDeviceAttachment>>,
    machines: Arc<FakeStore<VirtualMachine>>,
  }

  fn fixture() -> Fixture {
    let disks = Arc::new(FakeStore::<VirtualMachineDisk>::new([]));
    let attachments = Arc::new(FakeStore::<VirtualMachineBlockDeviceAttachment>::new([]));
    let machines = Arc::new(FakeStore::<VirtualMachine>::new([]));
    let client = HostClient::new(disks.clone(), attachments.clone(), machines.clone(), "ns");

    Fixture {
      client,
      disks,
      attachments,
      machines,
    }
  }

  fn disk_with_status(name: &str, phase: &str, capacity: &str) -> VirtualMachineDisk {
    let mut disk = VirtualMachineDisk::new(name, VirtualMachineDiskSpec::default());
    disk.status = Some(VirtualMachineDiskStatus {
      phase: Some(phase.into()),
      capacity: Some(capacity.into()),
    });
    disk
  }

  fn labelled_attachment(name: &str, disk: &str, machine: &str) -> VirtualMachineBlockDeviceAttachment {
    let mut attachment = VirtualMachineBlockDeviceAttachment::new(
      name,
      VirtualMachineBlockDeviceAttachmentSpec::default(),
    );
    attachment.metadata.labels = Some(attachment_labels(disk, machine));
    attachment
  }

  #[tokio::test]
  async fn create_disk_is_idempotent() {
    let f = fixture();

    let first = f.client.create_disk("vol-a", 10 * GI, Some("fast")).await.unwrap();
    let second = f.client.create_disk("vol-a", 10 * GI, Some("fast")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.name, "vol-a");
    let stored = f.disks.objects();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].namespace().as_deref(), Some("ns"));
    let pvc = &stored[0].spec.persistent_volume_claim;
    assert_eq!(pvc.size, Some(Quantity("10Gi".into())));
    assert_eq!(pvc.storage_class_name.as_deref(), Some("fast"));
  }

  #[tokio::test]
  async fn create_disk_propagates_store_errors() {
    let f = fixture();
    f.disks.fail_next(Verb::Create, StoreError::NotFound);

    let err = f.client.create_disk("vol-a", GI, None).await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::NotFound)));
  }

  #[tokio::test]
  async fn delete_of_absent_disk_is_already_deleted() {
    let f = fixture();

    let err = f.client.delete_disk("vol-a").await.unwrap_err();
    assert!(matches!(err, Error::DiskAlreadyDeleted));
    assert_eq!(f.disks.mutations(), 0);
  }

  #[tokio::test]
  async fn delete_racing_removal_is_already_deleted() {
    let f = fixture();
    f.disks.insert(disk_with_status("vol-a", "Ready", "1Gi"));
    f.disks.fail_next(Verb::Delete, StoreError::NotFound);

    let err = f.client.delete_disk("vol-a").await.unwrap_err();
    assert!(matches!(err, Error::DiskAlreadyDeleted));
  }

  #[tokio::test]
  async fn delete_returns_prior_identity() {
    let f = fixture();
    f.disks.insert(disk_with_status("vol-a", "Ready", "1Gi"));

    let disk = f.client.delete_disk("vol-a").await.unwrap();
    assert_eq!(disk.name, "vol-a");
    f.client.wait_disk_deletion("vol-a").await.unwrap();
  }

  #[tokio::test]
  async fn attach_twice_returns_same_attachment() {
    let f = fixture();

    let first = f.client.attach_disk("vol-a", "node-1").await.unwrap();
    let second = f.client.attach_disk("vol-a", "node-1").await.unwrap();

    assert_eq!(first, second);
    assert!(first.name.starts_with("vmbda-"));
    assert_eq!(f.attachments.objects().len(), 1);

    let stored = &f.attachments.objects()[0];
    assert_eq!(stored.labels()[ATTACHMENT_DISK_LABEL], "vol-a");
    assert_eq!(stored.labels()[ATTACHMENT_MACHINE_LABEL], "node-1");
    assert_eq!(stored.spec.virtual_machine_name, "node-1");
    assert_eq!(
      stored.spec.block_device.virtual_machine_disk.as_ref().map(|d| d.name.as_str()),
      Some("vol-a")
    );
  }

  #[tokio::test]
  async fn attach_tolerates_racing_create() {
    let f = fixture();
    f.attachments.fail_next(Verb::Create, StoreError::AlreadyExists);

    let attachment = f.client.attach_disk("vol-a", "node-1").await.unwrap();
    assert!(attachment.name.starts_with("vmbda-"));
  }

  #[tokio::test]
  async fn ambiguous_attachments_fail_without_mutation() {
    let f = fixture();
    f.attachments.insert(labelled_attachment("vmbda-1", "vol-a", "node-1"));
    f.attachments.insert(labelled_attachment("vmbda-2", "vol-a", "node-1"));

    let err = f.client.attach_disk("vol-a", "node-1").await.unwrap_err();
    assert!(matches!(err, Error::AmbiguousAttachment));
    assert_eq!(
      err.to_string(),
      "more attachments found than expected: please report a bug"
    );

    let err = f.client.detach_disk("vol-a", "node-1").await.unwrap_err();
    assert!(matches!(err, Error::AmbiguousAttachment));
    assert_eq!(f.attachments.mutations(), 0);
  }

  #[tokio::test]
  async fn attach_lookup_errors_propagate() {
    let f = fixture();
    f.attachments.fail_next(Verb::List, StoreError::AlreadyExists);

    let err = f.client.attach_disk("vol-a", "node-1").await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::AlreadyExists)));
    assert_eq!(f.attachments.mutations(), 0);
  }

  #[tokio::test]
  async fn detach_after_detach_is_already_deleted() {
    let f = fixture();
    let attachment = f.client.attach_disk("vol-a", "node-1").await.unwrap();

    let detached = f.client.detach_disk("vol-a", "node-1").await.unwrap();
    assert_eq!(detached, attachment);
    f.client.wait_disk_detaching(&attachment.name).await.unwrap();

    let err = f.client.detach_disk("vol-a", "node-1").await.unwrap_err();
    assert!(matches!(err, Error::AttachmentAlreadyDeleted));
  }

  #[tokio::test]
  async fn detach_only_touches_matching_node() {
    let f = fixture();
    f.attachments.insert(labelled_attachment("vmbda-1", "vol-a", "node-2"));

    let err = f.client.detach_disk("vol-a", "node-1").await.unwrap_err();
    assert!(matches!(err, Error::AttachmentAlreadyDeleted));
    assert!(f.attachments.object("vmbda-1").is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn waits_for_attachment_to_attach() {
    let f = fixture();
    let attachment = f.client.attach_disk("vol-a", "node-1").await.unwrap();
    let start = Instant::now();

    let attachments = f.attachments.clone();
    let name = attachment.name.clone();
    let reconciler = tokio::spawn(async move {
      tokio::time::sleep(Duration::from_secs(2)).await;
      attachments.update(&name, |a| {
        a.status = Some(VirtualMachineBlockDeviceAttachmentStatus {
          phase: Some(ATTACHMENT_ATTACHED.into()),
        })
      });
    });

    f.client.wait_disk_attaching(&attachment.name).await.unwrap();
    reconciler.await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_secs(2));
  }

  #[tokio::test(start_paused = true)]
  async fn waits_observe_cancellation() {
    let f = fixture();
    let cancel = CancellationToken::new();
    let client = f.client.clone().with_cancellation(cancel.clone());
    f.disks.insert(disk_with_status("vol-a", "Provisioning", ""));

    let waiter = tokio::spawn(async move { client.wait_disk_creation("vol-a").await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    cancel.cancel();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled));
  }

  #[tokio::test]
  async fn creation_wait_ends_when_ready() {
    let f = fixture();
    f.disks.insert(disk_with_status("vol-a", DISK_READY, "10Gi"));

    f.client.wait_disk_creation("vol-a").await.unwrap();
  }

  #[tokio::test]
  async fn creation_wait_fails_for_missing_disk() {
    let f = fixture();

    let err = f.client.wait_disk_creation("vol-a").await.unwrap_err();
    assert!(matches!(err, Error::DiskNotFound));
  }

  #[tokio::test]
  async fn update_capacity_replaces_size() {
    let f = fixture();
    f.disks.insert(disk_with_status("vol-a", "Ready", "10Gi"));

    f.client.update_disk_capacity("vol-a", 20 * GI).await.unwrap();

    let disk = f.disks.object("vol-a").unwrap();
    assert_eq!(disk.spec.persistent_volume_claim.size, Some(Quantity("20Gi".into())));
    assert_eq!(
      f.disks.get_log(),
      vec![
        StoreAction::Get("vol-a".into()),
        StoreAction::Replace("vol-a".into()),
      ]
    );
  }

  #[tokio::test]
  async fn get_disk_parses_capacity() {
    let f = fixture();
    f.disks.insert(disk_with_status("vol-a", "Ready", "10Gi"));
    f.disks.insert(disk_with_status("vol-b", "Pending", ""));
    f.disks.insert(disk_with_status("vol-c", "Ready", "ten"));

    assert_eq!(f.client.get_disk("vol-a").await.unwrap().capacity, Some(10 * GI));
    assert_eq!(f.client.get_disk("vol-b").await.unwrap().capacity, None);
    assert!(matches!(
      f.client.get_disk("vol-c").await,
      Err(Error::InvalidQuantity(_))
    ));
    assert!(matches!(
      f.client.get_disk("vol-d").await,
      Err(Error::DiskNotFound)
    ));
  }

  #[tokio::test]
  async fn counts_attached_devices() {
    let f = fixture();
    let mut vm = VirtualMachine::new("node-1", VirtualMachineSpec::default());
    vm.status = Some(VirtualMachineStatus {
      block_devices_attached: vec![AttachedBlockDevice::default(), AttachedBlockDevice::default()],
    });
    f.machines.insert(vm);

    assert_eq!(f.client.get_attached_device_count("node-1").await.unwrap(), 2);
    assert!(matches!(
      f.client.get_attached_device_count("node-2").await,
      Err(Error::MachineNotFound)
    ));
  }
}
