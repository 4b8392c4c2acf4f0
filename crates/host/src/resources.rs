//! Custom resources of the `virtualization.deckhouse.io/v1alpha2` API that
//! the driver reads and writes. Only the fields the driver needs are typed;
//! everything else is carried through untouched so a read-modify-replace
//! does not drop it.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Phase of a disk that is provisioned and usable.
pub const DISK_READY: &str = "Ready";

/// Phase of an attachment whose disk is plugged into the virtual machine.
pub const ATTACHMENT_ATTACHED: &str = "Attached";

/// Block device kind of an attachment referencing a [`VirtualMachineDisk`].
pub const BLOCK_DEVICE_DISK: &str = "VirtualMachineDisk";

/// Labels forming the (disk, machine) key of an attachment.
pub const ATTACHMENT_DISK_LABEL: &str = "virtualMachineDiskName";
pub const ATTACHMENT_MACHINE_LABEL: &str = "virtualMachineName";

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default)]
#[kube(
  group = "virtualization.deckhouse.io",
  version = "v1alpha2",
  kind = "VirtualMachineDisk",
  shortname = "vmd",
  namespaced,
  status = "VirtualMachineDiskStatus",
  schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineDiskSpec {
  pub persistent_volume_claim: DiskPersistentVolumeClaim,

  #[serde(flatten)]
  pub other: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiskPersistentVolumeClaim {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub size: Option<Quantity>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub storage_class_name: Option<String>,

  #[serde(flatten)]
  pub other: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineDiskStatus {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phase: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub capacity: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default)]
#[kube(
  group = "virtualization.deckhouse.io",
  version = "v1alpha2",
  kind = "VirtualMachineBlockDeviceAttachment",
  shortname = "vmbda",
  namespaced,
  status = "VirtualMachineBlockDeviceAttachmentStatus",
  schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineBlockDeviceAttachmentSpec {
  pub virtual_machine_name: String,
  pub block_device: AttachmentBlockDevice,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentBlockDevice {
  #[serde(rename = "type")]
  pub kind: String,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub virtual_machine_disk: Option<DiskReference>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DiskReference {
  pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineBlockDeviceAttachmentStatus {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phase: Option<String>,
}

/// Compute node the driver runs in. Read only, for its attached devices.
#[derive(CustomResource, Serialize, Deserialize, Debug, Clone, Default)]
#[kube(
  group = "virtualization.deckhouse.io",
  version = "v1alpha2",
  kind = "VirtualMachine",
  shortname = "vm",
  namespaced,
  status = "VirtualMachineStatus",
  schema = "disabled"
)]
pub struct VirtualMachineSpec {
  #[serde(flatten)]
  pub other: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
  #[serde(default, alias = "blockDeviceRefs")]
  pub block_devices_attached: Vec<AttachedBlockDevice>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct AttachedBlockDevice {
  #[serde(rename = "type", default)]
  pub kind: String,

  #[serde(default)]
  pub name: String,

  #[serde(flatten)]
  pub other: Map<String, Value>,
}
