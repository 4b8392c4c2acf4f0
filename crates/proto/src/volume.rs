use std::{
  collections::HashMap,
  convert::{TryFrom, TryInto},
  fmt,
  num::NonZeroU64,
};

use crate::proto;

pub type Topology = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeContentSource {
  Snapshot(String),
  Volume(String),
}

impl TryFrom<proto::VolumeContentSource> for Option<VolumeContentSource> {
  type Error = tonic::Status;

  fn try_from(value: proto::VolumeContentSource) -> Result<Self, Self::Error> {
    #[inline]
    fn fail_if_empty(v: String, error: &'static str) -> Result<String, tonic::Status> {
      if v.is_empty() {
        Err(tonic::Status::invalid_argument(error))
      } else {
        Ok(v)
      }
    }

    Ok(match value.r#type {
      None => None,
      Some(proto::volume_content_source::Type::Volume(v)) => Some(VolumeContentSource::Volume(
        fail_if_empty(v.volume_id, "VolumeContentSource.volume_id is empty")?,
      )),
      Some(proto::volume_content_source::Type::Snapshot(v)) => {
        Some(VolumeContentSource::Snapshot(fail_if_empty(
          v.snapshot_id,
          "VolumeContentSource.snapshot_id is empty",
        )?))
      }
    })
  }
}

impl From<VolumeContentSource> for proto::VolumeContentSource {
  fn from(value: VolumeContentSource) -> Self {
    let r#type = match value {
      VolumeContentSource::Snapshot(snapshot_id) => proto::volume_content_source::Type::Snapshot(
        proto::volume_content_source::SnapshotSource { snapshot_id },
      ),
      VolumeContentSource::Volume(volume_id) => {
        proto::volume_content_source::Type::Volume(proto::volume_content_source::VolumeSource {
          volume_id,
        })
      }
    };

    proto::VolumeContentSource {
      r#type: Some(r#type),
    }
  }
}

/// A provisioned volume as reported back to the CO.
#[derive(Debug)]
pub struct Volume {
  capacity_bytes: Option<NonZeroU64>,
  volume_id: String,
  volume_context: HashMap<String, String>,
  content_source: Option<VolumeContentSource>,
  accessible_topology: Vec<Topology>,
}

impl Volume {
  pub fn new(volume_id: impl Into<String>, capacity_bytes: Option<NonZeroU64>) -> Self {
    Volume {
      capacity_bytes,
      volume_id: volume_id.into(),
      volume_context: HashMap::new(),
      content_source: None,
      accessible_topology: Vec::new(),
    }
  }

  /// Echo the source the volume was populated from.
  pub fn with_content_source(mut self, content_source: Option<VolumeContentSource>) -> Self {
    self.content_source = content_source;
    self
  }

  #[inline]
  pub fn volume_id(&self) -> &str {
    &self.volume_id
  }

  #[inline]
  pub fn capacity_bytes(&self) -> Option<NonZeroU64> {
    self.capacity_bytes
  }
}

impl From<Volume> for proto::Volume {
  fn from(value: Volume) -> Self {
    let capacity_bytes = value.capacity_bytes.map(|v| v.get() as i64).unwrap_or(0);
    let accessible_topology = value
      .accessible_topology
      .into_iter()
      .map(|segments| proto::Topology { segments })
      .collect();

    proto::Volume {
      capacity_bytes,
      volume_id: value.volume_id,
      volume_context: value.volume_context,
      content_source: value.content_source.map(Into::into),
      accessible_topology,
    }
  }
}

impl TryFrom<Volume> for proto::CreateVolumeResponse {
  type Error = tonic::Status;

  fn try_from(value: Volume) -> Result<Self, Self::Error> {
    Ok(proto::CreateVolumeResponse {
      volume: Some(value.into()),
    })
  }
}

#[derive(Debug, Clone)]
pub struct VolumeCapability {
  access_mode: AccessMode,
  access_type: AccessType,
}

impl VolumeCapability {
  pub fn new(access_mode: AccessMode, access_type: AccessType) -> Self {
    VolumeCapability {
      access_mode,
      access_type,
    }
  }

  #[inline]
  pub fn access_mode(&self) -> AccessMode {
    self.access_mode
  }

  #[inline]
  pub fn access_type(&self) -> &AccessType {
    &self.access_type
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AccessMode {
  Unknown,
  /// Can only be published once as read/write on a single node, at
  /// any given time.
  SingleNodeWriter,
  /// Can only be published once as readonly on a single node, at
  /// any given time.
  SingleNodeReaderOnly,
  /// Can be published as readonly at multiple nodes simultaneously.
  MultiNodeReaderOnly,
  /// Can be published at multiple nodes simultaneously. Only one of
  /// the node can be used as read/write. The rest will be readonly.
  MultiNodeSingleWriter,
  /// Can be published as read/write at multiple nodes
  /// simultaneously.
  MultiNodeMultiWriter,
  /// Can only be published to a single workload on a single node.
  SingleNodeSingleWriter,
  /// Can be published by several workloads, all on the same node.
  SingleNodeMultiWriter,
}

impl AccessMode {
  /// True for every mode that keeps the volume on one node at a time.
  pub fn is_single_node(self) -> bool {
    matches!(
      self,
      AccessMode::SingleNodeWriter
        | AccessMode::SingleNodeReaderOnly
        | AccessMode::SingleNodeSingleWriter
        | AccessMode::SingleNodeMultiWriter
    )
  }
}

impl From<proto::volume_capability::AccessMode> for AccessMode {
  fn from(value: proto::volume_capability::AccessMode) -> Self {
    use proto::volume_capability::access_mode::Mode;

    match Mode::try_from(value.mode) {
      Ok(Mode::SingleNodeWriter) => AccessMode::SingleNodeWriter,
      Ok(Mode::SingleNodeReaderOnly) => AccessMode::SingleNodeReaderOnly,
      Ok(Mode::MultiNodeReaderOnly) => AccessMode::MultiNodeReaderOnly,
      Ok(Mode::MultiNodeSingleWriter) => AccessMode::MultiNodeSingleWriter,
      Ok(Mode::MultiNodeMultiWriter) => AccessMode::MultiNodeMultiWriter,
      Ok(Mode::SingleNodeSingleWriter) => AccessMode::SingleNodeSingleWriter,
      Ok(Mode::SingleNodeMultiWriter) => AccessMode::SingleNodeMultiWriter,
      Ok(Mode::Unknown) | Err(_) => AccessMode::Unknown,
    }
  }
}

impl From<AccessMode> for proto::volume_capability::AccessMode {
  fn from(value: AccessMode) -> Self {
    use proto::volume_capability::access_mode::Mode;

    let mode = match value {
      AccessMode::Unknown => Mode::Unknown,
      AccessMode::SingleNodeWriter => Mode::SingleNodeWriter,
      AccessMode::SingleNodeReaderOnly => Mode::SingleNodeReaderOnly,
      AccessMode::MultiNodeReaderOnly => Mode::MultiNodeReaderOnly,
      AccessMode::MultiNodeSingleWriter => Mode::MultiNodeSingleWriter,
      AccessMode::MultiNodeMultiWriter => Mode::MultiNodeMultiWriter,
      AccessMode::SingleNodeSingleWriter => Mode::SingleNodeSingleWriter,
      AccessMode::SingleNodeMultiWriter => Mode::SingleNodeMultiWriter,
    };

    proto::volume_capability::AccessMode { mode: mode.into() }
  }
}

#[derive(Debug, Clone)]
pub enum AccessType {
  /// Indicate that the volume will be accessed via the block device API.
  Block,

  /// Indicate that the volume will be accessed via the filesystem API.
  Mount(MountVolume),
}

impl AccessType {
  #[inline]
  pub fn is_block(&self) -> bool {
    matches!(self, AccessType::Block)
  }
}

impl From<proto::volume_capability::AccessType> for AccessType {
  fn from(value: proto::volume_capability::AccessType) -> Self {
    match value {
      proto::volume_capability::AccessType::Block(_) => AccessType::Block,
      proto::volume_capability::AccessType::Mount(v) => AccessType::Mount(v.into()),
    }
  }
}

impl From<AccessType> for proto::volume_capability::AccessType {
  fn from(value: AccessType) -> Self {
    match value {
      AccessType::Block => {
        proto::volume_capability::AccessType::Block(proto::volume_capability::BlockVolume {})
      }
      AccessType::Mount(v) => proto::volume_capability::AccessType::Mount(v.into()),
    }
  }
}

#[derive(Clone, Default)]
pub struct MountVolume {
  fs_type: Option<String>,
  mount_flags: Vec<String>,
}

impl MountVolume {
  pub fn new(fs_type: Option<String>, mount_flags: Vec<String>) -> Self {
    MountVolume {
      fs_type: fs_type.filter(|v| !v.is_empty()),
      mount_flags,
    }
  }

  /// The filesystem type.
  #[inline]
  pub fn fs_type(&self) -> Option<&str> {
    self.fs_type.as_deref()
  }

  /// The mount options that can be used for the volume. This field is
  /// OPTIONAL. `mount_flags` MAY contain sensitive information.
  /// Therefore, the CO and the Plugin MUST NOT leak this information
  /// to untrusted entities.
  pub fn mount_flags(&self) -> impl ExactSizeIterator<Item = &str> {
    self.mount_flags.iter().map(|v| &**v)
  }
}

impl From<proto::volume_capability::MountVolume> for MountVolume {
  fn from(value: proto::volume_capability::MountVolume) -> Self {
    MountVolume::new(Some(value.fs_type), value.mount_flags)
  }
}

impl From<MountVolume> for proto::volume_capability::MountVolume {
  fn from(value: MountVolume) -> Self {
    proto::volume_capability::MountVolume {
      fs_type: value.fs_type.unwrap_or_default(),
      mount_flags: value.mount_flags,
      volume_mount_group: String::new(),
    }
  }
}

impl fmt::Debug for MountVolume {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MountVolume")
      .field("fs_type", &self.fs_type)
      .field(
        "mount_flags",
        &format!("REDACTED ({} items)", self.mount_flags.len()),
      )
      .finish()
  }
}

impl TryFrom<proto::VolumeCapability> for VolumeCapability {
  type Error = tonic::Status;

  fn try_from(value: proto::VolumeCapability) -> Result<Self, Self::Error> {
    let access_mode = value
      .access_mode
      .ok_or_else(|| tonic::Status::invalid_argument("VolumeCapability.access_mode missing"))?
      .into();

    let access_type = value
      .access_type
      .ok_or_else(|| tonic::Status::invalid_argument("VolumeCapability.access_type missing"))?
      .into();

    Ok(VolumeCapability {
      access_mode,
      access_type,
    })
  }
}

impl From<VolumeCapability> for proto::VolumeCapability {
  fn from(value: VolumeCapability) -> Self {
    proto::VolumeCapability {
      access_mode: Some(value.access_mode.into()),
      access_type: Some(value.access_type.into()),
    }
  }
}

pub(crate) fn volume_capabilities(
  values: Vec<proto::VolumeCapability>,
  field: &'static str,
) -> Result<Vec<VolumeCapability>, tonic::Status> {
  if values.is_empty() {
    return Err(tonic::Status::invalid_argument(format!("{} is empty", field)));
  }

  values.into_iter().map(TryInto::try_into).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityRange {
  AtLeast(NonZeroU64),
  AtMost(NonZeroU64),
  /// Effectively AtLeast(.0) & AtMost(.1)
  Between(NonZeroU64, NonZeroU64),
}

impl CapacityRange {
  /// The size a volume should be provisioned with. Falls back to the limit
  /// when only an upper bound was given.
  pub fn required_bytes(&self) -> NonZeroU64 {
    match *self {
      CapacityRange::AtLeast(r) | CapacityRange::Between(r, _) => r,
      CapacityRange::AtMost(l) => l,
    }
  }

  pub fn limit_bytes(&self) -> Option<NonZeroU64> {
    match *self {
      CapacityRange::AtLeast(_) => None,
      CapacityRange::AtMost(l) | CapacityRange::Between(_, l) => Some(l),
    }
  }
}

impl TryFrom<proto::CapacityRange> for CapacityRange {
  type Error = tonic::Status;

  fn try_from(value: proto::CapacityRange) -> Result<Self, Self::Error> {
    if value.required_bytes < 0 {
      return Err(tonic::Status::invalid_argument(
        "CapacityRange.required_bytes cannot be negative",
      ));
    }

    if value.limit_bytes < 0 {
      return Err(tonic::Status::invalid_argument(
        "CapacityRange.limit_bytes cannot be negative",
      ));
    }

    let required = NonZeroU64::new(value.required_bytes as u64);
    let limit = NonZeroU64::new(value.limit_bytes as u64);

    match (required, limit) {
      (None, None) => Err(tonic::Status::invalid_argument(
        "CapacityRange requires required_bytes or limit_bytes",
      )),
      (Some(r), None) => Ok(CapacityRange::AtLeast(r)),
      (None, Some(l)) => Ok(CapacityRange::AtMost(l)),
      (Some(r), Some(l)) if r > l => Err(tonic::Status::out_of_range(
        "CapacityRange.required_bytes exceeds limit_bytes",
      )),
      (Some(r), Some(l)) => Ok(CapacityRange::Between(r, l)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  fn nz(v: u64) -> NonZeroU64 {
    NonZeroU64::new(v).unwrap()
  }

  #[test_case(10, 0 => Some(CapacityRange::AtLeast(nz(10))) ; "required only")]
  #[test_case(0, 20 => Some(CapacityRange::AtMost(nz(20))) ; "limit only")]
  #[test_case(10, 20 => Some(CapacityRange::Between(nz(10), nz(20))) ; "both")]
  #[test_case(0, 0 => None ; "empty")]
  #[test_case(30, 20 => None ; "inverted")]
  #[test_case(-1, 0 => None ; "negative")]
  fn capacity_range(required_bytes: i64, limit_bytes: i64) -> Option<CapacityRange> {
    CapacityRange::try_from(proto::CapacityRange {
      required_bytes,
      limit_bytes,
    })
    .ok()
  }

  #[test]
  fn required_bytes_falls_back_to_limit() {
    assert_eq!(CapacityRange::AtMost(nz(5)).required_bytes(), nz(5));
    assert_eq!(CapacityRange::Between(nz(3), nz(5)).required_bytes(), nz(3));
    assert_eq!(CapacityRange::AtLeast(nz(3)).limit_bytes(), None);
  }

  #[test_case(proto::volume_capability::access_mode::Mode::SingleNodeWriter => true)]
  #[test_case(proto::volume_capability::access_mode::Mode::SingleNodeReaderOnly => true)]
  #[test_case(proto::volume_capability::access_mode::Mode::SingleNodeSingleWriter => true)]
  #[test_case(proto::volume_capability::access_mode::Mode::SingleNodeMultiWriter => true)]
  #[test_case(proto::volume_capability::access_mode::Mode::MultiNodeReaderOnly => false)]
  #[test_case(proto::volume_capability::access_mode::Mode::MultiNodeSingleWriter => false)]
  #[test_case(proto::volume_capability::access_mode::Mode::MultiNodeMultiWriter => false)]
  #[test_case(proto::volume_capability::access_mode::Mode::Unknown => false)]
  fn single_node_modes(mode: proto::volume_capability::access_mode::Mode) -> bool {
    AccessMode::from(proto::volume_capability::AccessMode { mode: mode.into() }).is_single_node()
  }

  #[test]
  fn out_of_range_mode_is_unknown() {
    let mode = AccessMode::from(proto::volume_capability::AccessMode { mode: 42 });
    assert_eq!(mode, AccessMode::Unknown);
  }

  #[test]
  fn capability_requires_access_type() {
    let capability = proto::VolumeCapability {
      access_mode: Some(AccessMode::SingleNodeWriter.into()),
      access_type: None,
    };

    let err = VolumeCapability::try_from(capability).unwrap_err();
    assert_eq!(err.code(), tonic::Code::InvalidArgument);
  }

  #[test]
  fn mount_volume_empty_fs_type_is_none() {
    let mount = MountVolume::from(proto::volume_capability::MountVolume {
      fs_type: String::new(),
      mount_flags: vec!["noatime".into()],
      volume_mount_group: String::new(),
    });

    assert_eq!(mount.fs_type(), None);
    assert_eq!(mount.mount_flags().collect::<Vec<_>>(), vec!["noatime"]);
    assert!(!format!("{:?}", mount).contains("noatime"));
  }
}
