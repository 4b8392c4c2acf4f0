use crate::{runner, MountError, Result};
use std::{
  fs, io,
  path::{Path, PathBuf},
};
use tracing::debug;

/// Directory udev populates with stable device links.
pub const DEVICES_BY_ID_PATH: &str = "/dev/disk/by-id";

/// Finds the block device backing a volume. The hypervisor exposes the
/// volume id as the disk serial, which udev turns into a
/// `/dev/disk/by-id/<bus>-<serial>` link.
#[derive(Debug, Clone)]
pub struct DeviceResolver {
  by_id_dir: PathBuf,
}

impl Default for DeviceResolver {
  fn default() -> Self {
    Self::new(DEVICES_BY_ID_PATH)
  }
}

impl DeviceResolver {
  pub fn new(by_id_dir: impl Into<PathBuf>) -> Self {
    Self {
      by_id_dir: by_id_dir.into(),
    }
  }

  /// Resolve `volume_id` to the canonical device path, e.g. `/dev/sdb`.
  pub async fn resolve(&self, volume_id: impl Into<String>) -> Result<PathBuf> {
    let volume_id = volume_id.into();
    let by_id_dir = self.by_id_dir.clone();

    runner::run(move || resolve_in(&by_id_dir, &volume_id)).await
  }
}

fn resolve_in(by_id_dir: &Path, volume_id: &str) -> Result<PathBuf> {
  if volume_id.is_empty() {
    return Err(MountError::DeviceNotFound(
      "volume id is empty".to_owned(),
    ));
  }

  let entries = match fs::read_dir(by_id_dir) {
    Ok(v) => v,
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      return Err(MountError::DeviceNotFound(format!(
        "{} does not exist",
        by_id_dir.display()
      )))
    }
    Err(e) => return Err(e.into()),
  };

  let mut candidates = Vec::new();
  for entry in entries {
    let entry = entry?;
    if entry.file_name().to_string_lossy().ends_with(volume_id) {
      candidates.push(entry.path());
    }
  }

  // read_dir order is filesystem dependent.
  candidates.sort();
  let link = candidates.into_iter().next().ok_or_else(|| {
    MountError::DeviceNotFound(format!(
      "no device in {} for volume {}",
      by_id_dir.display(),
      volume_id
    ))
  })?;

  let device = fs::canonicalize(&link)?;
  debug!(
    "Resolved volume {} to {} via {}",
    volume_id,
    device.display(),
    link.display()
  );

  Ok(device)
}
