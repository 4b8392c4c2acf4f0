use crate::{runner::MounterImpl, FileType, MountError, MountPoint, Options, Result};
use std::{
  collections::{HashMap, HashSet},
  fs,
  path::{Path, PathBuf},
  sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeAction {
  Mount {
    source: PathBuf,
    target: PathBuf,
    fs_type: String,
  },

  Unmount {
    target: PathBuf,
  },

  Format {
    device: PathBuf,
    fs_type: String,
  },

  CheckFilesystem {
    device: PathBuf,
    fs_type: String,
  },

  Resize {
    device: PathBuf,
    mount_path: PathBuf,
  },
}

type UnmountFunc = Box<dyn Fn(&Path) -> Option<MountError> + Send>;
type ErrorFactory = Box<dyn Fn() -> MountError + Send>;

struct FakeMounterInner {
  mount_points: Vec<MountPoint>,
  log: Vec<FakeAction>,
  disk_formats: HashMap<PathBuf, String>,
  block_devices: HashSet<PathBuf>,
  mount_check_errors: HashMap<PathBuf, ErrorFactory>,
  mount_error: Option<ErrorFactory>,
  unmount_func: Option<UnmountFunc>,
}

/// Mount table, disk format table and action log kept in memory. Paths are
/// still resolved against the real filesystem, so targets must exist.
pub struct FakeMounter(Mutex<FakeMounterInner>);

impl FakeMounter {
  pub fn new(mps: impl IntoIterator<Item = MountPoint>) -> Self {
    let mount_points = mps.into_iter().collect();
    let inner = FakeMounterInner {
      mount_points,
      log: Vec::new(),
      disk_formats: HashMap::new(),
      block_devices: HashSet::new(),
      mount_check_errors: HashMap::new(),
      mount_error: None,
      unmount_func: None,
    };

    Self(Mutex::new(inner))
  }

  /// Pretend `device` already carries a `fs_type` filesystem.
  pub fn with_disk_format(self, device: impl Into<PathBuf>, fs_type: impl Into<String>) -> Self {
    self.lock().disk_formats.insert(device.into(), fs_type.into());
    self
  }

  /// Report `device` as a block device, whatever it is on disk.
  pub fn with_block_device(self, device: impl Into<PathBuf>) -> Self {
    self.add_block_device(device);
    self
  }

  pub fn add_block_device(&self, device: impl Into<PathBuf>) {
    self.lock().block_devices.insert(device.into());
  }

  /// Fail every mount with the produced error.
  pub fn with_mount_error(self, f: impl Fn() -> MountError + Send + 'static) -> Self {
    self.lock().mount_error = Some(Box::new(f));
    self
  }

  /// Fail mount point checks of `path` with the produced error.
  pub fn with_mount_check_error(
    self,
    path: impl Into<PathBuf>,
    f: impl Fn() -> MountError + Send + 'static,
  ) -> Self {
    self.lock().mount_check_errors.insert(path.into(), Box::new(f));
    self
  }

  pub fn with_unmount_func(self, f: impl Fn(&Path) -> Option<MountError> + Send + 'static) -> Self {
    self.lock().unmount_func = Some(Box::new(f));
    self
  }

  pub fn disk_format(&self, device: impl AsRef<Path>) -> Option<String> {
    self.lock().disk_formats.get(device.as_ref()).cloned()
  }

  pub fn reset_log(&self) {
    self.lock().log.clear();
  }

  pub fn get_log(&self) -> Vec<FakeAction> {
    self.lock().log.clone()
  }

  fn lock(&self) -> MutexGuard<'_, FakeMounterInner> {
    self.0.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

// If target is a symlink, get its absolute path
fn resolve(path: &Path) -> PathBuf {
  fs::canonicalize(path).unwrap_or_else(|_| path.to_owned())
}

impl MounterImpl for FakeMounter {
  fn new() -> Result<Self> {
    Ok(FakeMounter::new(None))
  }

  fn mount(
    &self,
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: String,
    options: Options,
  ) -> Result<()> {
    let mut source =
      source.ok_or_else(|| MountError::new("missing required source in fake mounter"))?;
    let mut inner = self.lock();

    if let Some(err_factory) = &inner.mount_error {
      return Err(err_factory());
    }

    let mut opts = Vec::new();
    for opt in options {
      if opt == "bind" {
        // Linux lists the original device of a bind-mounted mount point,
        // not the mount point itself:
        //      $ mount /dev/sda /mnt/test
        //      $ mount -o bind /mnt/test /mnt/bound
        // gives "/dev/sda /mnt/bound" in /proc/mounts.
        if let Some(mnt) = inner.mount_points.iter().find(|mnt| mnt.path == source) {
          source = mnt.device.clone();
        }
      }

      opts.push(opt);
    }

    let target = resolve(&target);

    inner.mount_points.push(MountPoint {
      device: source.clone(),
      path: target.clone(),
      ty: fstype.clone(),
      opts,
      freq: 0,
      pass: 0,
    });
    info!(
      "Fake mounter: mounted {} to {}",
      source.display(),
      target.display()
    );
    inner.log.push(FakeAction::Mount {
      source,
      target,
      fs_type: fstype,
    });

    Ok(())
  }

  fn unmount(&self, target: &Path) -> Result<()> {
    let mut inner = self.lock();
    let orig_target = target.to_owned();
    let target = resolve(target);

    if let Some(i) = inner.mount_points.iter().position(|mp| mp.path == target) {
      if let Some(e) = inner.unmount_func.as_ref().and_then(|f| f(&target)) {
        return Err(e);
      }

      let mp = inner.mount_points.remove(i);
      info!(
        "Fake mounter: unmounted {} from {}",
        mp.device.display(),
        target.display()
      );
    }

    inner.log.push(FakeAction::Unmount { target });
    inner.mount_check_errors.remove(&orig_target);
    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    Ok(self.lock().mount_points.clone())
  }

  fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool> {
    let inner = self.lock();

    if let Some(err_factory) = inner.mount_check_errors.get(file) {
      return Err(err_factory());
    }

    let _ = fs::metadata(file)?;
    let file = resolve(file);

    if inner.mount_points.iter().any(|mp| mp.path == file) {
      info!("isLikelyNotMountPoint for {}: false", file.display());
      return Ok(false);
    }

    info!("isLikelyNotMountPoint for {}: true", file.display());
    Ok(true)
  }

  fn file_type(&self, path: &Path) -> Result<FileType> {
    if self.lock().block_devices.contains(path) {
      return Ok(FileType::BlockDevice);
    }

    let metadata = fs::metadata(path)?;
    Ok(if metadata.is_dir() {
      FileType::Directory
    } else if metadata.is_file() {
      FileType::File
    } else {
      FileType::Other
    })
  }

  fn get_disk_format(&self, device: &Path) -> Result<Option<String>> {
    Ok(self.lock().disk_formats.get(device).cloned())
  }

  fn format(&self, device: &Path, fstype: &str) -> Result<()> {
    let mut inner = self.lock();
    inner
      .disk_formats
      .insert(device.to_owned(), fstype.to_owned());
    inner.log.push(FakeAction::Format {
      device: device.to_owned(),
      fs_type: fstype.to_owned(),
    });

    Ok(())
  }

  fn check_filesystem(&self, device: &Path, fstype: &str) -> Result<()> {
    self.lock().log.push(FakeAction::CheckFilesystem {
      device: device.to_owned(),
      fs_type: fstype.to_owned(),
    });

    Ok(())
  }

  fn resize_fs(&self, device: &Path, mount_path: &Path) -> Result<()> {
    let mut inner = self.lock();
    if !inner.disk_formats.contains_key(device) {
      return Err(MountError::ResizeFailed(format!(
        "{} has no filesystem to resize",
        device.display()
      )));
    }

    inner.log.push(FakeAction::Resize {
      device: device.to_owned(),
      mount_path: mount_path.to_owned(),
    });

    Ok(())
  }
}
