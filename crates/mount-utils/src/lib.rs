//! Node-local mount engine. Operations shell out to the host's tools on the
//! tokio blocking pool, so concurrent volumes never wait on each other.

cfg_if::cfg_if! {
  if #[cfg(unix)] {
    mod unix;
    use unix::*;
  } else {
    compile_error!("Only cfg(unix) is supported at this time")
  }
}

mod device;
pub mod fake;
mod runner;

pub use device::{DeviceResolver, DEVICES_BY_ID_PATH};

use futures::future::BoxFuture;
use runner::{run_inst, MounterImpl, MounterWrapper};
use smallvec::SmallVec;
use static_assertions::assert_impl_all;
use std::{
  io,
  ops::Deref,
  path::{Path, PathBuf},
  result,
  sync::Arc,
};
use thiserror::Error;

pub type Result<T> = result::Result<T, MountError>;
pub type FutureResult<T> = BoxFuture<'static, Result<T>>;
pub type Options = SmallVec<[String; 4]>;

const DEFAULT_MOUNT_COMMAND: &str = "mount";

/// Interface defines the set of methods to allow for mount operations on a system.
pub trait Mounter: Sized + Send + Sync + 'static {
  fn new() -> FutureResult<Self>;

  /// Mounts source to target as fstype with given options. Options are not
  /// logged.
  fn mount<I, P1, P2, A>(
    &self,
    source: Option<P1>,
    target: P2,
    fstype: A,
    options: I,
  ) -> FutureResult<()>
  where
    I: IntoIterator,
    <I as IntoIterator>::Item: Into<String>,
    P1: Into<PathBuf>,
    P2: Into<PathBuf>,
    A: Into<String>;

  fn unmount<P>(&self, target: P) -> FutureResult<()>
  where
    P: Into<PathBuf>;

  /// List returns a list of all mounted filesystems.
  fn list(&self) -> FutureResult<Vec<MountPoint>>;

  /// Whether `file` is not a mount point. Bind mounts are detected by
  /// scanning the mount table.
  fn is_not_mount_point<P>(&self, file: P) -> FutureResult<bool>
  where
    P: Into<PathBuf>;

  fn file_type<P>(&self, path: P) -> FutureResult<FileType>
  where
    P: Into<PathBuf>;

  /// Probe the filesystem on `device`. `None` means unformatted.
  fn get_disk_format<P>(&self, device: P) -> FutureResult<Option<String>>
  where
    P: Into<PathBuf>;

  /// Mount `source` at `target`, creating a `fstype` filesystem first if the
  /// device has none. Existing filesystems are checked before mounting
  /// read-write.
  fn format_and_mount<I, P1, P2, A>(
    &self,
    source: P1,
    target: P2,
    fstype: A,
    options: I,
  ) -> FutureResult<()>
  where
    I: IntoIterator,
    <I as IntoIterator>::Item: Into<String>,
    P1: Into<PathBuf>,
    P2: Into<PathBuf>,
    A: Into<String>;

  /// Grow the filesystem on `device`, mounted at `mount_path`, to fill the
  /// device.
  fn resize_fs<P1, P2>(&self, device: P1, mount_path: P2) -> FutureResult<()>
  where
    P1: Into<PathBuf>,
    P2: Into<PathBuf>;

  /// The device mounted at `mount_path` and the number of mounts of it.
  fn get_device_name_from_mount<P>(&self, mount_path: P) -> FutureResult<Option<(PathBuf, usize)>>
  where
    P: Into<PathBuf>;

  /// Unmount `target` if it is mounted, then remove it. A missing target is
  /// not an error.
  fn cleanup_mount_point<P>(&self, target: P) -> FutureResult<()>
  where
    P: Into<PathBuf>;
}

/// MountPoint represents a single line in /proc/mounts or /etc/fstab.
#[derive(Debug, Clone, PartialEq)]
pub struct MountPoint {
  device: PathBuf,
  path: PathBuf,
  ty: String,
  opts: Vec<String>,
  freq: isize,
  pass: isize,
}

impl MountPoint {
  pub fn new(
    device: impl Into<PathBuf>,
    path: impl Into<PathBuf>,
    ty: impl Into<String>,
    opts: impl IntoIterator<Item = String>,
  ) -> Self {
    MountPoint {
      device: device.into(),
      path: path.into(),
      ty: ty.into(),
      opts: opts.into_iter().collect(),
      freq: 0,
      pass: 0,
    }
  }

  #[inline]
  pub fn device(&self) -> &Path {
    &self.device
  }

  #[inline]
  pub fn path(&self) -> &Path {
    &self.path
  }

  #[inline]
  pub fn mount_type(&self) -> &str {
    &self.ty
  }

  #[inline]
  pub fn opts(&self) -> &[String] {
    &self.opts
  }

  #[inline]
  pub fn freq(&self) -> isize {
    self.freq
  }

  #[inline]
  pub fn pass(&self) -> isize {
    self.pass
  }

  /// Whether this entry is mounted at `dir`. The kernel marks mount points
  /// whose directory was removed with a `\040(deleted)` suffix.
  pub fn matches(&self, dir: &Path) -> bool {
    if self.path == dir {
      return true;
    }

    let deleted = format!("{}\\040(deleted)", dir.display());
    self.path == Path::new(&deleted)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
  Directory,
  File,
  BlockDevice,
  CharDevice,
  Socket,
  Other,
}

#[derive(Debug, Error)]
pub enum MountError {
  #[error("File system mismatch: {0}")]
  FilesystemMismatch(String),
  #[error("Has filesystem errors: {0}")]
  HasFilesystemErrors(String),
  #[error("Unformatted read only: {0}")]
  UnformattedReadOnly(String),
  #[error("Format failed: {0}")]
  FormatFailed(String, #[source] io::Error),
  #[error("Get disk format failed: {0}")]
  GetDiskFormatFailed(String, #[source] io::Error),
  #[error("Resize failed: {0}")]
  ResizeFailed(String),
  #[error("Device not found: {0}")]
  DeviceNotFound(String),
  #[error("Unknown mount error: {0}")]
  UnknownMountError(
    #[from]
    #[source]
    io::Error,
  ),
}

impl MountError {
  fn io(&self) -> Option<&io::Error> {
    match self {
      MountError::FormatFailed(_, e) => Some(e),
      MountError::GetDiskFormatFailed(_, e) => Some(e),
      MountError::UnknownMountError(e) => Some(e),
      _ => None,
    }
  }

  fn is_permission_error(&self) -> bool {
    matches!(
      self.io().map(io::Error::kind),
      Some(io::ErrorKind::PermissionDenied)
    )
  }

  pub(crate) fn new(msg: impl Into<String>) -> Self {
    MountError::UnknownMountError(io::Error::new(io::ErrorKind::Other, msg.into()))
  }
}

fn collect_options<I>(options: I) -> Options
where
  I: IntoIterator,
  <I as IntoIterator>::Item: Into<String>,
{
  options.into_iter().map(Into::into).collect()
}

impl<T> Mounter for T
where
  T: MounterWrapper + Send + Sync + 'static,
{
  fn new() -> FutureResult<Self> {
    Box::pin(async move {
      runner::run(<T as MounterWrapper>::Mounter::new)
        .await
        .map(|inner| <T as MounterWrapper>::new(Arc::new(inner)))
    })
  }

  fn mount<I, P1, P2, A>(
    &self,
    source: Option<P1>,
    target: P2,
    fstype: A,
    options: I,
  ) -> FutureResult<()>
  where
    I: IntoIterator,
    <I as IntoIterator>::Item: Into<String>,
    P1: Into<PathBuf>,
    P2: Into<PathBuf>,
    A: Into<String>,
  {
    let source = source.map(Into::into);
    let target = target.into();
    let fstype = fstype.into();
    let options = collect_options(options);

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.mount(source, target, fstype, options)
    }))
  }

  fn unmount<P>(&self, target: P) -> FutureResult<()>
  where
    P: Into<PathBuf>,
  {
    let target = target.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.unmount(&target)
    }))
  }

  fn list(&self) -> FutureResult<Vec<MountPoint>> {
    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.list()
    }))
  }

  fn is_not_mount_point<P>(&self, file: P) -> FutureResult<bool>
  where
    P: Into<PathBuf>,
  {
    let file = file.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.is_not_mount_point(&file)
    }))
  }

  fn file_type<P>(&self, path: P) -> FutureResult<FileType>
  where
    P: Into<PathBuf>,
  {
    let path = path.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.file_type(&path)
    }))
  }

  fn get_disk_format<P>(&self, device: P) -> FutureResult<Option<String>>
  where
    P: Into<PathBuf>,
  {
    let device = device.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.get_disk_format(&device)
    }))
  }

  fn format_and_mount<I, P1, P2, A>(
    &self,
    source: P1,
    target: P2,
    fstype: A,
    options: I,
  ) -> FutureResult<()>
  where
    I: IntoIterator,
    <I as IntoIterator>::Item: Into<String>,
    P1: Into<PathBuf>,
    P2: Into<PathBuf>,
    A: Into<String>,
  {
    let source = source.into();
    let target = target.into();
    let fstype = fstype.into();
    let options = collect_options(options);

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.format_and_mount(source, target, fstype, options)
    }))
  }

  fn resize_fs<P1, P2>(&self, device: P1, mount_path: P2) -> FutureResult<()>
  where
    P1: Into<PathBuf>,
    P2: Into<PathBuf>,
  {
    let device = device.into();
    let mount_path = mount_path.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.resize_fs(&device, &mount_path)
    }))
  }

  fn get_device_name_from_mount<P>(&self, mount_path: P) -> FutureResult<Option<(PathBuf, usize)>>
  where
    P: Into<PathBuf>,
  {
    let mount_path = mount_path.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.get_device_name_from_mount(&mount_path)
    }))
  }

  fn cleanup_mount_point<P>(&self, target: P) -> FutureResult<()>
  where
    P: Into<PathBuf>,
  {
    let target = target.into();

    Box::pin(run_inst(self.mounter().clone(), move |mounter| {
      mounter.cleanup_mount_point(&target)
    }))
  }
}

assert_impl_all!(OsMounter: MounterImpl);
assert_impl_all!(fake::FakeMounter: MounterImpl);

/// Mounter driving the host's `mount`, `blkid`, `mkfs` and friends.
pub struct DefaultMounter(Arc<OsMounter>);

impl MounterWrapper for DefaultMounter {
  type Mounter = OsMounter;

  fn new(inner: Arc<Self::Mounter>) -> Self {
    DefaultMounter(inner)
  }

  #[inline]
  fn mounter(&self) -> &Arc<Self::Mounter> {
    &self.0
  }
}

/// In-memory mounter for tests. Derefs to the [`fake::FakeMounter`] state so
/// tests can seed it and inspect the action log.
pub struct FakeMounter(Arc<fake::FakeMounter>);

impl MounterWrapper for FakeMounter {
  type Mounter = fake::FakeMounter;

  fn new(inner: Arc<Self::Mounter>) -> Self {
    FakeMounter(inner)
  }

  #[inline]
  fn mounter(&self) -> &Arc<Self::Mounter> {
    &self.0
  }
}

impl From<fake::FakeMounter> for FakeMounter {
  fn from(inner: fake::FakeMounter) -> Self {
    FakeMounter(Arc::new(inner))
  }
}

impl Deref for FakeMounter {
  type Target = fake::FakeMounter;

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}
