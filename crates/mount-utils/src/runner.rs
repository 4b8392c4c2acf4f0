use crate::{FileType, MountError, MountPoint, Options, Result};
use std::{
  fs,
  future::Future,
  io,
  path::{Path, PathBuf},
  sync::Arc,
};
use tracing::{debug, info, warn, Instrument, Span};

/// Blocking mount operations. Each call runs on its own thread from the
/// tokio blocking pool, so a slow `mkfs` never holds up other volumes.
pub trait MounterImpl: Sized + Send + Sync + 'static {
  fn new() -> Result<Self>;

  /// Mounts source to target as fstype with given options. Options are
  /// passed to `mount(8)` but never logged.
  fn mount(
    &self,
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: String,
    options: Options,
  ) -> Result<()>;

  fn unmount(&self, target: &Path) -> Result<()>;

  fn list(&self) -> Result<Vec<MountPoint>>;

  /// A fast heuristic: a path on a different device than its parent is a
  /// mount point. Bind mounts from the same device are not detected.
  fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool>;

  fn file_type(&self, path: &Path) -> Result<FileType>;

  /// Probe the filesystem on `device`. `None` means unformatted.
  fn get_disk_format(&self, device: &Path) -> Result<Option<String>>;

  /// Create a `fstype` filesystem on `device`.
  fn format(&self, device: &Path, fstype: &str) -> Result<()>;

  /// Check and repair the `fstype` filesystem on `device` before it is
  /// mounted read-write.
  fn check_filesystem(&self, device: &Path, fstype: &str) -> Result<()>;

  fn resize_fs(&self, device: &Path, mount_path: &Path) -> Result<()>;

  fn is_not_mount_point(&self, file: &Path) -> Result<bool> {
    let not_mnt = match self.is_likely_not_mount_point(file) {
      Ok(v) => v,
      // Not allowed to stat, fall back to scanning the mount table.
      Err(e) if e.is_permission_error() => true,
      Err(e) => return Err(e),
    };

    if !not_mnt {
      return Ok(false);
    }

    // The kernel lists the resolved path in /proc/mounts.
    let resolved = match fs::canonicalize(file) {
      Ok(v) => v,
      Err(_) => return Ok(true),
    };

    Ok(!self.list()?.iter().any(|mp| mp.matches(&resolved)))
  }

  fn get_device_name_from_mount(&self, mount_path: &Path) -> Result<Option<(PathBuf, usize)>> {
    let mps = self.list()?;
    let mount_path = fs::canonicalize(mount_path).unwrap_or_else(|_| mount_path.to_owned());

    // FIXME if multiple devices are mounted on the same path, only the first one is returned.
    Ok(
      mps
        .iter()
        .find(|m| m.path() == mount_path)
        .map(|m| m.device().to_owned())
        .map(|device| {
          let ref_count = mps.iter().filter(|m| m.device() == device).count();
          (device, ref_count)
        }),
    )
  }

  fn format_and_mount(
    &self,
    source: PathBuf,
    target: PathBuf,
    fstype: String,
    options: Options,
  ) -> Result<()> {
    let read_only = options.iter().any(|o| o == "ro");

    let existing = self.get_disk_format(&source)?;
    match &existing {
      None => {
        if read_only {
          return Err(MountError::UnformattedReadOnly(format!(
            "cannot mount unformatted disk {} as read-only",
            source.display()
          )));
        }

        info!(
          "Disk {} appears to be unformatted, formatting as {}",
          source.display(),
          fstype
        );
        self.format(&source, &fstype)?;
      }

      Some(existing) => {
        if *existing != fstype {
          warn!(
            "Configured to mount disk {} as {} but current format is {}",
            source.display(),
            fstype,
            existing
          );
        }

        if !read_only {
          self.check_filesystem(&source, existing)?;
        }
      }
    }

    debug!(
      "Mounting {} at {} as {}",
      source.display(),
      target.display(),
      fstype
    );
    match self.mount(Some(source.clone()), target, fstype.clone(), options) {
      Ok(()) => Ok(()),
      Err(e) => match existing {
        Some(existing) if existing != fstype => Err(MountError::FilesystemMismatch(format!(
          "failed to mount {} as {}, it already contains {}: {}",
          source.display(),
          fstype,
          existing,
          e
        ))),
        _ => Err(e),
      },
    }
  }

  fn cleanup_mount_point(&self, target: &Path) -> Result<()> {
    let corrupted = match fs::symlink_metadata(target) {
      Ok(_) => false,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!("{} does not exist, nothing to clean up", target.display());
        return Ok(());
      }
      Err(e) if is_corrupted_mount(&e) => {
        warn!("{} looks like a corrupted mount: {}", target.display(), e);
        true
      }
      Err(e) => return Err(e.into()),
    };

    if !corrupted && self.is_not_mount_point(target)? {
      info!("{} is not a mount point, removing it", target.display());
      return remove_mount_target(target);
    }

    self.unmount(target)?;
    if !self.is_not_mount_point(target)? {
      return Err(MountError::new(format!(
        "failed to unmount path {}",
        target.display()
      )));
    }

    remove_mount_target(target)
  }
}

/// Errors a stat on a broken mount (stale NFS handle, disconnected FUSE
/// daemon and so on) ends with.
pub(crate) fn is_corrupted_mount(e: &io::Error) -> bool {
  matches!(
    e.raw_os_error(),
    Some(libc::ENOTCONN) | Some(libc::ESTALE) | Some(libc::EIO) | Some(libc::EACCES)
  )
}

fn remove_mount_target(target: &Path) -> Result<()> {
  let result = match fs::symlink_metadata(target) {
    Ok(m) if m.is_dir() => fs::remove_dir(target),
    Ok(_) => fs::remove_file(target),
    Err(e) => Err(e),
  };

  match result {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(e.into()),
  }
}

/// Run blocking mount work off the async runtime, inside the caller's span.
pub(crate) fn run<R, F>(f: F) -> impl Future<Output = Result<R>>
where
  F: FnOnce() -> Result<R> + Send + 'static,
  R: Send + 'static,
{
  let span = Span::current();
  let task = tokio::task::spawn_blocking(move || span.in_scope(f));

  async move {
    match task.await {
      Ok(result) => result,
      Err(e) if e.is_panic() => Err(MountError::new(format!("mount task panicked: {}", e))),
      Err(e) => Err(MountError::new(format!("mount task was cancelled: {}", e))),
    }
  }
  .in_current_span()
}

pub(crate) fn run_inst<T, R, F>(mounter: Arc<T>, f: F) -> impl Future<Output = Result<R>>
where
  T: MounterImpl,
  F: FnOnce(&T) -> Result<R> + Send + 'static,
  R: Send + 'static,
{
  run(move || f(&*mounter))
}

/// Splits a bind mount request into the plain `bind` mount and the
/// `bind,remount` that applies the remaining options, since the kernel
/// ignores options on the first bind. `_netdev` is a userspace option that
/// must be carried on both.
pub(crate) fn make_bind_opts(opts: &[String]) -> (bool, Vec<String>, Vec<String>) {
  let mut bind = false;
  let mut bind_opts: Vec<String> = vec!["bind".into()];
  let mut bind_remount_opts: Vec<String> = vec!["bind".into(), "remount".into()];

  for opt in opts {
    match opt.as_str() {
      "bind" => bind = true,
      "_netdev" => {
        bind_opts.push("_netdev".into());
        bind_remount_opts.push("_netdev".into());
      }
      _ => bind_remount_opts.push(opt.clone()),
    }
  }

  (bind, bind_opts, bind_remount_opts)
}

pub trait MounterWrapper {
  type Mounter: MounterImpl;

  fn new(inner: Arc<Self::Mounter>) -> Self;

  fn mounter(&self) -> &Arc<Self::Mounter>;
}
