use crate::{
  runner::{make_bind_opts, MounterImpl},
  FileType, MountError, MountPoint, Options, Result, DEFAULT_MOUNT_COMMAND,
};
use duct::cmd;
use smallvec::SmallVec;
use std::{
  ffi::OsString,
  fmt::Write,
  fs, io,
  num::NonZeroUsize,
  os::unix::fs::{FileTypeExt, MetadataExt},
  path::{Path, PathBuf},
};
use tracing::{debug, error, info};

const PROC_MOUNTS_PATH: &str = "/proc/mounts";
const MAX_LIST_TRIES: NonZeroUsize = match NonZeroUsize::new(3) {
  Some(v) => v,
  None => unreachable!(),
};
const EXPECTED_FIELDS_PER_MOUNTS_LINE: usize = 6;

// Exit status of `blkid -p` on a device without any recognizable signature.
const BLKID_NOTHING_FOUND: i32 = 2;
// `fsck` exit statuses, see fsck(8).
const FSCK_ERRORS_CORRECTED: i32 = 1;
const FSCK_ERRORS_UNCORRECTED: i32 = 4;

pub struct OsMounter;

impl MounterImpl for OsMounter {
  fn new() -> Result<Self> {
    Ok(OsMounter)
  }

  fn mount(
    &self,
    source: Option<PathBuf>,
    target: PathBuf,
    fstype: String,
    options: Options,
  ) -> Result<()> {
    let (bind, bind_opts, bind_remount_opts) = make_bind_opts(&options);

    if bind {
      do_mount(source.clone(), target.clone(), &fstype, &bind_opts)?;
      do_mount(source, target, &fstype, &bind_remount_opts)
    } else {
      do_mount(source, target, &fstype, &options)
    }
  }

  fn unmount(&self, target: &Path) -> Result<()> {
    info!("Unmounting {}", target.display());
    let output = exec("umount", vec![target.into()])?;
    if !output.success() {
      error!("Unmount failed: {}", output.output);
      return Err(output.into_error("umount").into());
    }

    Ok(())
  }

  fn list(&self) -> Result<Vec<MountPoint>> {
    list_proc_mounts(Path::new(PROC_MOUNTS_PATH))
  }

  fn is_likely_not_mount_point(&self, file: &Path) -> Result<bool> {
    let stat = fs::metadata(file)?;
    let parent = file
      .parent()
      .ok_or_else(|| MountError::new("file does not have parent"))?;
    let parent_stat = fs::metadata(parent)?;
    // If the directory has a different device as parent, then it is a mountpoint.
    if stat.dev() != parent_stat.dev() {
      return Ok(false);
    }

    Ok(true)
  }

  fn file_type(&self, path: &Path) -> Result<FileType> {
    let ft = fs::metadata(path)?.file_type();

    Ok(if ft.is_dir() {
      FileType::Directory
    } else if ft.is_file() {
      FileType::File
    } else if ft.is_block_device() {
      FileType::BlockDevice
    } else if ft.is_char_device() {
      FileType::CharDevice
    } else if ft.is_socket() {
      FileType::Socket
    } else {
      FileType::Other
    })
  }

  fn get_disk_format(&self, device: &Path) -> Result<Option<String>> {
    let output = exec(
      "blkid",
      args(&["-p", "-s", "TYPE", "-s", "PTTYPE", "-o", "export"], device),
    )
    .map_err(|e| MountError::GetDiskFormatFailed(device.display().to_string(), e))?;

    match output.code {
      Some(0) => Ok(parse_blkid_output(&output.output)),
      Some(BLKID_NOTHING_FOUND) => Ok(None),
      _ => Err(MountError::GetDiskFormatFailed(
        device.display().to_string(),
        output.into_error("blkid"),
      )),
    }
  }

  fn format(&self, device: &Path, fstype: &str) -> Result<()> {
    let program = format!("mkfs.{}", fstype);
    let mkfs_args = if fstype.starts_with("ext") {
      // Skip the interactive "proceed anyway" prompt and don't reserve
      // blocks for root on a data volume.
      args(&["-F", "-m0"], device)
    } else {
      args(&[], device)
    };

    info!("Formatting {} with {}", device.display(), program);
    let output = exec(&program, mkfs_args)
      .map_err(|e| MountError::FormatFailed(device.display().to_string(), e))?;
    if !output.success() {
      error!("Format of {} failed: {}", device.display(), output.output);
      return Err(MountError::FormatFailed(
        device.display().to_string(),
        output.into_error(&program),
      ));
    }

    Ok(())
  }

  fn check_filesystem(&self, device: &Path, fstype: &str) -> Result<()> {
    // xfs checks its log on mount.
    if !fstype.starts_with("ext") {
      return Ok(());
    }

    debug!("Checking for issues with fsck on {}", device.display());
    let output = exec("fsck", args(&["-a"], device))?;
    match output.code {
      Some(0) => Ok(()),
      Some(FSCK_ERRORS_CORRECTED) => {
        info!(
          "Device {} has errors which were corrected by fsck",
          device.display()
        );
        Ok(())
      }
      Some(FSCK_ERRORS_UNCORRECTED) => Err(MountError::HasFilesystemErrors(format!(
        "'fsck' found errors on device {} but could not correct them: {}",
        device.display(),
        output.output
      ))),
      _ => {
        info!("'fsck' error on {}: {}", device.display(), output.output);
        Ok(())
      }
    }
  }

  fn resize_fs(&self, device: &Path, mount_path: &Path) -> Result<()> {
    let format = self.get_disk_format(device)?;
    let (program, resize_args) = match format.as_deref() {
      Some("ext3") | Some("ext4") => ("resize2fs", args(&[], device)),
      Some("xfs") => ("xfs_growfs", args(&["-d"], mount_path)),
      Some(other) => {
        return Err(MountError::ResizeFailed(format!(
          "resize of format {} is not supported for device {}",
          other,
          device.display()
        )))
      }
      None => {
        return Err(MountError::ResizeFailed(format!(
          "{} has no filesystem to resize",
          device.display()
        )))
      }
    };

    info!(
      "Resizing {} mounted at {} with {}",
      device.display(),
      mount_path.display(),
      program
    );
    let output = exec(program, resize_args)?;
    if !output.success() {
      return Err(MountError::ResizeFailed(format!(
        "{} of {} failed: {}",
        program,
        device.display(),
        output.output
      )));
    }

    Ok(())
  }
}

fn args(flags: &[&str], path: &Path) -> Vec<OsString> {
  flags
    .iter()
    .map(OsString::from)
    .chain(Some(path.as_os_str().to_owned()))
    .collect()
}

struct CommandOutput {
  code: Option<i32>,
  output: String,
}

impl CommandOutput {
  fn success(&self) -> bool {
    self.code == Some(0)
  }

  fn into_error(self, program: &str) -> io::Error {
    io::Error::new(
      io::ErrorKind::Other,
      format!(
        "{} exited with {:?}: {}",
        program, self.code, self.output
      ),
    )
  }
}

/// Run `program` to completion with stderr folded into stdout. A non-zero
/// exit is not an error here; callers interpret exit codes.
fn exec(program: &str, args: Vec<OsString>) -> io::Result<CommandOutput> {
  let output = cmd(program, args)
    .stderr_to_stdout()
    .stdout_capture()
    .unchecked()
    .run()?;

  Ok(CommandOutput {
    code: output.status.code(),
    output: String::from_utf8_lossy(&output.stdout).trim().to_owned(),
  })
}

fn do_mount(
  source: Option<PathBuf>,
  target: PathBuf,
  fstype: &str,
  options: &[String],
) -> Result<()> {
  let (mount_args, log_str) = make_mount_args(source, target, fstype, options);

  info!(
    "Mounting cmd {} with arguments ({})",
    DEFAULT_MOUNT_COMMAND, log_str
  );
  let output = exec(DEFAULT_MOUNT_COMMAND, mount_args)?;
  if !output.success() {
    error!("Mount failed: {}", output.output);
    return Err(output.into_error(DEFAULT_MOUNT_COMMAND).into());
  }

  Ok(())
}

/// Arguments for `mount [-t fstype] [-o options] [source] target`, and a
/// loggable rendering of them. Mount flags come straight from the volume
/// capability and may carry credentials, so only their count is logged.
fn make_mount_args(
  source: Option<PathBuf>,
  target: PathBuf,
  fstype: &str,
  options: &[String],
) -> (Vec<OsString>, String) {
  let mut mount_args: Vec<OsString> = Vec::new();
  let mut log_str = String::new();

  if !fstype.is_empty() {
    mount_args.push("-t".into());
    mount_args.push(fstype.into());
    let _ = write!(log_str, "-t {}", fstype);
  }

  if !options.is_empty() {
    mount_args.push("-o".into());
    mount_args.push(options.join(",").into());
    let _ = write!(log_str, " -o <{} options>", options.len());
  }

  if let Some(source) = source {
    let _ = write!(log_str, " {}", source.display());
    mount_args.push(source.into());
  }

  let _ = write!(log_str, " {}", target.display());
  mount_args.push(target.into());

  (mount_args, log_str)
}

/// Pick the filesystem type out of `blkid -o export` output. A partition
/// table without a filesystem is reported as an unknown format so it is never
/// formatted over.
fn parse_blkid_output(output: &str) -> Option<String> {
  let mut fs_type = None;
  let mut pt_type = None;

  for line in output.lines() {
    match line.trim().split_once('=') {
      Some(("TYPE", v)) => fs_type = Some(v.to_owned()),
      Some(("PTTYPE", v)) => pt_type = Some(v.to_owned()),
      _ => (),
    }
  }

  match (fs_type, pt_type) {
    (Some(fs_type), _) => Some(fs_type),
    (None, Some(_)) => Some("unknown data, probably partitions".to_owned()),
    (None, None) => None,
  }
}

fn list_proc_mounts(mount_file_path: &Path) -> Result<Vec<MountPoint>> {
  let content = consistent_read(mount_file_path, MAX_LIST_TRIES)?;

  parse_proc_mounts(&content)
}

/// ConsistentRead repeatedly reads a file until it gets the same content twice. This is useful when reading files
/// in /proc that are larger than page size and kernel may modify them between individual read() syscalls.
fn consistent_read(path: &Path, attempts: NonZeroUsize) -> io::Result<Vec<u8>> {
  let mut old_content = fs::read(path)?;

  for _ in 0..attempts.get() {
    let new_content = fs::read(path)?;
    if new_content == old_content {
      return Ok(new_content);
    }

    // Files are different, continue reading
    old_content = new_content;
  }

  Err(io::Error::new(
    io::ErrorKind::Other,
    format!(
      "could not get consistent content of '{}' after {} attempts",
      path.display(),
      attempts.get()
    ),
  ))
}

fn parse_proc_mounts(content: &[u8]) -> Result<Vec<MountPoint>> {
  let mut out = Vec::new();
  let s = std::str::from_utf8(content)
    .map_err(|_| MountError::new("proc mounts contain invalid UTF8"))?;
  for line in s.lines() {
    if line.is_empty() {
      continue;
    }

    let fields = line
      .split_whitespace()
      .collect::<SmallVec<[&str; EXPECTED_FIELDS_PER_MOUNTS_LINE]>>();
    if fields.len() != EXPECTED_FIELDS_PER_MOUNTS_LINE {
      return Err(MountError::new(format!(
        "wrong number of fields (expected {}, got {})",
        EXPECTED_FIELDS_PER_MOUNTS_LINE,
        fields.len()
      )));
    }

    let freq = fields[4]
      .parse()
      .map_err(|e| MountError::new(format!("invalid freq: {:?}", e)))?;
    let pass = fields[5]
      .parse()
      .map_err(|e| MountError::new(format!("invalid pass: {:?}", e)))?;

    out.push(MountPoint {
      device: PathBuf::from(fields[0]),
      path: PathBuf::from(fields[1]),
      ty: fields[2].to_owned(),
      opts: fields[3].split(',').map(ToOwned::to_owned).collect(),
      freq,
      pass,
    })
  }

  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::{make_mount_args, parse_blkid_output, parse_proc_mounts, OsMounter};
  use crate::{runner::MounterImpl, MountPoint};
  use std::ffi::OsString;
  use test_case::test_case;

  #[test]
  fn read_proc_mounts() {
    let success_case = "
/dev/0 /path/to/0 type0 flags 0 0
/dev/1    /path/to/1   type1	flags 1 1
/dev/2 /path/to/2 type2 flags,1,2=3 2 2
";

    let mounts = parse_proc_mounts(success_case.as_ref()).expect("parse succeeded");
    assert_eq!(mounts.len(), 3);
    assert_eq!(
      mounts[0],
      MountPoint {
        device: "/dev/0".into(),
        path: "/path/to/0".into(),
        ty: "type0".into(),
        opts: vec!["flags".into()],
        freq: 0,
        pass: 0,
      }
    );
    assert_eq!(mounts[1].freq(), 1);
    assert_eq!(mounts[1].pass(), 1);
    assert_eq!(
      mounts[2].opts(),
      &["flags".to_string(), "1".to_string(), "2=3".to_string()]
    );

    let error_cases = &[
      "/dev/0 /path/to/mount\n",
      "/dev/1 /path/to/mount type flags a 0\n",
      "/dev/2 /path/to/mount type flags 0 b\n",
    ];
    for ec in error_cases {
      parse_proc_mounts(ec.as_ref()).expect_err(&format!("Error case '{}' should fail", ec.trim()));
    }
  }

  #[test]
  fn failed_unmount_is_reported() {
    let dir = tempfile::tempdir().unwrap();

    // Not a mount point, so umount(8) exits non-zero.
    assert!(OsMounter.unmount(dir.path()).is_err());
  }

  #[test_case("DEVNAME=/dev/vdb\nTYPE=ext4\n", Some("ext4") ; "filesystem")]
  #[test_case("DEVNAME=/dev/vdb\nTYPE=xfs\nPTTYPE=dos\n", Some("xfs") ; "filesystem wins over table")]
  #[test_case("DEVNAME=/dev/vdb\nPTTYPE=gpt\n", Some("unknown data, probably partitions") ; "partitions only")]
  #[test_case("", None ; "empty")]
  fn blkid_output(output: &str, expected: Option<&str>) {
    assert_eq!(parse_blkid_output(output).as_deref(), expected);
  }

  #[test_case(&["ro", "discard"], "-t ext4 -o <2 options> /dev/vdb /mnt/target" ; "with options")]
  #[test_case(&[], "-t ext4 /dev/vdb /mnt/target" ; "without options")]
  fn mount_args_keep_options_out_of_log(options: &[&str], expected_log: &str) {
    let options = options.iter().map(|v| v.to_string()).collect::<Vec<_>>();

    let (mount_args, log_str) =
      make_mount_args(Some("/dev/vdb".into()), "/mnt/target".into(), "ext4", &options);

    assert_eq!(log_str, expected_log);
    if !options.is_empty() {
      let opt_arg = mount_args
        .iter()
        .skip_while(|a| **a != OsString::from("-o"))
        .nth(1)
        .cloned();
      assert_eq!(opt_arg, Some(OsString::from(options.join(","))));
      for option in &options {
        assert!(!log_str.contains(option.as_str()), "{:?}", log_str);
      }
    }
    assert_eq!(mount_args.last(), Some(&OsString::from("/mnt/target")));
  }
}
