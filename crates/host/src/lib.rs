//! Client for the virtualization control plane that backs every volume.
//!
//! Volumes are `VirtualMachineDisk` resources and node attachments are
//! `VirtualMachineBlockDeviceAttachment` resources. Both are reconciled
//! remotely; operations here only submit intent and then poll until the
//! remote `status.phase` reports convergence.

pub mod client;
pub mod fake;
pub mod quantity;
pub mod resources;
mod store;
pub mod wait;

pub use client::{Attachment, Disk, HostClient};
pub use store::{ObjectStore, StoreError};
pub use wait::{wait_for, DEFAULT_WAIT_INTERVAL};

use std::result;
use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("disk already deleted")]
  DiskAlreadyDeleted,

  #[error("attachment already deleted")]
  AttachmentAlreadyDeleted,

  #[error("attachment not found")]
  AttachmentNotFound,

  #[error("disk not found")]
  DiskNotFound,

  #[error("virtual machine not found")]
  MachineNotFound,

  #[error("more attachments found than expected: please report a bug")]
  AmbiguousAttachment,

  #[error("invalid quantity: {0:?}")]
  InvalidQuantity(String),

  #[error("unexpected state: {0}")]
  UnexpectedState(String),

  #[error("operation cancelled")]
  Cancelled,

  #[error(transparent)]
  Store(#[from] StoreError),
}

impl Error {
  /// Whether the error reports an absent resource.
  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      Error::AttachmentNotFound
        | Error::DiskNotFound
        | Error::MachineNotFound
        | Error::Store(StoreError::NotFound)
    )
  }
}
