//! CSI driver exposing disks of the virtualization control plane as
//! volumes. One [`Driver`] serves the Identity, Controller and Node
//! services.

pub mod config;
mod controller;
mod driver;
mod error;
pub mod health;
mod node;
pub mod server;

#[cfg(test)]
mod testing;

pub use driver::{Driver, DRIVER_NAME, MAX_VOLUMES_PER_NODE};
