//! Provides platform-specific functionality.
//!
//! This module contains the production [`PartitionBackend`] implementation,
//! which needs to ask the kernel about block device geometry and write
//! partition tables to real disks.
//!
//! It uses conditional compilation (`#[cfg]`) to expose the implementation for
//! the target OS. Provisioning only runs from a Linux installer environment,
//! so Linux is the only platform with an implementation.
//!
//! [`PartitionBackend`]: crate::planner::PartitionBackend

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
pub use self::linux::*;
