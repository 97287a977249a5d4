//! Clears leftover metadata from disks before they are repartitioned.
//!
//! This is not intended to be secure. It only zeroes the first kilobyte of
//! every partition and of the disk itself, which is where filesystem and LVM
//! signatures live, so that auto-discovery tools (udev, the installer) do not
//! find anything from the previous life of the disk while it is being
//! provisioned.
use crate::device::{DiskHandle, ends_with_digit};
use crate::error::{ProvisionError, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Number of leading bytes zeroed on every device.
pub const WIPE_BYTES: usize = 1024;

/// Returns the partition nodes that currently exist for `disk`, sorted.
///
/// A partition node lives next to the disk node and is named after it with
/// a number appended (`sda1`), or `p` and a number when the disk name itself
/// ends in a digit (`nvme0n1p1`).
pub fn partition_nodes(disk: &Path) -> Result<Vec<PathBuf>> {
    let (Some(dir), Some(name)) = (disk.parent(), disk.file_name()) else {
        return Ok(Vec::new());
    };
    let name = name.to_string_lossy();
    let separator = if ends_with_digit(disk) { "p" } else { "" };
    let prefix = format!("{name}{separator}");

    let entries = fs::read_dir(dir)
        .map_err(|e| ProvisionError::io(format!("failed to read {}", dir.display()), e))?;
    let mut nodes: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let entry_name = entry.file_name();
            let entry_name = entry_name.to_string_lossy();
            entry_name
                .strip_prefix(&prefix)
                .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        })
        .map(|entry| entry.path())
        .collect();
    nodes.sort();
    Ok(nodes)
}

/// Zeroes the leading metadata of one device node. The node must exist.
pub fn wipe_device(path: &Path) -> Result<()> {
    debug!("wiping {}", path.display());
    let mut device = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| ProvisionError::io(format!("failed to open {} for wiping", path.display()), e))?;
    device
        .write_all(&[0u8; WIPE_BYTES])
        .and_then(|_| device.sync_all())
        .map_err(|e| ProvisionError::io(format!("failed to wipe {}", path.display()), e))
}

/// Wipes every partition of `disk`, then the disk itself.
pub fn wipe(disk: &DiskHandle) -> Result<()> {
    info!("Wiping partitions and other meta-data on {}", disk);
    let partitions = partition_nodes(&disk.path)?;
    debug!("{} has partitions {:?}", disk.path.display(), partitions);
    for partition in &partitions {
        wipe_device(partition)?;
    }
    wipe_device(&disk.path)
}
