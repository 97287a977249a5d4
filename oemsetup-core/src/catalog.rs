//! Discovery of the internal disks that will be provisioned.
//!
//! Disks are found through the stable-naming directory (`/dev/disk/by-id`)
//! rather than `/sys/block`, so every disk carries a hardware-identity alias
//! the selection heuristic can look at. The filtering is as follows:
//! 1.  Skip aliases for USB transports (`usb-*`), which covers the live medium
//!     the provisioning run was booted from.
//! 2.  Skip partition aliases (`*-partN`).
//! 3.  Resolve the alias and skip optical drives (`/dev/sr*`).
//! 4.  Deduplicate by canonical path; a disk usually has several aliases
//!     (`ata-*`, `wwn-*`, ...) and the first one in sorted order wins.
use crate::device::DiskHandle;
use crate::error::{ProvisionError, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const USB_PREFIX: &str = "usb-";
const PARTITION_MARKER: &str = "-part";
const OPTICAL_PREFIX: &str = "sr";

/// The disks found by one discovery pass, in discovery order.
///
/// Only [`BlockDeviceCatalog::discover`] and [`DiscoveredDisks::new`] build
/// this type, and both refuse to build an empty one.
#[derive(Clone, Debug)]
pub struct DiscoveredDisks {
    disks: Vec<DiskHandle>,
    source: PathBuf,
}

impl DiscoveredDisks {
    /// Wraps an already-deduplicated list of disks.
    pub fn new(disks: Vec<DiskHandle>, source: impl Into<PathBuf>) -> Result<Self> {
        let source = source.into();
        if disks.is_empty() {
            return Err(ProvisionError::NoDeviceFound { dir: source });
        }
        Ok(Self { disks, source })
    }

    pub fn as_slice(&self) -> &[DiskHandle] {
        &self.disks
    }

    pub fn first(&self) -> &DiskHandle {
        &self.disks[0]
    }

    pub fn len(&self) -> usize {
        self.disks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }

    /// The directory these disks were discovered in.
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DiskHandle> {
        self.disks.iter()
    }
}

impl<'a> IntoIterator for &'a DiscoveredDisks {
    type Item = &'a DiskHandle;
    type IntoIter = std::slice::Iter<'a, DiskHandle>;

    fn into_iter(self) -> Self::IntoIter {
        self.disks.iter()
    }
}

/// Enumerates candidate disks under a stable-naming directory.
#[derive(Clone, Debug)]
pub struct BlockDeviceCatalog {
    dir: PathBuf,
}

impl BlockDeviceCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scans the directory and returns every eligible internal disk.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::NoDeviceFound`] if nothing is left after
    /// filtering, including when the directory itself does not exist (udev
    /// does not create it on systems without any disk).
    pub fn discover(&self) -> Result<DiscoveredDisks> {
        let mut aliases = match fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .collect::<Vec<_>>(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(ProvisionError::io(
                    format!("failed to read {}", self.dir.display()),
                    e,
                ));
            }
        };
        aliases.sort();

        let mut resolved = Vec::with_capacity(aliases.len());
        for alias in aliases {
            if is_excluded_alias(&alias) {
                debug!("skipping {}", alias.display());
                continue;
            }
            match fs::canonicalize(&alias) {
                Ok(path) => resolved.push((alias, path)),
                Err(e) => warn!("cannot resolve {}: {}", alias.display(), e),
            }
        }

        DiscoveredDisks::new(dedup_disks(resolved), &self.dir)
    }
}

/// True for aliases that never denote a whole internal disk.
fn is_excluded_alias(alias: &Path) -> bool {
    let name = alias
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    name.starts_with(USB_PREFIX) || name.contains(PARTITION_MARKER)
}

fn is_optical(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|n| n.to_string_lossy().starts_with(OPTICAL_PREFIX))
}

/// Drops optical drives and keeps the first alias for each canonical path.
fn dedup_disks(resolved: Vec<(PathBuf, PathBuf)>) -> Vec<DiskHandle> {
    let mut seen = HashSet::new();
    let mut disks = Vec::new();
    for (alias, path) in resolved {
        if is_optical(&path) {
            debug!("skipping optical drive {}", path.display());
            continue;
        }
        if !seen.insert(path.clone()) {
            debug!("{} is another alias for {}", alias.display(), path.display());
            continue;
        }
        disks.push(DiskHandle::new(path, Some(alias)));
    }
    disks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    /// Builds a fake `/dev` with the given device nodes and a `by-id`
    /// directory of links `(alias, node)`.
    fn fake_dev(nodes: &[&str], links: &[(&str, &str)]) -> (TempDir, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let by_id = root.path().join("disk/by-id");
        fs::create_dir_all(&by_id).unwrap();
        for node in nodes {
            File::create(root.path().join(node)).unwrap();
        }
        for (alias, node) in links {
            symlink(root.path().join(node), by_id.join(alias)).unwrap();
        }
        (root, by_id)
    }

    fn node(root: &TempDir, name: &str) -> PathBuf {
        fs::canonicalize(root.path().join(name)).unwrap()
    }

    #[test]
    fn excludes_usb_partitions_and_optical_drives() {
        let (root, by_id) = fake_dev(
            &["sda", "sda1", "sdb", "sr0"],
            &[
                ("ata-ST1000LM035_WL1", "sda"),
                ("ata-ST1000LM035_WL1-part1", "sda1"),
                ("usb-SanDisk_Cruzer_4C53", "sdb"),
                ("ata-HL-DT-ST_DVD_K4", "sr0"),
            ],
        );

        let disks = BlockDeviceCatalog::new(&by_id).discover().unwrap();

        assert_eq!(disks.len(), 1);
        assert!(!disks.is_empty());
        assert_eq!(disks.first().path, node(&root, "sda"));
        assert_eq!(disks.first().alias, Some(by_id.join("ata-ST1000LM035_WL1")));
    }

    #[test]
    fn aliases_of_the_same_disk_collapse_into_one_handle() {
        let (root, by_id) = fake_dev(
            &["sda", "nvme0n1"],
            &[
                ("ata-ST1000LM035_WL1", "sda"),
                ("wwn-0x5000c500b1", "sda"),
                ("nvme-Samsung_SSD_970_S46", "nvme0n1"),
                ("nvme-eui.0025385b71", "nvme0n1"),
            ],
        );

        let disks = BlockDeviceCatalog::new(&by_id).discover().unwrap();
        let paths: Vec<_> = disks.iter().map(|d| d.path.clone()).collect();

        assert_eq!(paths, vec![node(&root, "sda"), node(&root, "nvme0n1")]);
        // Sorted order decides which alias represents the disk.
        assert_eq!(
            disks.as_slice()[1].alias,
            Some(by_id.join("nvme-Samsung_SSD_970_S46"))
        );
    }

    #[test]
    fn output_never_exceeds_input() {
        let (_root, by_id) = fake_dev(
            &["sda", "sdb"],
            &[("ata-A", "sda"), ("ata-B", "sdb"), ("wwn-A", "sda")],
        );
        let disks = BlockDeviceCatalog::new(&by_id).discover().unwrap();
        assert!(disks.len() <= 3);
        assert_eq!(disks.len(), 2);
    }

    #[test]
    fn dangling_links_are_skipped() {
        let (_root, by_id) = fake_dev(&["sda"], &[("ata-A", "sda"), ("ata-gone", "sdz")]);
        let disks = BlockDeviceCatalog::new(&by_id).discover().unwrap();
        assert_eq!(disks.len(), 1);
    }

    #[test]
    fn nothing_eligible_is_no_device_found() {
        let (_root, by_id) = fake_dev(&["sdb"], &[("usb-Kingston_DT_1", "sdb")]);
        let err = BlockDeviceCatalog::new(&by_id).discover().unwrap_err();
        assert!(matches!(err, ProvisionError::NoDeviceFound { .. }));
    }

    #[test]
    fn missing_directory_is_no_device_found() {
        let root = tempfile::tempdir().unwrap();
        let err = BlockDeviceCatalog::new(root.path().join("by-id"))
            .discover()
            .unwrap_err();
        assert!(matches!(err, ProvisionError::NoDeviceFound { .. }));
    }
}
