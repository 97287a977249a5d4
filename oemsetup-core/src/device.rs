use std::fmt;
use std::path::{Path, PathBuf};

/// Represents an internal disk discovered on the system.
///
/// The canonical path is the identity of the disk; two handles with the same
/// canonical path describe the same disk. The alias is the stable
/// `/dev/disk/by-id` name it was found under, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskHandle {
    /// The resolved kernel device path (e.g., `/dev/nvme0n1`).
    pub path: PathBuf,
    /// The by-id link the disk was discovered through (e.g.,
    /// `/dev/disk/by-id/nvme-Samsung_SSD_970_EVO_S46`).
    pub alias: Option<PathBuf>,
}

impl DiskHandle {
    pub fn new(path: impl Into<PathBuf>, alias: Option<PathBuf>) -> Self {
        Self {
            path: path.into(),
            alias,
        }
    }

    /// The alias as a lossy string, for heuristics that match on its name.
    pub fn alias_name(&self) -> Option<String> {
        self.alias
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// The kernel name of the disk (e.g., "sda").
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Path of the `number`th partition node.
    ///
    /// udev creates `<alias>-part<N>` links once the nodes have settled, so
    /// the alias form is used when there is one. Otherwise the kernel naming
    /// rule applies: disks whose name ends in a digit get a `p` separator
    /// (`nvme0n1p1`, `mmcblk0p1`), others do not (`sda1`).
    pub fn partition_path(&self, number: u32) -> PathBuf {
        if let Some(alias) = &self.alias {
            let mut name = alias.as_os_str().to_owned();
            name.push(format!("-part{number}"));
            return PathBuf::from(name);
        }
        kernel_partition_path(&self.path, number)
    }
}

pub(crate) fn kernel_partition_path(disk: &Path, number: u32) -> PathBuf {
    let mut name = disk.as_os_str().to_owned();
    if ends_with_digit(disk) {
        name.push("p");
    }
    name.push(number.to_string());
    PathBuf::from(name)
}

pub(crate) fn ends_with_digit(path: &Path) -> bool {
    path.to_string_lossy()
        .chars()
        .last()
        .is_some_and(|c| c.is_ascii_digit())
}

impl fmt::Display for DiskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let alias = self.alias_name().unwrap_or_else(|| "???".to_string());
        write!(f, "{} ({})", alias, self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_path_prefers_the_by_id_alias() {
        let disk = DiskHandle::new(
            "/dev/sda",
            Some(PathBuf::from("/dev/disk/by-id/ata-ST1000LM035_WL1")),
        );
        assert_eq!(
            disk.partition_path(1),
            PathBuf::from("/dev/disk/by-id/ata-ST1000LM035_WL1-part1")
        );
    }

    #[test]
    fn partition_path_follows_kernel_naming_without_alias() {
        assert_eq!(
            DiskHandle::new("/dev/sda", None).partition_path(1),
            PathBuf::from("/dev/sda1")
        );
        assert_eq!(
            DiskHandle::new("/dev/nvme0n1", None).partition_path(2),
            PathBuf::from("/dev/nvme0n1p2")
        );
    }

    #[test]
    fn display_shows_alias_and_device() {
        let disk = DiskHandle::new("/dev/sdb", Some(PathBuf::from("/dev/disk/by-id/wwn-0x5000")));
        assert_eq!(disk.to_string(), "wwn-0x5000 (/dev/sdb)");
        assert_eq!(DiskHandle::new("/dev/sdb", None).to_string(), "??? (/dev/sdb)");
    }
}
