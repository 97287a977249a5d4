//! Picks the disk that hosts the installer payload.
use crate::catalog::DiscoveredDisks;
use crate::device::DiskHandle;
use std::fmt;

const SSD_MARKER: &str = "_ssd_";
const NVME_MARKER: &str = "nvme";

/// Returns the primary disk.
///
/// There is no reliable way to tell an SSD from a spinning disk across the
/// hardware this runs on, so the by-id alias is matched instead: the first
/// NVMe disk wins outright, otherwise the last disk whose alias mentions an
/// SSD, otherwise the first disk discovered.
pub fn select(disks: &DiscoveredDisks) -> &DiskHandle {
    let mut primary = disks.first();
    for disk in disks {
        let Some(alias) = disk.alias_name().map(|a| a.to_lowercase()) else {
            continue;
        };
        if alias.contains(SSD_MARKER) {
            primary = disk;
        }
        if alias.contains(NVME_MARKER) {
            primary = disk;
            break;
        }
    }
    primary
}

/// The disks a provisioning run will touch, with the primary singled out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisioningPlan {
    pub primary: DiskHandle,
    /// Every other disk, in discovery order.
    pub secondaries: Vec<DiskHandle>,
}

impl ProvisioningPlan {
    pub fn new(disks: &DiscoveredDisks) -> Self {
        let primary = select(disks).clone();
        let secondaries = disks
            .iter()
            .filter(|d| d.path != primary.path)
            .cloned()
            .collect();
        Self {
            primary,
            secondaries,
        }
    }
}

impl fmt::Display for ProvisioningPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "primary {}", self.primary)?;
        for disk in &self.secondaries {
            write!(f, ", secondary {}", disk)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn disk(dev: &str, alias: &str) -> DiskHandle {
        DiskHandle::new(
            format!("/dev/{dev}"),
            Some(PathBuf::from(format!("/dev/disk/by-id/{alias}"))),
        )
    }

    fn disks(list: Vec<DiskHandle>) -> DiscoveredDisks {
        DiscoveredDisks::new(list, "/dev/disk/by-id").unwrap()
    }

    #[test]
    fn nvme_beats_ssd_and_default() {
        let set = disks(vec![
            disk("sda", "ata-ST1000LM035_WL1"),
            disk("sdb", "ata-Samsung_SSD_860_EVO_S3Z"),
            disk("nvme0n1", "nvme-WDC_PC_SN520_1834"),
        ]);
        assert_eq!(select(&set).path, PathBuf::from("/dev/nvme0n1"));
    }

    #[test]
    fn ssd_beats_default() {
        let set = disks(vec![
            disk("sda", "ata-ST1000LM035_WL1"),
            disk("sdb", "ata-Samsung_SSD_860_EVO_S3Z"),
        ]);
        assert_eq!(select(&set).path, PathBuf::from("/dev/sdb"));
    }

    #[test]
    fn single_disk_is_selected() {
        let set = disks(vec![disk("sda", "ata-ST1000LM035_WL1")]);
        assert_eq!(select(&set).path, PathBuf::from("/dev/sda"));
    }

    #[test]
    fn first_nvme_stops_the_scan() {
        let set = disks(vec![
            disk("nvme0n1", "nvme-First"),
            disk("nvme1n1", "nvme-Second"),
            disk("sda", "ata-Crucial_SSD_MX500"),
        ]);
        assert_eq!(select(&set).path, PathBuf::from("/dev/nvme0n1"));
    }

    #[test]
    fn disks_without_alias_are_only_a_default() {
        let set = disks(vec![
            DiskHandle::new("/dev/vda", None),
            disk("sdb", "ata-Intel_SSD_520"),
        ]);
        assert_eq!(select(&set).path, PathBuf::from("/dev/sdb"));
    }

    #[test]
    fn plan_keeps_secondaries_in_discovery_order() {
        let set = disks(vec![
            disk("sda", "ata-A"),
            disk("nvme0n1", "nvme-B"),
            disk("sdb", "ata-C"),
        ]);
        let plan = ProvisioningPlan::new(&set);
        assert_eq!(plan.primary.path, PathBuf::from("/dev/nvme0n1"));
        let rest: Vec<_> = plan.secondaries.iter().map(|d| d.name()).collect();
        assert_eq!(rest, vec!["sda", "sdb"]);
    }
}
