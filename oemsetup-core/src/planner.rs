//! Partition layouts and the in-memory partition table they are built into.
//!
//! Nothing in this module touches a disk. A [`PartitionTable`] is assembled
//! in memory and only a [`PartitionBackend::commit`] writes it out, replacing
//! whatever table the disk had before. Planning against a disk that is
//! already partitioned is therefore not idempotent: committing the result
//! discards every existing partition.
use crate::error::{ProvisionError, Result};
use std::path::{Path, PathBuf};

/// Size of the rescue partition in bytes.
///
/// The debian-installer leaves a partition of exactly this size alone instead
/// of resizing or replacing it. Do not change it.
pub const RESCUE_PARTITION_BYTES: u64 = 2_099_249_152;

/// First sector of the rescue partition. Starting any earlier makes the
/// installer override the partition.
pub const RESCUE_START_SECTOR: u64 = 2048;

/// Alignment used when the device does not report an optimal I/O size.
const DEFAULT_ALIGNMENT_BYTES: u64 = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilesystemType {
    Ext4,
}

impl FilesystemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilesystemType::Ext4 => "ext4",
        }
    }
}

/// Size and alignment properties of a block device.
///
/// Only built through its constructors, so the sector size and the grain are
/// never zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceGeometry {
    path: PathBuf,
    sector_size: u64,
    length_sectors: u64,
    grain_sectors: u64,
}

impl DeviceGeometry {
    /// Geometry with the default 1 MiB alignment.
    pub fn new(path: impl Into<PathBuf>, sector_size: u64, length_sectors: u64) -> Self {
        Self::with_optimal_io(path, sector_size, length_sectors, 0)
    }

    /// Geometry aligned to the device's optimal I/O size, falling back to
    /// 1 MiB when the device reports none (or one that is not a multiple of
    /// the sector size).
    pub fn with_optimal_io(
        path: impl Into<PathBuf>,
        sector_size: u64,
        length_sectors: u64,
        optimal_io_bytes: u64,
    ) -> Self {
        let sector_size = sector_size.max(1);
        let align = if optimal_io_bytes == 0 || optimal_io_bytes % sector_size != 0 {
            DEFAULT_ALIGNMENT_BYTES
        } else {
            optimal_io_bytes
        };
        Self {
            path: path.into(),
            sector_size,
            length_sectors,
            grain_sectors: (align / sector_size).max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical sector size in bytes.
    pub fn sector_size(&self) -> u64 {
        self.sector_size
    }

    /// Number of addressable sectors.
    pub fn length_sectors(&self) -> u64 {
        self.length_sectors
    }

    /// Optimal alignment for partition starts, in sectors.
    pub fn grain_sectors(&self) -> u64 {
        self.grain_sectors
    }

    pub fn size_bytes(&self) -> u64 {
        self.length_sectors * self.sector_size
    }

    fn check(&self, start: u64, length: u64) -> Result<()> {
        let fits = length > 0
            && start
                .checked_add(length)
                .is_some_and(|end| end <= self.length_sectors);
        if fits {
            Ok(())
        } else {
            Err(ProvisionError::PlanOutOfRange {
                device: self.path.clone(),
                start,
                length,
                device_sectors: self.length_sectors,
            })
        }
    }
}

/// A single partition, in sectors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionSpec {
    pub start_sector: u64,
    pub length_sectors: u64,
    pub filesystem: FilesystemType,
    pub bootable: bool,
}

impl PartitionSpec {
    /// The last sector that belongs to the partition.
    pub fn end_sector(&self) -> u64 {
        self.start_sector + self.length_sectors - 1
    }
}

/// Converts a byte count to whole sectors, rounding to the nearest sector.
/// A sector size of zero counts as one byte.
pub fn bytes_to_sectors(bytes: u64, sector_size: u64) -> u64 {
    let sector_size = sector_size.max(1);
    (bytes + sector_size / 2) / sector_size
}

/// The bootable rescue partition that receives the installer payload.
pub fn plan_primary(geometry: &DeviceGeometry) -> Result<PartitionSpec> {
    let length = bytes_to_sectors(RESCUE_PARTITION_BYTES, geometry.sector_size);
    geometry.check(RESCUE_START_SECTOR, length)?;
    Ok(PartitionSpec {
        start_sector: RESCUE_START_SECTOR,
        length_sectors: length,
        filesystem: FilesystemType::Ext4,
        bootable: true,
    })
}

/// One partition over the whole remaining disk, for immediate use.
pub fn plan_secondary(geometry: &DeviceGeometry) -> Result<PartitionSpec> {
    let length = geometry.length_sectors.saturating_sub(1);
    geometry.check(1, length)?;
    Ok(PartitionSpec {
        start_sector: 1,
        length_sectors: length,
        filesystem: FilesystemType::Ext4,
        bootable: false,
    })
}

/// A fresh msdos partition table, held in memory until committed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionTable {
    geometry: DeviceGeometry,
    partitions: Vec<PartitionSpec>,
}

impl PartitionTable {
    /// An empty table for `geometry`. Existing partitions on the device are
    /// not read; they are lost once this table is committed.
    pub fn msdos(geometry: &DeviceGeometry) -> Self {
        Self {
            geometry: geometry.clone(),
            partitions: Vec::new(),
        }
    }

    pub fn label(&self) -> &'static str {
        "msdos"
    }

    pub fn geometry(&self) -> &DeviceGeometry {
        &self.geometry
    }

    pub fn partitions(&self) -> &[PartitionSpec] {
        &self.partitions
    }

    /// Adds a partition under the device's optimal alignment constraint.
    ///
    /// The start is moved up to the next alignment boundary while the end
    /// stays put, so the partition can only shrink. Returns the partition as
    /// it will be written.
    pub fn add_partition(&mut self, spec: PartitionSpec) -> Result<&PartitionSpec> {
        self.geometry.check(spec.start_sector, spec.length_sectors)?;
        let grain = self.geometry.grain_sectors;
        let end = spec.end_sector();
        let start = spec.start_sector.div_ceil(grain) * grain;
        if start > end {
            return Err(ProvisionError::PlanOutOfRange {
                device: self.geometry.path.clone(),
                start,
                length: 0,
                device_sectors: self.geometry.length_sectors,
            });
        }
        self.partitions.push(PartitionSpec {
            start_sector: start,
            length_sectors: end - start + 1,
            ..spec
        });
        Ok(&self.partitions[self.partitions.len() - 1])
    }
}

/// Access to a device's partition table.
///
/// Production code talks to the kernel and `parted`; tests record commits
/// in memory instead.
pub trait PartitionBackend {
    /// Reads the geometry of the block device at `disk`.
    fn probe(&self, disk: &Path) -> Result<DeviceGeometry>;

    /// Writes `table` to its device, replacing any existing table.
    fn commit(&self, table: &PartitionTable) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const SSD_500G: u64 = 976_773_168;

    #[test]
    fn rescue_partition_matches_the_installer_size() {
        let geometry = DeviceGeometry::new("/dev/sda", 512, SSD_500G);
        let spec = plan_primary(&geometry).unwrap();
        assert_eq!(spec.start_sector, 2048);
        assert_eq!(spec.length_sectors, 4_100_096);
        assert_eq!(spec.length_sectors * 512, RESCUE_PARTITION_BYTES);
        assert!(spec.bootable);
        assert_eq!(spec.filesystem, FilesystemType::Ext4);
    }

    #[test]
    fn rescue_partition_is_sized_in_device_sectors() {
        let geometry = DeviceGeometry::new("/dev/nvme0n1", 4096, SSD_500G / 8);
        let spec = plan_primary(&geometry).unwrap();
        assert_eq!(spec.start_sector, 2048);
        assert_eq!(spec.length_sectors, 512_512);
    }

    #[test]
    fn rescue_partition_ignores_disk_size() {
        let small = plan_primary(&DeviceGeometry::new("/dev/sda", 512, 8_000_000)).unwrap();
        let large = plan_primary(&DeviceGeometry::new("/dev/sda", 512, 7_814_037_168)).unwrap();
        assert_eq!(small, large);
    }

    #[test]
    fn disk_too_small_for_rescue_partition() {
        let geometry = DeviceGeometry::new("/dev/mmcblk0", 512, 4_000_000);
        let err = plan_primary(&geometry).unwrap_err();
        assert!(matches!(err, ProvisionError::PlanOutOfRange { .. }));
    }

    #[test]
    fn secondary_spans_the_rest_of_the_disk() {
        let geometry = DeviceGeometry::new("/dev/sdb", 512, SSD_500G);
        let spec = plan_secondary(&geometry).unwrap();
        assert_eq!(spec.start_sector, 1);
        assert_eq!(spec.length_sectors, SSD_500G - 1);
        assert_eq!(spec.end_sector(), SSD_500G - 1);
        assert!(!spec.bootable);
    }

    #[test]
    fn rounding_goes_to_the_nearest_sector() {
        assert_eq!(bytes_to_sectors(1023, 512), 2);
        assert_eq!(bytes_to_sectors(767, 512), 1);
        assert_eq!(bytes_to_sectors(768, 512), 2);
    }

    #[test]
    fn zero_sector_size_does_not_divide_by_zero() {
        assert_eq!(bytes_to_sectors(RESCUE_PARTITION_BYTES, 0), RESCUE_PARTITION_BYTES);

        let geometry = DeviceGeometry::new("/dev/sda", 0, SSD_500G);
        assert_eq!(geometry.sector_size(), 1);
        assert_eq!(geometry.grain_sectors(), 1024 * 1024);
        let err = plan_primary(&geometry).unwrap_err();
        assert!(matches!(err, ProvisionError::PlanOutOfRange { .. }));
    }

    #[test]
    fn aligned_partition_is_kept_as_planned() {
        let geometry = DeviceGeometry::new("/dev/sda", 512, SSD_500G);
        let mut table = PartitionTable::msdos(&geometry);
        let planned = plan_primary(&geometry).unwrap();
        let added = table.add_partition(planned.clone()).unwrap();
        assert_eq!(*added, planned);
    }

    #[test]
    fn misaligned_start_moves_to_the_next_boundary() {
        let geometry = DeviceGeometry::new("/dev/sdb", 512, SSD_500G);
        let mut table = PartitionTable::msdos(&geometry);
        let added = table
            .add_partition(plan_secondary(&geometry).unwrap())
            .unwrap()
            .clone();
        assert_eq!(added.start_sector, 2048);
        assert_eq!(added.end_sector(), SSD_500G - 1);
    }

    #[test]
    fn optimal_io_size_sets_the_grain() {
        let geometry = DeviceGeometry::with_optimal_io("/dev/sdc", 512, SSD_500G, 4 * 1024 * 1024);
        assert_eq!(geometry.grain_sectors(), 8192);
        let odd = DeviceGeometry::with_optimal_io("/dev/sdc", 4096, SSD_500G, 6144);
        assert_eq!(odd.grain_sectors(), 256);
    }

    #[test]
    fn fresh_table_starts_empty() {
        let geometry = DeviceGeometry::new("/dev/sda", 512, SSD_500G);
        assert!(PartitionTable::msdos(&geometry).partitions().is_empty());
    }
}
