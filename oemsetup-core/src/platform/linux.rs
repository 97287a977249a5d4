use crate::error::{ProvisionError, Result};
use crate::planner::{DeviceGeometry, PartitionBackend, PartitionTable};
use crate::runner::{CommandRunner, Operation, SystemRunner};
use nix::{ioctl_read, ioctl_read_bad, request_code_none};
use std::fs::{self, File};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

ioctl_read!(blkgetsize64, 0x12, 114, u64);
ioctl_read_bad!(blksszget, request_code_none!(0x12, 104), libc::c_int);

/// Helper to read a specific file from the /sys/block filesystem.
fn read_sys_file(device_name: &str, file: &str) -> io::Result<String> {
    let path = PathBuf::from("/sys/block").join(device_name).join(file);
    fs::read_to_string(path).map(|s| s.trim().to_string())
}

/// Partition tables on real disks.
///
/// Geometry comes from the block device ioctls and sysfs, the same values
/// libparted bases its optimal alignment on. Tables are written by `parted`,
/// with the partitions already aligned.
#[derive(Clone, Debug, Default)]
pub struct LinuxBackend {
    runner: SystemRunner,
}

impl LinuxBackend {
    pub fn new(runner: SystemRunner) -> Self {
        Self { runner }
    }
}

impl PartitionBackend for LinuxBackend {
    fn probe(&self, disk: &Path) -> Result<DeviceGeometry> {
        let probe_err =
            |e: io::Error| ProvisionError::io(format!("failed to query {}", disk.display()), e);

        let device = File::open(disk).map_err(probe_err)?;
        let fd = device.as_raw_fd();
        let mut size_bytes: u64 = 0;
        let mut sector_size: libc::c_int = 0;
        unsafe {
            blkgetsize64(fd, &mut size_bytes).map_err(|e| probe_err(e.into()))?;
            blksszget(fd, &mut sector_size).map_err(|e| probe_err(e.into()))?;
        }
        let sector_size = u64::try_from(sector_size)
            .ok()
            .filter(|&s| s > 0)
            .ok_or_else(|| probe_err(io::Error::from(io::ErrorKind::InvalidData)))?;

        // sysfs is keyed by kernel name, which is also the canonical node name.
        let name = disk
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let optimal_io = read_sys_file(&name, "queue/optimal_io_size")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let geometry =
            DeviceGeometry::with_optimal_io(disk, sector_size, size_bytes / sector_size, optimal_io);
        debug!("probed {:?}", geometry);
        Ok(geometry)
    }

    fn commit(&self, table: &PartitionTable) -> Result<()> {
        self.runner.run(&Operation::WritePartitionTable {
            disk: table.geometry().path().to_path_buf(),
            table: table.clone(),
        })
    }
}
