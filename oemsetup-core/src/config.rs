//! Run configuration and the on-disk layout of the installer payload.
use crate::runner::DEFAULT_COMMAND_TIMEOUT;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DISK_ID_DIR: &str = "/dev/disk/by-id";
pub const DEFAULT_DATA_DIR: &str = "/var/lib/pureos-oem";

/// Files copied verbatim into the staging directory.
pub const PAYLOAD_FILES: [&str; 3] = ["pureos.iso", "initrd.gz", "vmlinuz"];
/// Bootloader files copied into `<staging>/boot/grub`.
pub const GRUB_FILES: [&str; 2] = ["grub.cfg", "loopback.cfg"];
pub const ANSWER_FILE_TEMPLATE: &str = "di-preseed.cfg.in";
pub const ANSWER_FILE: &str = "di-preseed.cfg";
/// Label of the filesystem on the rescue partition.
pub const RESCUE_LABEL: &str = "rescue";

/// What happens once the payload has been staged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerAction {
    /// Ask on the console, defaulting to power off.
    #[default]
    Ask,
    PowerOff,
    /// Leave the system running.
    None,
}

#[derive(Clone, Debug)]
pub struct ProvisionConfig {
    /// Stable-naming directory disks are discovered in.
    pub disk_id_dir: PathBuf,
    /// Read-only directory holding the installer payload.
    pub data_dir: PathBuf,
    /// Mount point the rescue partition is staged at.
    pub staging_dir: PathBuf,
    /// Upper bound for every external command.
    pub command_timeout: Duration,
    /// Passed to `udevadm settle`.
    pub settle_timeout: Duration,
    /// Hash every staged copy against its source.
    pub verify: bool,
    pub power: PowerAction,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self::with_data_dir(DEFAULT_DATA_DIR)
    }
}

impl ProvisionConfig {
    /// Defaults for a payload in `data_dir`, staged at `<data_dir>/target`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            disk_id_dir: PathBuf::from(DEFAULT_DISK_ID_DIR),
            staging_dir: data_dir.join("target"),
            data_dir,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            settle_timeout: Duration::from_secs(120),
            verify: true,
            power: PowerAction::Ask,
        }
    }

    pub fn payload_sources(&self) -> impl Iterator<Item = PathBuf> + '_ {
        PAYLOAD_FILES.iter().map(|f| self.data_dir.join(f))
    }

    pub fn grub_sources(&self) -> impl Iterator<Item = PathBuf> + '_ {
        GRUB_FILES.iter().map(|f| self.data_dir.join("grub").join(f))
    }

    pub fn answer_file_template(&self) -> PathBuf {
        self.data_dir.join(ANSWER_FILE_TEMPLATE)
    }

    pub fn answer_file(&self) -> PathBuf {
        self.staging_dir.join(ANSWER_FILE)
    }

    pub fn boot_dir(&self) -> PathBuf {
        self.staging_dir.join("boot")
    }

    pub fn grub_dir(&self) -> PathBuf {
        self.boot_dir().join("grub")
    }

    /// Every input file a run needs, for checking before anything is wiped.
    pub fn required_sources(&self) -> Vec<PathBuf> {
        let mut sources: Vec<PathBuf> = self.payload_sources().collect();
        sources.push(self.answer_file_template());
        sources.extend(self.grub_sources());
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_layout_hangs_off_the_data_dir() {
        let config = ProvisionConfig::default();
        assert_eq!(config.staging_dir, PathBuf::from("/var/lib/pureos-oem/target"));
        assert_eq!(config.grub_dir(), PathBuf::from("/var/lib/pureos-oem/target/boot/grub"));
        assert_eq!(
            config.answer_file_template(),
            PathBuf::from("/var/lib/pureos-oem/di-preseed.cfg.in")
        );
        assert_eq!(config.required_sources().len(), 6);
    }
}
