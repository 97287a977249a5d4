//! The error taxonomy shared by every provisioning stage.
//!
//! None of these errors is retried. A provisioning run that hits any of them
//! stops where it is and leaves the disks as they are.
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// No eligible internal disk was found under the stable-naming directory.
    #[error("no hard disk found on this system (searched {})", .dir.display())]
    NoDeviceFound { dir: PathBuf },

    /// A privileged external command exited unsuccessfully.
    #[error("`{command}` failed with {status}")]
    ExternalCommand { command: String, status: String },

    #[error("`{command}` did not finish within {}s and was killed", .timeout.as_secs())]
    CommandTimeout { command: String, timeout: Duration },

    #[error("could not start `{command}`")]
    CommandSpawn {
        command: String,
        #[source]
        source: io::Error,
    },

    /// An installer asset expected in the data directory is absent.
    #[error("installer asset {} is missing", .path.display())]
    MissingSourceFile { path: PathBuf },

    #[error(
        "partition at sector {start} with {length} sectors does not fit on {} ({device_sectors} sectors)",
        .device.display()
    )]
    PlanOutOfRange {
        device: PathBuf,
        start: u64,
        length: u64,
        device_sectors: u64,
    },

    #[error("staged copy {} does not match its source", .path.display())]
    VerificationFailed { path: PathBuf },

    #[error("{} exists but is not a directory", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl ProvisionError {
    /// Wraps an I/O error with a description of what was being attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        ProvisionError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_operation() {
        let err = ProvisionError::ExternalCommand {
            command: "mkfs.ext4 -F /dev/sda1".into(),
            status: "exit status: 1".into(),
        };
        assert_eq!(err.to_string(), "`mkfs.ext4 -F /dev/sda1` failed with exit status: 1");

        let err = ProvisionError::MissingSourceFile {
            path: PathBuf::from("/var/lib/pureos-oem/vmlinuz"),
        };
        assert!(err.to_string().contains("/var/lib/pureos-oem/vmlinuz"));
    }
}
