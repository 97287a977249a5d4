//! Contains the provisioning sequence itself.
//!
//! The sequence is strictly linear:
//! 1.  Discover the internal disks and pick the primary one.
//! 2.  Check that the installer payload is complete.
//! 3.  Wipe, partition and format the primary disk (rescue partition).
//! 4.  Wipe, partition and format every secondary disk (whole disk).
//! 5.  Mount the rescue partition and stage the payload, the answer file and
//!     the GRUB configuration on it.
//! 6.  Install GRUB to the primary disk and unmount.
//!
//! Any failure aborts the run on the spot. Nothing is retried or rolled
//! back: a half-provisioned machine is re-flashed, not repaired.
use crate::catalog::BlockDeviceCatalog;
use crate::config::{ProvisionConfig, RESCUE_LABEL};
use crate::device::DiskHandle;
use crate::error::Result;
use crate::planner::{
    DeviceGeometry, PartitionBackend, PartitionSpec, PartitionTable, plan_primary, plan_secondary,
};
use crate::runner::{CommandRunner, Operation};
use crate::selector::ProvisioningPlan;
use crate::{staging, wiper};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, info_span};

/// A step of the provisioning sequence, reported before it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    CheckPayload,
    PartitionPrimary(PathBuf),
    PartitionSecondary(PathBuf),
    Mount,
    CopyPayload,
    ConfigureAnswerFile,
    ConfigureBootloader,
    InstallBootloader,
    Unmount,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::CheckPayload => write!(f, "Checking installer files"),
            Stage::PartitionPrimary(disk) => {
                write!(f, "Partitioning primary disk {}", disk.display())
            }
            Stage::PartitionSecondary(disk) => {
                write!(f, "Partitioning secondary disk {}", disk.display())
            }
            Stage::Mount => write!(f, "Mounting main disk"),
            Stage::CopyPayload => write!(f, "Copying install files"),
            Stage::ConfigureAnswerFile => write!(f, "Configuring installer"),
            Stage::ConfigureBootloader => write!(f, "Creating GRUB configuration"),
            Stage::InstallBootloader => write!(f, "Installing GRUB"),
            Stage::Unmount => write!(f, "Unmounting main disk"),
        }
    }
}

/// What a completed run did.
#[derive(Clone, Debug)]
pub struct ProvisionReport {
    pub plan: ProvisioningPlan,
    /// The rescue partition node that was mounted and staged.
    pub rescue_partition: PathBuf,
    /// Every file written to the staging directory.
    pub staged: Vec<PathBuf>,
}

/// Drives a provisioning run.
pub struct Provisioner<'a, R, B> {
    config: &'a ProvisionConfig,
    runner: &'a R,
    backend: &'a B,
}

impl<'a, R, B> Provisioner<'a, R, B>
where
    R: CommandRunner,
    B: PartitionBackend,
{
    pub fn new(config: &'a ProvisionConfig, runner: &'a R, backend: &'a B) -> Self {
        Self {
            config,
            runner,
            backend,
        }
    }

    /// Finds the disks and decides which one is primary. Touches nothing.
    ///
    /// # Errors
    ///
    /// [`ProvisionError::NoDeviceFound`] if there is no eligible disk.
    ///
    /// [`ProvisionError::NoDeviceFound`]: crate::error::ProvisionError::NoDeviceFound
    pub fn discover(&self) -> Result<ProvisioningPlan> {
        let disks = BlockDeviceCatalog::new(&self.config.disk_id_dir).discover()?;
        let plan = ProvisioningPlan::new(&disks);
        info!(
            "Found disks: {:?}",
            disks.iter().map(|d| d.to_string()).collect::<Vec<_>>()
        );
        info!("Determined primary disk: {}", plan.primary);
        Ok(plan)
    }

    /// Discovers the disks and provisions them.
    pub fn run(&self, on_stage: impl FnMut(&Stage)) -> Result<ProvisionReport> {
        let plan = self.discover()?;
        self.execute(plan, on_stage)
    }

    /// Provisions the disks of `plan`.
    ///
    /// `on_stage` is called before each stage starts, so a front-end can
    /// show where the run is.
    pub fn execute(
        &self,
        plan: ProvisioningPlan,
        mut on_stage: impl FnMut(&Stage),
    ) -> Result<ProvisionReport> {
        on_stage(&Stage::CheckPayload);
        for source in self.config.required_sources() {
            staging::require_file(&source)?;
        }

        on_stage(&Stage::PartitionPrimary(plan.primary.path.clone()));
        let rescue_partition = self.prepare_primary(&plan.primary)?;

        for disk in &plan.secondaries {
            on_stage(&Stage::PartitionSecondary(disk.path.clone()));
            self.prepare_secondary(disk)?;
        }

        let staging_dir = &self.config.staging_dir;
        on_stage(&Stage::Mount);
        info!("Mounting main disk...");
        staging::ensure_dir(staging_dir)?;
        self.runner.run(&Operation::Mount {
            device: rescue_partition.clone(),
            target: staging_dir.clone(),
        })?;

        on_stage(&Stage::CopyPayload);
        info!("Copying install files...");
        let mut staged = Vec::new();
        for source in self.config.payload_sources() {
            staged.push(staging::copy_into(&source, staging_dir, self.config.verify)?);
        }

        on_stage(&Stage::ConfigureAnswerFile);
        let answer_file = self.config.answer_file();
        staging::configure_answer_file(
            &self.config.answer_file_template(),
            &answer_file,
            &plan.primary.path,
        )?;
        staged.push(answer_file);

        on_stage(&Stage::ConfigureBootloader);
        info!("Creating GRUB configuration...");
        let grub_dir = self.config.grub_dir();
        staging::ensure_dir(&grub_dir)?;
        for source in self.config.grub_sources() {
            staged.push(staging::copy_into(&source, &grub_dir, self.config.verify)?);
        }

        on_stage(&Stage::InstallBootloader);
        info!("Installing GRUB...");
        self.runner.run(&Operation::InstallBootloader {
            disk: plan.primary.path.clone(),
            boot_dir: self.config.boot_dir(),
        })?;

        on_stage(&Stage::Unmount);
        self.runner.run(&Operation::Unmount {
            target: staging_dir.clone(),
        })?;
        info!("Done.");

        Ok(ProvisionReport {
            plan,
            rescue_partition,
            staged,
        })
    }

    /// Creates and formats the rescue partition. Returns its node.
    fn prepare_primary(&self, disk: &DiskHandle) -> Result<PathBuf> {
        let _span = info_span!("primary", disk = %disk.path.display()).entered();
        info!("Partitioning primary disk {}...", disk);
        let partition = self.repartition(disk, plan_primary)?;
        self.runner.run(&Operation::MakeExt4 {
            device: partition.clone(),
        })?;
        self.runner.run(&Operation::SetLabel {
            device: partition.clone(),
            label: RESCUE_LABEL.to_string(),
        })?;
        Ok(partition)
    }

    /// Turns a secondary disk into one big ext4 partition.
    fn prepare_secondary(&self, disk: &DiskHandle) -> Result<()> {
        let _span = info_span!("secondary", disk = %disk.path.display()).entered();
        info!("Partitioning secondary disk {}...", disk);
        let partition = self.repartition(disk, plan_secondary)?;
        self.runner.run(&Operation::MakeExt4 { device: partition })
    }

    /// Plans a single partition for `disk`, wipes the disk, commits a fresh
    /// table and waits for the new partition node.
    ///
    /// The plan is computed first so that a disk the layout does not fit on
    /// is rejected before it is wiped.
    fn repartition(
        &self,
        disk: &DiskHandle,
        plan: fn(&DeviceGeometry) -> Result<PartitionSpec>,
    ) -> Result<PathBuf> {
        let geometry = self.backend.probe(&disk.path)?;
        let mut table = PartitionTable::msdos(&geometry);
        let partition = table.add_partition(plan(&geometry)?)?;
        debug!("planned {:?}", partition);

        wiper::wipe(disk)?;
        self.backend.commit(&table)?;
        self.runner.run(&Operation::SettleDevices {
            timeout: self.config.settle_timeout,
        })?;
        Ok(disk.partition_path(1))
    }

    pub fn power_off(&self) -> Result<()> {
        self.runner.run(&Operation::PowerOff)
    }

    pub fn reboot(&self) -> Result<()> {
        self.runner.run(&Operation::Reboot)
    }
}
