//! Runs the privileged external operations of a provisioning run.
//!
//! Every operation the orchestrator needs from the outside world is one
//! [`Operation`] variant. A [`CommandRunner`] turns it into a process and
//! reports failure; [`SystemRunner`] is the real one, tests substitute a
//! recorder.
use crate::error::{ProvisionError, Result};
use crate::planner::PartitionTable;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// How often a running command is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Default upper bound for a single external command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// A privileged operation performed by an external program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Wait for udev to finish creating or removing device nodes.
    SettleDevices { timeout: Duration },
    /// Write a fresh msdos partition table to `disk`.
    WritePartitionTable { disk: PathBuf, table: PartitionTable },
    MakeExt4 { device: PathBuf },
    SetLabel { device: PathBuf, label: String },
    Mount { device: PathBuf, target: PathBuf },
    Unmount { target: PathBuf },
    /// Install GRUB to the boot sector of `disk`, with its files under
    /// `boot_dir`.
    InstallBootloader { disk: PathBuf, boot_dir: PathBuf },
    PowerOff,
    Reboot,
}

impl Operation {
    /// The command line that carries out this operation.
    pub fn command(&self) -> CommandLine {
        match self {
            Operation::SettleDevices { timeout } => CommandLine::new("udevadm")
                .arg("settle")
                .arg(format!("--timeout={}", timeout.as_secs())),
            Operation::WritePartitionTable { disk, table } => {
                let mut cmd = CommandLine::new("parted")
                    .arg("--script")
                    .arg("--align")
                    .arg("none")
                    .arg(disk)
                    .arg("unit")
                    .arg("s")
                    .arg("mklabel")
                    .arg(table.label());
                for (index, partition) in table.partitions().iter().enumerate() {
                    cmd = cmd
                        .arg("mkpart")
                        .arg("primary")
                        .arg(partition.filesystem.as_str())
                        .arg(format!("{}s", partition.start_sector))
                        .arg(format!("{}s", partition.end_sector()));
                    if partition.bootable {
                        cmd = cmd.arg("set").arg((index + 1).to_string()).arg("boot").arg("on");
                    }
                }
                cmd
            }
            Operation::MakeExt4 { device } => CommandLine::new("mkfs.ext4").arg("-F").arg(device),
            Operation::SetLabel { device, label } => {
                CommandLine::new("e2label").arg(device).arg(label)
            }
            Operation::Mount { device, target } => {
                CommandLine::new("mount").arg(device).arg(target)
            }
            Operation::Unmount { target } => CommandLine::new("umount").arg(target),
            Operation::InstallBootloader { disk, boot_dir } => {
                let mut boot_arg = OsString::from("--boot-directory=");
                boot_arg.push(boot_dir);
                CommandLine::new("grub-install").arg(disk).arg(boot_arg)
            }
            Operation::PowerOff => CommandLine::new("systemctl").arg("poweroff"),
            Operation::Reboot => CommandLine::new("systemctl").arg("reboot"),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.command().fmt(f)
    }
}

/// A program and its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<OsString>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Executes operations and fails on unsuccessful completion.
pub trait CommandRunner {
    fn run(&self, op: &Operation) -> Result<()>;
}

/// Runs operations as child processes, each bounded by a timeout.
///
/// Children are started in their own process group, so a Ctrl+C on the
/// console does not interrupt a half-written partition table or filesystem.
/// On timeout the whole group is killed.
#[derive(Clone, Debug)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs an arbitrary command line under this runner's timeout.
    pub fn run_command(&self, cmd: &CommandLine) -> Result<()> {
        debug!("running `{}`", cmd);
        let mut command = Command::new(&cmd.program);
        command.args(&cmd.args).stdin(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| ProvisionError::CommandSpawn {
            command: cmd.to_string(),
            source,
        })?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let polled = child.try_wait().map_err(|e| {
                ProvisionError::io(format!("failed to wait for `{}`", cmd), e)
            })?;
            if let Some(status) = polled {
                if status.success() {
                    return Ok(());
                }
                error!("`{}` failed with {}", cmd, status);
                return Err(ProvisionError::ExternalCommand {
                    command: cmd.to_string(),
                    status: status.to_string(),
                });
            }
            if Instant::now() >= deadline {
                error!("`{}` timed out after {}s", cmd, self.timeout.as_secs());
                kill(&mut child);
                return Err(ProvisionError::CommandTimeout {
                    command: cmd.to_string(),
                    timeout: self.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, op: &Operation) -> Result<()> {
        self.run_command(&op.command())
    }
}

/// Kills a timed-out child and everything it spawned, then reaps it.
fn kill(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;
        // The child leads its own group, see `run_command`.
        let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }
    let _ = child.wait();
}
