//! The core, UI-agnostic library for the `oemsetup` provisioning tool.
//!
//! `oemsetup-core` turns a factory-preloaded machine into one that boots an
//! OS installer: it finds the internal disks, repartitions them, stages the
//! installer payload on a rescue partition and installs GRUB to boot it. It
//! is meant to be driven by a front-end (like `oemsetup`) that handles
//! prompting and progress display.
//!
//! The library is structured into several key modules:
//! - [`catalog`] and [`selector`]: find the internal disks and pick the one
//!   that receives the installer.
//! - [`planner`]: partition layouts and the in-memory partition table.
//! - [`wiper`]: clears old filesystem and LVM signatures.
//! - [`runner`]: the external commands (`mkfs.ext4`, `mount`, `grub-install`,
//!   ...) as typed operations.
//! - [`platform`]: the production partition backend.
//! - [`orchestrator`]: the provisioning sequence.
//!
//! The primary entry point is [`orchestrator::Provisioner`]. It is generic
//! over the [`runner::CommandRunner`] and [`planner::PartitionBackend`] it
//! uses, so the whole sequence can run against fakes that only record what
//! would have been done.
//!
//! ## Example: Provisioning with Progress Reporting
//!
//! ```rust,no_run
//! use oemsetup_core::config::ProvisionConfig;
//! use oemsetup_core::orchestrator::Provisioner;
//! use oemsetup_core::platform::LinuxBackend;
//! use oemsetup_core::runner::SystemRunner;
//!
//! fn main() -> Result<(), oemsetup_core::ProvisionError> {
//!     let config = ProvisionConfig::default();
//!     let runner = SystemRunner::new(config.command_timeout);
//!     let backend = LinuxBackend::new(runner.clone());
//!     let provisioner = Provisioner::new(&config, &runner, &backend);
//!
//!     let plan = provisioner.discover()?;
//!     println!("Installing to {}", plan.primary);
//!
//!     let report = provisioner.execute(plan, |stage| println!("{stage}..."))?;
//!     println!("Staged {} files", report.staged.len());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod device;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod platform;
pub mod runner;
pub mod selector;
pub mod staging;
pub mod wiper;

pub use error::{ProvisionError, Result};
