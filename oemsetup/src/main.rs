use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use oemsetup_core::config::{DEFAULT_DATA_DIR, DEFAULT_DISK_ID_DIR, PowerAction, ProvisionConfig};
use oemsetup_core::orchestrator::{Provisioner, Stage};
use oemsetup_core::platform::LinuxBackend;
use oemsetup_core::runner::SystemRunner;
use oemsetup_core::selector::ProvisioningPlan;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oemsetup")]
#[command(about = "First-boot OEM provisioning: repartitions the internal disks and stages the OS installer", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory of stable disk names to discover disks in
    #[arg(long, global = true, default_value = DEFAULT_DISK_ID_DIR)]
    disk_id_dir: PathBuf,

    /// Only log the stages, without a progress spinner
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log debug details (also enabled by the DEBUG environment variable)
    #[arg(
        long,
        global = true,
        env = "DEBUG",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Erase all internal disks and stage the OS installer
    Install {
        /// Directory holding the installer image, kernel, initrd and configs
        #[arg(long, default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,

        /// Mount point for the rescue partition [default: <DATA_DIR>/target]
        #[arg(long)]
        staging_dir: Option<PathBuf>,

        /// Seconds any single external command may take
        #[arg(long, value_name = "SECS", default_value_t = 600)]
        timeout: u64,

        /// Skip verification of the staged files
        #[arg(short = 'n', long = "no-verify")]
        no_verify: bool,

        /// Do not ask for confirmation before erasing the disks
        #[arg(short, long)]
        yes: bool,

        /// What to do once the installer has been staged
        #[arg(long, value_enum, default_value_t = Shutdown::Ask)]
        shutdown: Shutdown,
    },
    /// List the internal disks and the one that would receive the installer
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum Shutdown {
    /// Ask on the console
    Ask,
    /// Power off without asking
    Poweroff,
    /// Leave the system running
    Never,
}

impl From<Shutdown> for PowerAction {
    fn from(shutdown: Shutdown) -> Self {
        match shutdown {
            Shutdown::Ask => PowerAction::Ask,
            Shutdown::Poweroff => PowerAction::PowerOff,
            Shutdown::Never => PowerAction::None,
        }
    }
}

/// The log level used when `RUST_LOG` is not set.
fn default_level(debug: bool) -> &'static str {
    if debug { "debug" } else { "info" }
}

/// Sets up console logging once for the whole run. `RUST_LOG` wins if set.
fn init_logging(debug: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level(debug))),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

/// Presents a "Yes/No" confirmation to the user. An empty answer is a yes.
fn confirm(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(true)
        .interact()?;

    Ok(confirmation)
}

fn print_plan(plan: &ProvisioningPlan) {
    println!("\n  {:<16} {:<10} {}", "DEVICE", "ROLE", "ALIAS");
    println!("  {:-<16} {:-<10} {:-<40}", "", "", "");
    let disks = std::iter::once((&plan.primary, "primary"))
        .chain(plan.secondaries.iter().map(|d| (d, "secondary")));
    for (disk, role) in disks {
        println!(
            "  {:<16} {:<10} {}",
            disk.path.display(),
            role,
            disk.alias_name().unwrap_or_else(|| "-".to_string())
        );
    }
    println!();
}

fn stage_spinner(hidden: bool) -> Result<ProgressBar> {
    if hidden {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stdout());
    pb.set_prefix("Provisioning");
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix:12} [{elapsed_precise}] [{spinner:.blue}] {msg}")?,
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn install(
    config: &ProvisionConfig,
    assume_yes: bool,
    hide_progress: bool,
) -> Result<()> {
    let runner = SystemRunner::new(config.command_timeout);
    let backend = LinuxBackend::new(runner.clone());
    let provisioner = Provisioner::new(config, &runner, &backend);

    let plan = provisioner.discover()?;

    println!(
        "{} THIS WILL ERASE THE CONTENTS OF ALL DISKS FOUND IN THIS DEVICE.",
        style("WARNING:").red().bold(),
    );
    print_plan(&plan);

    if !assume_yes && !confirm("Do you really want to continue installing the OEM image?")? {
        println!("Installation cancelled. Rebooting.");
        info!("confirmation declined, requesting a reboot");
        provisioner.reboot()?;
        return Ok(());
    }

    // Past this point a half-partitioned disk is worse than waiting, so
    // Ctrl+C is only acknowledged.
    ctrlc::set_handler(|| {
        eprintln!(
            "\n{} Provisioning cannot be interrupted, please wait for it to finish.",
            style("NOTE:").yellow().bold()
        );
    })?;

    println!();
    let pb = stage_spinner(hide_progress)?;
    let mut current: Option<String> = None;
    let on_stage = |stage: &Stage| {
        if let Some(done) = current.replace(stage.to_string()) {
            pb.println(format!("  {} {}", style("✓").green(), done));
        }
        pb.set_message(stage.to_string());
    };

    match provisioner.execute(plan, on_stage) {
        Ok(report) => {
            if let Some(done) = current {
                pb.println(format!("  {} {}", style("✓").green(), done));
            }
            pb.finish_and_clear();
            println!(
                "\n✨ Installer staged on {} ({}).",
                style(report.rescue_partition.display()).cyan(),
                report.plan.primary,
            );
        }
        Err(e) => {
            pb.finish_with_message("❌ Provisioning failed.");
            return Err(e.into());
        }
    }

    let power_off = match config.power {
        PowerAction::Ask => confirm("Shutdown now?")?,
        PowerAction::PowerOff => true,
        PowerAction::None => false,
    };
    if power_off {
        info!("powering off");
        provisioner.power_off()?;
    }
    Ok(())
}

fn list(config: &ProvisionConfig) -> Result<()> {
    let runner = SystemRunner::new(config.command_timeout);
    let backend = LinuxBackend::new(runner.clone());
    let plan = Provisioner::new(config, &runner, &backend).discover()?;

    println!(
        "Found {} internal disks:",
        plan.secondaries.len() + 1
    );
    print_plan(&plan);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Install {
            data_dir,
            staging_dir,
            timeout,
            no_verify,
            yes,
            shutdown,
        } => {
            let mut config = ProvisionConfig::with_data_dir(data_dir);
            config.disk_id_dir = cli.disk_id_dir;
            if let Some(staging_dir) = staging_dir {
                config.staging_dir = staging_dir;
            }
            config.command_timeout = Duration::from_secs(timeout);
            config.verify = !no_verify;
            config.power = shutdown.into();
            install(&config, yes, cli.verbose || cli.debug)
        }
        Commands::List => {
            let mut config = ProvisionConfig::default();
            config.disk_id_dir = cli.disk_id_dir;
            list(&config)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("ERROR:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
