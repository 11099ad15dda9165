/*
* pve-balancer command line
* -------------------------
* pve-balancer [-u USER] [-p PASS] [-n] [-d] [-w] <command>
* ├── evacuate <source> <node>...   move all running VMs off <source>
* ├── balanceram <node>...          spread running VMs over the nodes by RAM
* ├── migrate <vmid> <dst>          move one VM
* └── init [--force]                write config/default.toml
*
* The API host defaults to the first node named by the command (source for
* evacuate, destination for migrate) unless configured or given with --host.
* Exit status is non-zero when any planned VM did not end up where it should.
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::cluster::ProxmoxClient;
use crate::config::Settings;
use crate::migration::{DriverOptions, MigrationOutcome};
use crate::workflow::{Balancer, RunOptions, RunReport};

#[derive(Parser)]
#[command(name = "pve-balancer")]
#[command(about = "Evacuate and memory-balance Proxmox VE hosts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, value_name = "CONFIG", global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    username: Option<String>,

    #[arg(short, long, global = true)]
    password: Option<String>,

    /// API host to talk to
    #[arg(long, global = true)]
    host: Option<String>,

    /// Only show what would be migrated
    #[arg(short = 'n', long, global = true)]
    dryrun: bool,

    #[arg(short, long, global = true)]
    debug: bool,

    /// Wait for every migration task to finish
    #[arg(short, long, global = true)]
    wait: bool,

    /// Give up waiting for a task after this many seconds
    #[arg(long, value_name = "SECS", global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evacuate first host, migrate VMs to other hosts
    Evacuate {
        /// source node
        source: String,
        /// list of destination node names
        #[arg(required = true, value_name = "node")]
        dstnodes: Vec<String>,
    },
    /// Balance VMs over all hosts based on RAM usage
    Balanceram {
        /// list of node names
        #[arg(required = true, value_name = "node")]
        nodes: Vec<String>,
    },
    /// Migrate one VM to dest
    Migrate {
        /// VM ID
        vmid: u32,
        /// destination node
        dst: String,
    },
    /// Generate default configuration
    Init {
        #[arg(short, long)]
        force: bool,
    },
}

impl Commands {
    fn default_host(&self) -> Option<String> {
        match self {
            Commands::Evacuate { source, .. } => Some(source.clone()),
            Commands::Balanceram { nodes } => nodes.first().cloned(),
            Commands::Migrate { dst, .. } => Some(dst.clone()),
            Commands::Init { .. } => None,
        }
    }
}

/// Parse arguments and run the requested command. `Ok(false)` means the run
/// completed but something did not migrate.
pub async fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    if let Commands::Init { force } = cli.command {
        handle_init_command(force)?;
        return Ok(true);
    }

    let mut settings = match &cli.config {
        Some(path) => Settings::new_from_file(path)?,
        None => Settings::new()?,
    };
    apply_overrides(&cli, &mut settings);

    let host = settings
        .cluster
        .host
        .clone()
        .or_else(|| cli.command.default_host())
        .context("no API host configured")?;
    let client = ProxmoxClient::connect(&host, &settings.cluster).await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, no further migrations will be issued (press Ctrl-C again to quit)");
        let _ = cancel_tx.send(true);
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let options = RunOptions {
        driver: DriverOptions {
            dry_run: cli.dryrun,
            wait: cli.wait,
            online: settings.migration.online,
            poll: settings.migration.wait_policy(),
        },
        memory_granularity: settings.planner.memory_granularity(),
    };
    let balancer = Balancer::new(client, options).with_cancel(cancel_rx);

    let report = match &cli.command {
        Commands::Evacuate { source, dstnodes } => balancer.evacuate(source, dstnodes).await?,
        Commands::Balanceram { nodes } => balancer.balance_by_memory(nodes).await?,
        Commands::Migrate { vmid, dst } => balancer.migrate_one(*vmid, dst).await?,
        // written before connecting
        Commands::Init { .. } => return Ok(true),
    };

    print_report(&report);
    Ok(report.is_success())
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn apply_overrides(cli: &Cli, settings: &mut Settings) {
    if let Some(host) = &cli.host {
        settings.cluster.host = Some(host.clone());
    }
    if let Some(username) = &cli.username {
        settings.cluster.username = Some(username.clone());
    }
    if let Some(password) = &cli.password {
        settings.cluster.password = Some(password.clone());
    }
    if let Some(timeout) = cli.timeout {
        settings.migration.wait_timeout_secs = Some(timeout);
    }
}

fn print_report(report: &RunReport) {
    for outcome in &report.outcomes {
        let vm = &outcome.vm;
        match &outcome.result {
            Ok(MigrationOutcome::Stayed) => {
                println!("{} stays on {}", vm, vm.node);
            }
            Ok(MigrationOutcome::Planned) => {
                println!("would migrate {} from {} to {}", vm, vm.node, outcome.destination);
            }
            Ok(MigrationOutcome::Started(task)) => {
                println!("{} {} -> {} started {}", "→".yellow(), vm, outcome.destination, task);
            }
            Ok(MigrationOutcome::Succeeded(_)) => {
                println!("{} {} migrated to {}", "✓".green(), vm, outcome.destination);
            }
            Ok(MigrationOutcome::Failed { task, exitstatus }) => {
                println!(
                    "{} {} to {} failed: {} ({})",
                    "✗".red(),
                    vm,
                    outcome.destination,
                    exitstatus,
                    task
                );
            }
            Err(e) => {
                println!("{} {} to {}: {}", "✗".red(), vm, outcome.destination, e);
            }
        }
    }

    for vm in &report.unplaceable {
        println!("{} Unable to find destination for {}", "✗".red(), vm);
    }

    for dst in &report.capacity {
        println!(
            "{} has {} memory free ({:0.2}%)",
            dst.name.bold(),
            dst.memfree,
            dst.free_percent()
        );
    }

    if report.is_success() {
        info!("Run finished");
    } else {
        error!(failures = report.failures().count(), unplaceable = report.unplaceable.len(), "Run finished with failures");
    }
}

fn handle_init_command(force: bool) -> anyhow::Result<()> {
    let config_dir = PathBuf::from("config");
    let target = config_dir.join("default.toml");
    if target.exists() && !force {
        error!("Configuration already exists. Use --force to overwrite.");
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    let default_config = crate::config::generate_default_config();
    let config_str = toml::to_string_pretty(&default_config)?;
    std::fs::write(&target, config_str)?;

    println!("{} Default configuration generated", "✓".green());
    Ok(())
}
