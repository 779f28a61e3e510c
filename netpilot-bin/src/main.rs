use clap::{Args, Parser, Subcommand};
use netpilot_common::{bootstrap, wait_for_shutdown};
use netpilot_core::{AutomationService, BackupScheduler, Collaborators, ExecutionReport};
use netpilot_error::{NPError, NPResult};
use netpilot_models::{
    constants::DEFAULT_CONFIG_FILE_NAME,
    domain::prelude::{BackupType, DeployOptions, OperationRequest},
    settings::Settings,
};
use netpilot_storage::{
    new_otp_cache, MemoryBackupStore, MemoryCredentialStore, MemoryInventory,
    StaticCommandCatalog,
};
use np_driver_telnet::{TelnetConfig, TelnetConnector};
use std::{env::current_dir, path::PathBuf, sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// NetPilot - concurrent network device automation
///
/// Runs backups, configuration pushes and discovery against many devices at
/// once over pooled CLI sessions.
#[derive(Parser)]
#[command(name = "netpilot")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "NetPilot", long_about = None)]
struct Cli {
    /// Sets a custom config file with full path
    ///
    /// If not specified, 'netpilot.toml' in the current working directory is used.
    #[arg(short, long, env = "NP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect and store running configurations
    Backup(Targets),
    /// Push configuration lines
    Deploy {
        #[command(flatten)]
        targets: Targets,
        /// Configuration line, repeat for several
        #[arg(short = 'l', long = "line", required = true)]
        lines: Vec<String>,
        /// Store a pre-change backup first; a failed backup skips the push
        #[arg(long)]
        backup_before: bool,
        /// Store a post-change backup after a successful push
        #[arg(long)]
        backup_after: bool,
        /// Save the configuration on the device after the push
        #[arg(long)]
        save: bool,
    },
    /// Collect device facts
    Discover(Targets),
    /// Run the configured backup schedules until a termination signal arrives
    Serve,
}

#[derive(Args)]
struct Targets {
    /// Device ids from the inventory, comma separated
    #[arg(short, long, value_delimiter = ',', required = true)]
    devices: Vec<String>,
    /// Do not prompt for one-time passwords; leave the task awaiting OTP
    #[arg(long)]
    no_prompt: bool,
}

fn build_service(settings: &Settings) -> AutomationService {
    let inventory = &settings.inventory;
    let connector = TelnetConnector::new(TelnetConfig::with_connection(settings.connection));
    info!(
        devices = inventory.devices.len(),
        credentials = inventory.credentials.len(),
        "Inventory loaded from configuration"
    );
    AutomationService::new(
        settings,
        Collaborators {
            inventory: Arc::new(MemoryInventory::new(inventory.devices.clone())),
            credentials: Arc::new(MemoryCredentialStore::new(inventory.credentials.clone())),
            catalog: Arc::new(StaticCommandCatalog::from_config(&settings.catalog)),
            backups: Arc::new(MemoryBackupStore::new()),
            connector: Arc::new(connector),
            otp_cache: Arc::new(new_otp_cache(&settings.otp)),
            parser: None,
        },
    )
}

/// Ask the operator for one code per blocked bucket and resume the task.
async fn resolve_otp(
    service: &AutomationService,
    mut execution: ExecutionReport,
) -> NPResult<ExecutionReport> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    while let Some(signal) = execution.otp_required.take() {
        for pending in &signal.pending {
            eprint!(
                "OTP for {}/{} ({} devices): ",
                pending.department,
                pending.device_group,
                pending.failed_devices.len()
            );
            let code = stdin
                .next_line()
                .await?
                .ok_or_else(|| NPError::InvalidResume("no OTP supplied".into()))?;
            service
                .supply_otp(&pending.department, pending.device_group, code.trim())
                .await?;
        }
        execution = service.resume(&signal.task_id, Vec::new()).await?;
    }
    Ok(execution)
}

async fn run_once(
    service: &AutomationService,
    targets: Targets,
    request: OperationRequest,
) -> NPResult<()> {
    let mut execution = service.run(targets.devices, request).await?;
    if execution.otp_required.is_some() && !targets.no_prompt {
        execution = resolve_otp(service, execution).await?;
    }
    println!("{}", serde_json::to_string_pretty(&execution)?);
    Ok(())
}

async fn serve(service: &AutomationService, settings: &Settings) -> NPResult<()> {
    let mut scheduler = BackupScheduler::new(service.clone(), settings.backup.schedules.clone());
    scheduler.start();
    if !scheduler.is_running() {
        warn!("No backup schedules configured");
    }
    wait_for_shutdown(CancellationToken::new()).await?;
    scheduler.stop().await;
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> NPResult<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(p) => p,
        None => {
            let dir = current_dir()
                .map_err(|e| NPError::from(format!("Failed to get current directory: {e}")))?;
            dir.join(DEFAULT_CONFIG_FILE_NAME)
        }
    };

    let (settings, _logger) = bootstrap(config_path.to_string_lossy().to_string())?;
    let service = build_service(&settings);

    let outcome = match cli.command {
        Command::Backup(targets) => {
            let request = OperationRequest::Backup {
                backup_type: BackupType::Manual,
            };
            run_once(&service, targets, request).await
        }
        Command::Deploy {
            targets,
            lines,
            backup_before,
            backup_after,
            save,
        } => {
            let request = OperationRequest::Deploy {
                commands: lines,
                options: DeployOptions {
                    backup_before,
                    backup_after,
                    save_after: save,
                },
            };
            run_once(&service, targets, request).await
        }
        Command::Discover(targets) => {
            run_once(&service, targets, OperationRequest::Discovery).await
        }
        Command::Serve => serve(&service, &settings).await,
    };

    service.shutdown(Duration::from_secs(30)).await?;
    outcome
}
