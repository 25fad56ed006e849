//! Sweeper CLI - bulk moderation scans against an exported workspace snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sweeper_core::{ChannelId, FinalStats, StopReason, Task, WorkspaceId};
use sweeper_engine::platform::memory::{MemoryPlatform, WorkspaceSnapshot};
use sweeper_engine::{
    collect_metrics, reconcile_pending_restores, ChannelSink, Config, FileJournal, JsonFileStore,
    RateLimiterPool, ScanOptions, ScanOrchestrator, SettingsStore, TaskRegistry, TaskStore,
};

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Sweeper - bulk content moderation
#[derive(Parser)]
#[command(name = "sweeper")]
#[command(about = "Scan a workspace and delete messages matching banned rules", long_about = None)]
struct Cli {
    /// Directory holding settings, task records and the restore journal
    #[arg(long, global = true, default_value = ".sweeper")]
    data_dir: PathBuf,

    /// Messages per history fetch (max 100)
    #[arg(long, global = true)]
    page_size: Option<usize>,

    /// Pause between history fetches, in milliseconds
    #[arg(long, global = true)]
    page_delay_ms: Option<u64>,

    /// Platform operations allowed per rate window
    #[arg(long, global = true)]
    max_per_window: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scan over a workspace snapshot
    Scan {
        /// Workspace snapshot JSON file
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Only scan these channels (ids or <#id> references)
        #[arg(short, long, value_delimiter = ',')]
        channels: Vec<String>,

        /// User recorded as starting the task
        #[arg(long)]
        started_by: Option<String>,

        /// Write the cleaned workspace back to the snapshot file
        #[arg(long)]
        write_back: bool,
    },

    /// Show task history for every known workspace
    Status {
        /// Print Prometheus metrics instead
        #[arg(long)]
        metrics: bool,
    },

    /// Restore thread state left behind by an interrupted scan
    Recover {
        /// Workspace snapshot JSON file
        #[arg(short, long)]
        snapshot: PathBuf,
    },

    /// Manage moderation settings
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Add a banned rule (plain keyword or /pattern/flags)
    #[command(name = "add-rule")]
    AddRule { workspace: String, rule: String },

    /// Remove a banned rule
    #[command(name = "remove-rule")]
    RemoveRule { workspace: String, rule: String },

    /// Show the settings of a workspace
    Show { workspace: String },

    /// Exempt a channel from scanning
    #[command(name = "add-exempt")]
    AddExempt { workspace: String, channel: String },

    /// Remove a channel exemption
    #[command(name = "remove-exempt")]
    RemoveExempt { workspace: String, channel: String },
}

#[tokio::main]
async fn main() -> CliResult {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sweeper=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = build_config(&cli);

    match cli.command {
        Commands::Scan {
            snapshot,
            channels,
            started_by,
            write_back,
        } => {
            scan(&config, &snapshot, &channels, started_by, write_back).await?;
        }
        Commands::Status { metrics } => {
            status(&config, metrics).await?;
        }
        Commands::Recover { snapshot } => {
            recover(&config, &snapshot).await?;
        }
        Commands::Settings(command) => {
            settings(&config, command).await?;
        }
    }

    Ok(())
}

/// Overlay only the flags that were passed onto the default config.
fn build_config(cli: &Cli) -> Config {
    let mut config = Config::with_data_dir(&cli.data_dir);
    if let Some(page_size) = cli.page_size {
        config.scan.page_size = page_size;
    }
    if let Some(ms) = cli.page_delay_ms {
        config.scan.page_delay = Duration::from_millis(ms);
    }
    if let Some(max) = cli.max_per_window {
        config.rate_limit.max_per_window = max;
    }
    config
}

async fn load_snapshot(path: &Path) -> CliResult<WorkspaceSnapshot> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

async fn save_snapshot(path: &Path, snapshot: &WorkspaceSnapshot) -> CliResult {
    let json = serde_json::to_string_pretty(snapshot)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

async fn scan(
    config: &Config,
    snapshot_path: &Path,
    channels: &[String],
    started_by: Option<String>,
    write_back: bool,
) -> CliResult {
    let snapshot = load_snapshot(snapshot_path).await?;
    let workspace = snapshot.workspace_id.clone();
    let platform = Arc::new(MemoryPlatform::from_snapshot(snapshot));

    let store = Arc::new(JsonFileStore::new(&config.data_dir));
    let journal = Arc::new(FileJournal::new(config.journal_path()));
    let limiters = RateLimiterPool::new(config.rate_limit.clone());
    let limiter = limiters.for_workspace(&workspace);
    let registry = Arc::new(TaskRegistry::new(store.clone()));

    let report = reconcile_pending_restores(
        &workspace,
        platform.clone(),
        limiter.clone(),
        journal.clone(),
    )
    .await?;
    if !report.is_clean() {
        warn!(failed = report.failed.len(), "Some threads from an earlier run are still not restored");
    }

    let selected = channels
        .iter()
        .map(|c| ChannelId::parse_reference(c))
        .collect::<Result<Vec<_>, _>>()?;
    let options = ScanOptions {
        started_by: started_by.map(Into::into),
    };
    let task = if selected.is_empty() {
        registry.start_full_scan(&workspace, options).await?
    } else {
        registry
            .start_selected_targets_scan(&workspace, selected, options)
            .await?
    };

    let (sink, mut updates) = ChannelSink::new();
    let printer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            let s = &update.snapshot;
            println!(
                "[{:>3}%] targets {}/{}  scanned {}  deleted {}  unlocks {}  {}",
                s.percent_complete(),
                s.targets_completed,
                s.targets_total,
                s.messages_scanned,
                s.messages_deleted,
                s.unlock_operations,
                s.current_target.as_deref().unwrap_or("")
            );
            if update.is_terminal() {
                break;
            }
        }
    });

    let orchestrator = Arc::new(
        ScanOrchestrator::new(
            workspace.clone(),
            platform.clone(),
            limiter,
            store.clone(),
            registry,
            journal,
        )
        .with_sink(Arc::new(sink))
        .with_scan_config(config.scan.clone())
        .with_progress_config(config.progress.clone()),
    );

    let interrupt = orchestrator.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping scan");
            interrupt.stop();
        }
    });

    info!(workspace_id = %workspace, task_id = %task.id, "Starting scan");
    let result = orchestrator.start(&task).await;
    ctrl_c.abort();
    drop(orchestrator);
    printer.await.ok();

    if write_back {
        save_snapshot(snapshot_path, &platform.to_snapshot()).await?;
        info!(path = %snapshot_path.display(), "Snapshot written back");
    }

    let stats = result?;
    print_stats(&task, &stats);
    Ok(())
}

async fn status(config: &Config, metrics: bool) -> CliResult {
    let store = Arc::new(JsonFileStore::new(&config.data_dir));
    let workspaces = store.workspaces().await?;

    if metrics {
        let registry = TaskRegistry::new(store.clone());
        for workspace in &workspaces {
            registry.get_active(workspace).await?;
        }
        let limiters = RateLimiterPool::new(config.rate_limit.clone());
        print!("{}", collect_metrics(&registry, &limiters).await);
        return Ok(());
    }

    for workspace in &workspaces {
        let mut tasks = store.list(workspace).await?;
        tasks.sort_by_key(|t| t.created_at);

        println!("Workspace {workspace} ({} tasks):", tasks.len());
        println!(
            "{:<36}  {:<16}  {:<10}  {:>8}  {:>8}  {}",
            "ID", "KIND", "STATUS", "SCANNED", "DELETED", "CREATED"
        );
        println!("{}", "-".repeat(100));
        for task in tasks {
            println!(
                "{:<36}  {:<16}  {:<10}  {:>8}  {:>8}  {}",
                task.id,
                task.kind,
                task.status,
                task.progress.scanned_messages,
                task.progress.deleted_messages,
                task.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        println!();
    }

    Ok(())
}

async fn recover(config: &Config, snapshot_path: &Path) -> CliResult {
    let snapshot = load_snapshot(snapshot_path).await?;
    let workspace = snapshot.workspace_id.clone();
    let platform = Arc::new(MemoryPlatform::from_snapshot(snapshot));
    let journal = Arc::new(FileJournal::new(config.journal_path()));
    let limiters = RateLimiterPool::new(config.rate_limit.clone());

    let report = reconcile_pending_restores(
        &workspace,
        platform.clone(),
        limiters.for_workspace(&workspace),
        journal.clone(),
    )
    .await?;
    let remaining = journal.compact().await?;

    // A task left running by a killed process would block every future scan.
    let store = Arc::new(JsonFileStore::new(&config.data_dir));
    let registry = TaskRegistry::new(store);
    if let Some(task) = registry.get_active(&workspace).await? {
        registry
            .stop(
                &workspace,
                &task.id,
                StopReason::Error("interrupted before completion".into()),
            )
            .await?;
        println!("Closed interrupted task {}", task.id);
    }

    save_snapshot(snapshot_path, &platform.to_snapshot()).await?;

    println!("Restored:  {}", report.restored);
    println!("Vanished:  {}", report.vanished);
    println!("Failed:    {}", report.failed.len());
    for failure in &report.failed {
        println!("  - {} ({}): {}", failure.thread_name, failure.thread_id, failure.errors.join("; "));
    }
    println!("Journal entries still pending: {remaining}");

    Ok(())
}

async fn settings(config: &Config, command: SettingsCommand) -> CliResult {
    let store = JsonFileStore::new(&config.data_dir);

    match command {
        SettingsCommand::AddRule { workspace, rule } => {
            let added = store.add_rule(&workspace.into(), &rule).await?;
            println!("{}", if added { "Rule added" } else { "Rule already present" });
        }
        SettingsCommand::RemoveRule { workspace, rule } => {
            let removed = store.remove_rule(&workspace.into(), &rule).await?;
            println!("{}", if removed { "Rule removed" } else { "No such rule" });
        }
        SettingsCommand::Show { workspace } => {
            let settings = store.settings(&WorkspaceId::from(workspace)).await?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsCommand::AddExempt { workspace, channel } => {
            let channel = ChannelId::parse_reference(&channel)?;
            let added = store.add_exempt(&workspace.into(), &channel).await?;
            println!("{}", if added { "Channel exempted" } else { "Channel already exempt" });
        }
        SettingsCommand::RemoveExempt { workspace, channel } => {
            let channel = ChannelId::parse_reference(&channel)?;
            let removed = store.remove_exempt(&workspace.into(), &channel).await?;
            println!("{}", if removed { "Exemption removed" } else { "Channel was not exempt" });
        }
    }

    Ok(())
}

fn print_stats(task: &Task, stats: &FinalStats) {
    println!();
    println!("Task:       {}", task.id);
    println!("Kind:       {}", stats.kind);
    println!(
        "Outcome:    {}",
        if stats.completed_normally { "completed" } else { "stopped" }
    );
    if let Some(selected) = stats.selected_count {
        println!("Selected:   {selected}");
    }
    println!("Targets:    {}/{}", stats.targets_scanned, stats.targets_total);
    println!("Scanned:    {}", stats.messages_scanned);
    println!("Deleted:    {}", stats.messages_deleted);
    println!("Unlocks:    {}", stats.unlock_operations);

    if !stats.restore_failures.is_empty() {
        println!("Threads left unlocked or unarchived:");
        for failure in &stats.restore_failures {
            println!("  - {} ({}): {}", failure.thread_name, failure.thread_id, failure.errors.join("; "));
        }
    }
}
