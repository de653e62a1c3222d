use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gst_bill_tracker::app::file_dialog::{DialogService, NativeDialogService};
use gst_bill_tracker::app::state::AppState;
use gst_bill_tracker::app::{self, events::UserEvent, EngineHandle};
use gst_bill_tracker::config::{settings, ConfigStorage};
use gst_bill_tracker::core::{BillMonth, BillStatus, BulkOutcome, ReconciliationEngine, TreeGenerator};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Track which bills have been submitted for GST.
#[derive(Parser, Debug)]
#[command(name = "bill-tracker", version, about)]
struct Cli {
    /// Directory holding config, tracking and history documents.
    #[arg(long, global = true, env = settings::HOME_ENV)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Choose the bill folder. Opens a dialog when no path is given.
    Select { path: Option<PathBuf> },
    /// Choose the GST submitted folder, or clear it with `--clear`.
    GstRoot {
        path: Option<PathBuf>,
        #[arg(long, conflicts_with = "path")]
        clear: bool,
    },
    /// List subfolders, or change which ones are scanned.
    Subfolders {
        /// Scan only these subfolders. Pass none to scan all of them.
        #[arg(long, num_args = 0..)]
        select: Option<Vec<PathBuf>>,
        #[arg(long)]
        ignore: Option<PathBuf>,
        #[arg(long)]
        unignore: Option<PathBuf>,
    },
    /// Print the directory tree of the bill folder.
    Tree,
    /// Show every bill with its status.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Reconcile tracking records with the GST submitted folder.
    Refresh,
    /// Mark bills as sent in MONTH (YYYY-MM).
    MarkSent {
        month: BillMonth,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Mark bills as pending again.
    MarkPending {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Override the bill month of bills.
    BillMonth {
        month: BillMonth,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Stop tracking a file.
    Ignore { path: PathBuf },
    Tag { path: PathBuf, tag: String },
    Untag { path: PathBuf, tag: String },
    Undo,
    Redo,
    /// Show the undo and redo stacks.
    History,
    /// Sync periodically until interrupted.
    Watch,
    /// Delete bills from disk.
    Delete {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Move bills into another folder.
    Move {
        #[arg(long)]
        to: PathBuf,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Write the status of every bill to a JSON file.
    Export { path: Option<PathBuf> },
    /// Copy the configuration to or from a file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Export { path: PathBuf },
    /// Opens a dialog when no path is given.
    Import { path: Option<PathBuf> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = settings::get_config_directory(cli.data_dir.as_deref())
        .context("Could not determine the data directory")?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create {:?}", data_dir))?;

    let engine = open_engine(&data_dir)?;
    let dialog = NativeDialogService;
    run(cli.command, engine, &dialog, &data_dir).await
}

fn open_engine(data_dir: &Path) -> Result<ReconciliationEngine> {
    let history = settings::load_history(Some(data_dir))?;
    Ok(ReconciliationEngine::open(data_dir)?.with_history(history))
}

async fn run(
    command: Command,
    mut engine: ReconciliationEngine,
    dialog: &dyn DialogService,
    data_dir: &Path,
) -> Result<()> {
    match command {
        Command::Select { path: Some(path) } => {
            engine.select_root(&path)?;
            println!("Bill folder: {}", path.display());
        }
        Command::Select { path: None } => {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let handle = EngineHandle::new(engine);
            if app::select_root_folder(&handle, dialog, &tx).await?.is_none() {
                println!("No folder selected");
            }
            drop(tx);
            while let Some(event) = rx.recv().await {
                print_event(&event);
            }
            let engine = handle.engine().lock().await;
            settings::save_history(engine.history(), Some(data_dir))?;
            return Ok(());
        }
        Command::GstRoot { path, clear } => {
            let path = match (path, clear) {
                (_, true) => None,
                (Some(path), false) => Some(path),
                (None, false) => match dialog.pick_gst_root() {
                    Some(path) => Some(path),
                    None => {
                        println!("No folder selected");
                        return Ok(());
                    }
                },
            };
            engine.set_gst_root(path.clone())?;
            match path {
                Some(path) => println!("GST submitted folder: {}", path.display()),
                None => println!("GST submitted folder cleared"),
            }
        }
        Command::Subfolders { select, ignore, unignore } => {
            if let Some(selection) = select {
                engine.select_subfolders(selection)?;
            }
            if let Some(path) = ignore {
                engine.ignore_subfolder(&path, true)?;
            }
            if let Some(path) = unignore {
                engine.ignore_subfolder(&path, false)?;
            }
            let config = engine.config();
            for subfolder in engine.structure().await?.subfolders {
                let selected = config.selected_subfolders.is_empty()
                    || config.selected_subfolders.contains(&subfolder.path);
                let marker = if config.ignored_subfolders.contains(&subfolder.path) {
                    "ignored"
                } else if selected {
                    "scanned"
                } else {
                    "skipped"
                };
                println!("{:<8} {}", marker, subfolder.name);
            }
        }
        Command::Tree => {
            let structure = engine.structure().await?;
            if let Some(root) = &engine.config().root_path {
                print!("{}", TreeGenerator::render(root, &structure.tree));
            }
            for failure in structure.errors {
                eprintln!("unreadable: {} ({})", failure.path.display(), failure.reason);
            }
        }
        Command::Status { json } => {
            let files = engine.file_statuses().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else {
                for view in &files {
                    let status = match view.status {
                        BillStatus::Sent => "sent",
                        BillStatus::Pending => "pending",
                    };
                    let sent = view.sent_month.map(|m| m.to_string()).unwrap_or_default();
                    println!(
                        "{:<8} {} {:<7} {}",
                        status,
                        view.bill_month,
                        sent,
                        view.file.path.display()
                    );
                }
                let sent = files.iter().filter(|v| v.status == BillStatus::Sent).count();
                println!("{} bills, {} sent, {} pending", files.len(), sent, files.len() - sent);
            }
        }
        Command::Refresh => {
            let report = engine.refresh().await?;
            if !report.gst_checked {
                println!("No GST submitted folder configured");
            }
            println!(
                "Scanned {} bills: {} updated, {} removed",
                report.scanned, report.updated, report.removed
            );
            for failure in &report.scan_errors {
                eprintln!("unreadable: {} ({})", failure.path.display(), failure.reason);
            }
        }
        Command::MarkSent { month, paths } => {
            let outcome = engine.bulk_mark_sent(&paths, month);
            report_bulk(outcome?, "marked sent");
        }
        Command::MarkPending { paths } => {
            let outcome = engine.bulk_mark_pending(&paths);
            report_bulk(outcome?, "marked pending");
        }
        Command::BillMonth { month, paths } => {
            let outcome = engine.bulk_set_bill_month(&paths, month);
            report_bulk(outcome?, "updated");
        }
        Command::Ignore { path } => {
            if engine.ignore_file(&path)? {
                println!("Ignoring {}", path.display());
            } else {
                println!("{} was already ignored", path.display());
            }
        }
        Command::Tag { path, tag } => {
            engine.add_tag(&path, &tag)?;
        }
        Command::Untag { path, tag } => {
            engine.remove_tag(&path, &tag)?;
        }
        Command::Undo => match engine.undo()? {
            Some(action) => println!("Undid: {}", action.describe()),
            None => println!("Nothing to undo"),
        },
        Command::Redo => match engine.redo()? {
            Some(action) => println!("Redid: {}", action.describe()),
            None => println!("Nothing to redo"),
        },
        Command::History => {
            println!("Undo: {}", engine.history().peek_undo().map(|a| a.describe()).unwrap_or_default());
            println!("Redo: {}", engine.history().peek_redo().map(|a| a.describe()).unwrap_or_default());
            println!("{} undoable, {} redoable", engine.history().len(), engine.history().redo_len());
        }
        Command::Watch => {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let handle = EngineHandle::new(engine);
            let mut state = AppState::new(handle.clone(), tx.clone());
            app::tasks::run_once(&handle, &tx).await;
            state.apply_settings().await;
            if !state.is_auto_syncing() {
                println!("Auto-sync is disabled in the settings");
            }

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    Some(event) = rx.recv() => print_event(&event),
                }
            }
            state.shutdown().await;
            let engine = handle.engine().lock().await;
            settings::save_history(engine.history(), Some(data_dir))?;
            return Ok(());
        }
        Command::Delete { paths } => {
            let report = engine.delete_files(&paths)?;
            println!("Deleted {} files", report.deleted.len());
            for failure in &report.failed {
                eprintln!("failed: {} ({})", failure.path.display(), failure.reason);
            }
        }
        Command::Move { to, paths } => {
            let report = engine.move_files(&paths, &to)?;
            for moved in &report.moved {
                println!("{} -> {}", moved.from.display(), moved.to.display());
            }
            for failure in &report.failed {
                eprintln!("failed: {} ({})", failure.path.display(), failure.reason);
            }
        }
        Command::Export { path } => {
            let Some(path) = path.or_else(|| dialog.export_report_path()) else {
                println!("No file selected");
                return Ok(());
            };
            let count = engine.export_report(&path).await?;
            println!("Exported {} bills to {}", count, path.display());
        }
        Command::Config { action } => match action {
            ConfigAction::Export { path } => settings::export_config(engine.config(), &path)?,
            ConfigAction::Import { path } => {
                let Some(path) = path.or_else(|| dialog.pick_config_to_import()) else {
                    println!("No file selected");
                    return Ok(());
                };
                let config = settings::import_config(&path)?;
                settings::JsonConfigStorage::new(data_dir).save(&config)?;
                println!("Imported configuration from {}", path.display());
            }
        },
    }

    settings::save_history(engine.history(), Some(data_dir))?;
    Ok(())
}

fn report_bulk(outcome: BulkOutcome, verb: &str) {
    println!("{} {} files", outcome.succeeded.len(), verb);
    if !outcome.unchanged.is_empty() {
        println!("{} files were already up to date", outcome.unchanged.len());
    }
    for failure in outcome.failed.iter().chain(&outcome.mirror_errors) {
        eprintln!("failed: {} ({})", failure.path.display(), failure.reason);
    }
}

fn print_event(event: &UserEvent) {
    match event {
        UserEvent::SyncStarted => tracing::debug!("Sync started"),
        UserEvent::SyncCompleted(report) => println!(
            "Synced {} bills: {} updated, {} removed",
            report.scanned, report.updated, report.removed
        ),
        UserEvent::SyncSkipped => println!("Sync skipped, another one is running"),
        UserEvent::RootSelected(path) => println!("Bill folder: {}", path.display()),
        UserEvent::AutoSyncStateChanged(running) => {
            println!("Auto-sync {}", if *running { "resumed" } else { "paused" })
        }
        UserEvent::ShowError(message) => eprintln!("error: {}", message),
    }
}
