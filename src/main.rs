//! CLI entry point for mountfetch.

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use mountfetch_core::config::{Settings, SharedSettings, SettingsStore, default_config_path};
use mountfetch_core::download::mount::{pid_is_alive, sweep_stale_mount_points};
use mountfetch_core::download::parse_size;
use mountfetch_core::queue::{DEFAULT_NOTIFY_WINDOW, DebouncedNotifier};
use mountfetch_core::{Database, DownloadOrchestrator, DownloadResult, Queue, TransferItem};
use tracing::{debug, info, trace, warn};

mod cli;
mod progress;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Logs go to stderr so `status --json` stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let settings = load_settings(args.config.as_deref())?;
    let queue = Arc::new(open_queue(args.db.as_deref()).await?);

    match args.command {
        Command::Add {
            key,
            size,
            destination,
        } => {
            if let Some(size) = size.as_deref()
                && parse_size(size).is_none()
            {
                bail!("invalid size '{size}' (expected e.g. \"2 GB\" or \"500 MB\")");
            }
            let destination = destination.map(|d| d.display().to_string());
            let item = queue
                .insert_item(&key, size.as_deref(), destination.as_deref())
                .await
                .with_context(|| format!("cannot add '{key}'"))?;
            println!("Queued {}", item.key);
        }
        Command::Start { key, speed_limit } => {
            run_download(show_progress(args.quiet), queue, settings, &key, speed_limit, false).await?;
        }
        Command::Resume { key, speed_limit } => {
            run_download(show_progress(args.quiet), queue, settings, &key, speed_limit, true).await?;
        }
        Command::Status { key, json } => {
            let items = match key {
                Some(key) => queue
                    .find_item(&key)
                    .await?
                    .map(|item| vec![item])
                    .with_context(|| format!("no item with key '{key}'"))?,
                None => queue.list_all().await?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                print_table(&items);
            }
        }
        Command::Remove { key } => {
            queue.remove(&key).await?;
            println!("Removed {key}");
        }
    }

    Ok(())
}

/// Whether the progress bar should be drawn.
fn show_progress(quiet: bool) -> bool {
    !quiet && io::stderr().is_terminal()
}

fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    let path = explicit.map(Path::to_path_buf).or_else(default_config_path);
    let Some(path) = path else {
        debug!("no config path available, using defaults");
        return Ok(Settings::default());
    };
    let settings = Settings::load(&path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    settings
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    debug!(path = %path.display(), "config loaded");
    Ok(settings)
}

/// Resolves the queue database path.
///
/// Priority:
/// 1. `--db`
/// 2. `$XDG_DATA_HOME/mountfetch/queue.db`
/// 3. `$HOME/.local/share/mountfetch/queue.db`
/// 4. `./mountfetch.db`
fn default_db_path() -> PathBuf {
    if let Some(data_home) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(data_home).join("mountfetch").join("queue.db");
    }
    if let Some(home) = std::env::var_os("HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("mountfetch")
            .join("queue.db");
    }
    PathBuf::from("mountfetch.db")
}

async fn open_queue(explicit: Option<&Path>) -> Result<Queue> {
    let path = explicit.map_or_else(default_db_path, Path::to_path_buf);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let db = Database::new(&path)
        .await
        .with_context(|| format!("cannot open queue database {}", path.display()))?;
    debug!(path = %path.display(), "queue database opened");
    Ok(Queue::new(db))
}

async fn run_download(
    show_progress: bool,
    queue: Arc<Queue>,
    settings: Settings,
    key: &str,
    speed_limit: Option<u64>,
    resume: bool,
) -> Result<()> {
    // Only a command that starts transfers may claim leftovers from a crash.
    let reset = queue
        .reset_interrupted(pid_is_alive)
        .await
        .context("failed to reset interrupted items")?;
    if reset > 0 {
        info!(reset, "interrupted downloads moved to paused");
    }

    let settings = Arc::new(SharedSettings::new(settings));
    if let Some(kbps) = speed_limit {
        settings.set_speed_limit_kbps(kbps);
    }

    let swept = sweep_stale_mount_points(&settings.mount_root()).await;
    if swept > 0 {
        debug!(swept, "stale mount points removed");
    }

    let notifier = DebouncedNotifier::new(DEFAULT_NOTIFY_WINDOW, || trace!("queue changed"));
    let orchestrator = DownloadOrchestrator::new(queue.clone(), settings.clone(), settings)
        .with_notifier(Arc::new(notifier));

    let (ui_handle, ui_stop) = progress::spawn_progress_ui(show_progress, queue, key.to_string());

    let operation = async {
        if resume {
            orchestrator.resume_download(key).await
        } else {
            orchestrator.start_download(key).await
        }
    };
    tokio::pin!(operation);

    let result = tokio::select! {
        result = &mut operation => result,
        _ = tokio::signal::ctrl_c() => {
            warn!(key, "interrupt received, pausing");
            orchestrator.pause_download(key).await;
            operation.await
        }
    };

    ui_stop.store(true, std::sync::atomic::Ordering::SeqCst);
    if let Some(handle) = ui_handle
        && let Err(error) = handle.await
    {
        debug!(error = %error, "progress task ended abnormally");
    }

    report(key, &result)
}

fn report(key: &str, result: &DownloadResult) -> Result<()> {
    if result.start_extraction {
        println!("{key}: download complete, ready for extraction");
        return Ok(());
    }
    if let Some(error) = &result.error {
        bail!("{key}: {error}");
    }
    match &result.item {
        Some(item) => println!("{key}: {} ({}%)", item.status(), item.progress_percent()),
        None => println!("{key}: stopped"),
    }
    Ok(())
}

fn print_table(items: &[TransferItem]) {
    if items.is_empty() {
        println!("Queue is empty");
        return;
    }
    println!(
        "{:<28} {:<12} {:>5} {:>12} {:>9}  ERROR",
        "KEY", "STATUS", "PROG", "SPEED", "ETA"
    );
    for item in items {
        println!(
            "{:<28} {:<12} {:>4}% {:>12} {:>9}  {}",
            item.key,
            item.status().to_string(),
            item.progress_percent(),
            item.speed,
            item.eta,
            item.error.as_deref().unwrap_or("")
        );
    }
}
