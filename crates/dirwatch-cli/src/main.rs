use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use common::{ChangeReport, config::WatchConfig};
use dirwatch::{
    DirectoryWatcher, NativeWatchService, NotifyWatchService, PollingWatchService, WatchService,
    WatcherOptions,
    notify_service::{Backend, Native, Polling},
};

#[derive(Debug, Parser)]
#[command(name = "dirwatch")]
#[command(about = "Recursive directory change watcher")]
struct Cli {
    /// Emit logs as JSON on stderr.
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print which watch backends work on this machine.
    Check,
    /// Watch directory trees and print each batch of changed directories.
    Watch {
        directories: Vec<PathBuf>,
        #[arg(long, default_value = "dirwatch.toml")]
        config: PathBuf,
        #[arg(long)]
        latency_ms: Option<u64>,
        #[arg(long)]
        polling: bool,
        /// Stop after this many seconds instead of running until killed.
        #[arg(long)]
        duration_secs: Option<u64>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Check => check(),
        Commands::Watch {
            directories,
            config,
            latency_ms,
            polling,
            duration_secs,
        } => {
            let mut cfg = WatchConfig::load(&config)?;
            if !directories.is_empty() {
                cfg.directories = directories
                    .iter()
                    .map(|d| d.display().to_string())
                    .collect();
            }
            if let Some(ms) = latency_ms {
                cfg.latency_ms = ms;
            }
            cfg.force_polling |= polling;
            watch(&cfg, duration_secs.map(Duration::from_secs))
        }
    }
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn check() -> anyhow::Result<()> {
    let output = serde_json::json!({
        "native": NativeWatchService::usable(),
        "polling": PollingWatchService::usable(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn watch(cfg: &WatchConfig, duration: Option<Duration>) -> anyhow::Result<()> {
    let roots = cfg
        .directories
        .iter()
        .map(|d| canonical_dir(Path::new(d)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if roots.is_empty() {
        bail!("no directories to watch");
    }

    let options = WatcherOptions::from(cfg);
    if cfg.force_polling || !Native::usable() {
        tracing::info!(backend = Polling::NAME, "selected watch backend");
        run::<Polling>(roots, options, duration)
    } else {
        tracing::info!(backend = Native::NAME, "selected watch backend");
        run::<Native>(roots, options, duration)
    }
}

fn run<B: Backend>(
    roots: Vec<PathBuf>,
    options: WatcherOptions,
    duration: Option<Duration>,
) -> anyhow::Result<()> {
    let watcher = DirectoryWatcher::<NotifyWatchService<B>>::with_notify(roots, options)
        .with_listener(|dirs: Vec<String>| {
            match serde_json::to_string(&ChangeReport::now(dirs)) {
                Ok(line) => println!("{line}"),
                Err(err) => tracing::warn!(error = %err, "failed to encode change report"),
            }
        });

    tracing::info!(roots = ?watcher.directories(), "watching");
    match duration {
        Some(limit) => {
            watcher.start(false).context("failed to start watcher")?;
            std::thread::sleep(limit);
            watcher.stop();
        }
        None => watcher.start(true).context("failed to start watcher")?,
    }
    Ok(())
}

fn canonical_dir(path: &Path) -> anyhow::Result<PathBuf> {
    let canonical = std::fs::canonicalize(path)
        .with_context(|| format!("directory does not exist: {}", path.display()))?;
    if !canonical.is_dir() {
        bail!("not a directory: {}", canonical.display());
    }
    Ok(canonical)
}
