//! `preview status`: queue, cache and sync visibility.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use preview_core::paths::socket_path;
use preview_daemon::{request_status, DaemonError};

/// Arguments for `preview status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let payload = match request_status(&home) {
            Ok(payload) => payload,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                let socket = socket_path(&home);
                if self.json {
                    print_json(&serde_json::json!({
                        "running": false,
                        "socket": socket.display().to_string(),
                    }))?;
                } else {
                    println!(
                        "{} daemon is not running (no socket at {})",
                        "■".bright_black().bold(),
                        socket.display()
                    );
                }
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        };

        if self.json {
            return print_json(&payload);
        }
        let status: DaemonStatus =
            serde_json::from_value(payload).context("unexpected daemon status payload")?;
        print_report(status);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DaemonStatus {
    pid: u32,
    uptime_secs: u64,
    repos_root: String,
    queue: QueueView,
    cached: Vec<CachedView>,
    syncing: Vec<SyncingView>,
}

#[derive(Debug, Deserialize)]
struct QueueView {
    limit: usize,
    running: usize,
    waiting: usize,
}

#[derive(Debug, Deserialize)]
struct CachedView {
    repo: String,
    pages: usize,
    discovered_at: DateTime<Utc>,
    refreshing: bool,
}

#[derive(Debug, Deserialize)]
struct SyncingView {
    repo: String,
    state: String,
}

#[derive(Tabled)]
struct CacheRow {
    #[tabled(rename = "repository")]
    repo: String,
    #[tabled(rename = "pages")]
    pages: usize,
    #[tabled(rename = "discovered")]
    discovered: String,
    #[tabled(rename = "refresh")]
    refresh: String,
}

#[derive(Tabled)]
struct SyncRow {
    #[tabled(rename = "repository")]
    repo: String,
    #[tabled(rename = "state")]
    state: String,
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_report(status: DaemonStatus) {
    println!(
        "Preview v{} | pid {} | up {} | {}/{} running | {} waiting",
        env!("CARGO_PKG_VERSION"),
        status.pid,
        format_seconds(status.uptime_secs),
        status.queue.running,
        status.queue.limit,
        status.queue.waiting,
    );
    println!("working copies: {}", status.repos_root);

    let separator = "■".repeat(60).bright_black().to_string();
    println!("{separator}");
    println!("{}", "DISCOVERY CACHE".bold());
    if status.cached.is_empty() {
        println!("No repositories discovered yet.");
    } else {
        let rows: Vec<CacheRow> = status
            .cached
            .into_iter()
            .map(|entry| CacheRow {
                repo: entry.repo,
                pages: entry.pages,
                discovered: format!("{} ago", format_datetime_age(entry.discovered_at)),
                refresh: if entry.refreshing {
                    "in flight".yellow().to_string()
                } else {
                    "idle".green().to_string()
                },
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    println!("{separator}");
    println!("{}", "SYNCS".bold());
    if status.syncing.is_empty() {
        println!("No syncs in progress.");
    } else {
        let rows: Vec<SyncRow> = status
            .syncing
            .into_iter()
            .map(|sync| SyncRow {
                repo: sync.repo,
                state: state_label(&sync.state),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
}

fn state_label(state: &str) -> String {
    match state {
        "syncing" => "SYNCING".yellow().bold().to_string(),
        "syncing_with_pending_retry" => "SYNCING (retry queued)".magenta().bold().to_string(),
        other => other.to_uppercase(),
    }
}

fn format_datetime_age(timestamp: DateTime<Utc>) -> String {
    let age = Utc::now().signed_duration_since(timestamp).num_seconds().max(0) as u64;
    format_seconds(age)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
