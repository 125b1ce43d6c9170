//! `preview sync`: trigger a working-copy sync through the daemon.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use preview_core::SyncTrigger;
use preview_daemon::request_sync;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Repository owner (group or user).
    pub owner: String,

    /// Repository name.
    pub name: String,

    /// Directory whose `*.html` templates repopulate the page list afterwards.
    #[arg(long)]
    pub discover: Option<String>,

    /// Wait for the sync to finish instead of returning once it is queued.
    #[arg(long)]
    pub wait: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let trigger = SyncTrigger {
            owner: self.owner,
            name: self.name,
            discover: self.discover,
        };
        let ack = request_sync(&home, &trigger, self.wait)
            .with_context(|| format!("sync of {}/{} failed", trigger.owner, trigger.name))?;

        let repo = format!("{}/{}", trigger.owner, trigger.name);
        match ack["sync"].as_str() {
            Some("queued") => println!("{} sync of {repo} queued", "■".yellow().bold()),
            Some("coalesced") => println!(
                "{} sync of {repo} already running, follow-up queued",
                "■".magenta().bold()
            ),
            _ => println!(
                "{} {repo} synced: {}",
                "■".green().bold(),
                serde_json::to_string(&ack["outcome"]).context("failed to render sync outcome")?
            ),
        }
        Ok(())
    }
}
