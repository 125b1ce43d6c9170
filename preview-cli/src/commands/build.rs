//! `preview build`: build one page through the daemon.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use preview_core::BuildRequest;
use preview_daemon::request_build;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Repository owner (group or user).
    pub owner: String,

    /// Repository name.
    pub name: String,

    /// Page to build, e.g. `/blog/` or `/THEME=dark/about/`.
    pub permalink: String,

    /// Template to build instead of looking it up in the page list.
    #[arg(long)]
    pub template: Option<String>,

    /// Working copy to build from instead of the synced one.
    #[arg(long)]
    pub working_copy: Option<PathBuf>,
}

impl BuildArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let request = BuildRequest {
            owner: self.owner,
            name: self.name,
            permalink: self.permalink,
            template_path: self.template,
            working_copy: self.working_copy,
        };
        let response = request_build(&home, &request).context("build request failed")?;

        if let Some(content) = &response.content {
            println!("{content}");
            return Ok(());
        }
        if let Some(pages) = &response.pages {
            for page in pages {
                println!("{}\t{}", page.url, page.template_path);
            }
            return Ok(());
        }

        let label = match response.status {
            404 => "NOT FOUND".yellow().bold(),
            _ => "FAILED".red().bold(),
        };
        eprintln!(
            "{label} {}",
            response.error.as_deref().unwrap_or("no error message")
        );
        if !response.stdout.is_empty() {
            eprintln!("{}\n{}", "--- stdout".bright_black(), response.stdout);
        }
        if !response.stderr.is_empty() {
            eprintln!("{}\n{}", "--- stderr".bright_black(), response.stderr);
        }
        bail!("build returned status {}", response.status)
    }
}
