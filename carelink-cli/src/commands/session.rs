//! Session command for operator actions on the resumption slot

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

/// Arguments for the session command
#[derive(Debug, Args)]
pub struct SessionArgs {
    #[command(subcommand)]
    pub command: SessionCommand,
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Wipe the saved resumption handle on a running server
    Clear {
        /// Base URL of the carelink server
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        server: String,
    },
}

/// Run the session command
pub async fn run(args: SessionArgs) -> Result<()> {
    match args.command {
        SessionCommand::Clear { server } => clear(&server).await,
    }
}

async fn clear(server: &str) -> Result<()> {
    let url = format!("{}/api/session", server.trim_end_matches('/'));
    reqwest::Client::new()
        .delete(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?
        .error_for_status()
        .context("server rejected the clear request")?;
    println!("Saved session cleared");
    Ok(())
}
