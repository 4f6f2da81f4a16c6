//! CLI command definitions and dispatch.

mod digest;
mod version;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// stagekey: cache keys for multi-stage Dockerfile builds.
#[derive(Parser)]
#[command(name = "stagekey", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Compute the digest of a Dockerfile's target stage
    Digest(digest::DigestArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Return the path to the image store directory (~/.stagekey/images).
pub(crate) fn images_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".stagekey"))
        .unwrap_or_else(|| PathBuf::from(".stagekey"))
        .join("images")
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Digest(args) => digest::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
