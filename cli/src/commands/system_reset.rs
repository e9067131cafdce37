//! `olm-oci system reset` command - Delete the local cache layout.

use clap::Args;

use super::Context;

#[derive(Args)]
pub struct SystemResetArgs {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub force: bool,
}

pub async fn execute(args: SystemResetArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let dir = &ctx.config.store_dir;
    if !args.force {
        println!("WARNING: This will remove the local cache at {}", dir.display());
        println!();
        println!("Use --force to skip this prompt.");
        return Ok(());
    }

    if !dir.exists() {
        println!("Nothing to remove.");
        return Ok(());
    }

    tokio::fs::remove_dir_all(dir)
        .await
        .map_err(|e| format!("Failed to remove {}: {e}", dir.display()))?;
    tracing::info!(path = %dir.display(), "Removed local cache");
    println!("Removed {}", dir.display());
    Ok(())
}
