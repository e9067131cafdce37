//! `olm-oci copy` command - Copy an artifact graph between repositories.
//!
//! Nodes already present at the destination are skipped together with
//! everything beneath them.

use clap::Args;
use olm_oci_runtime::ImageReference;

use super::{remote_root, Context};
use crate::output;

#[derive(Args)]
pub struct CopyArgs {
    /// Source reference with a tag or digest
    pub source: String,

    /// Destination reference; the tag is optional
    pub destination: String,

    /// Only print the result
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: CopyArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let source = ImageReference::parse(&args.source)?;
    let destination = ImageReference::parse(&args.destination)?;
    if destination.digest.is_some() {
        return Err(format!("cannot copy to digest reference '{}'", args.destination).into());
    }

    let src = ctx.remote(&source);
    let root = remote_root(&src, &source).await?;
    let dest = ctx.remote(&destination);

    let events = ctx.events();
    let progress = output::spawn_progress(&events, args.quiet);
    let copier = ctx.copier(&events);
    drop(events);
    let result = copier.copy(src, dest, &root, destination.tag.as_deref()).await;
    drop(copier);
    let _ = progress.await;
    let transferred = result?;

    println!("Digest: {}@{}", destination.repository_name(), root.digest);
    if !args.quiet {
        println!("Transferred: {}", output::format_bytes(transferred));
    }
    Ok(())
}
