//! `olm-oci push` command - Build an artifact directory and push it to a registry.

use std::path::PathBuf;

use clap::Args;
use olm_oci_runtime::ImageReference;

use super::{ArtifactKind, Context};
use crate::output;

#[derive(Args)]
pub struct PushArgs {
    /// What the directory holds
    #[arg(value_enum)]
    pub kind: ArtifactKind,

    /// Artifact directory
    pub dir: PathBuf,

    /// Target reference (e.g., "quay.io/olm/etcd:v1"); the tag is optional
    pub reference: String,

    /// Only print the result
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PushArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.reference)?;
    if reference.digest.is_some() {
        return Err(format!("cannot push to digest reference '{}'", args.reference).into());
    }
    let artifact = args.kind.load(&args.dir)?;
    let target = ctx.remote(&reference);

    let events = ctx.events();
    let progress = output::spawn_progress(&events, args.quiet);
    let builder = ctx.builder(&events);
    drop(events);
    let result = builder.push(artifact, target, reference.tag.as_deref()).await;
    drop(builder);
    let _ = progress.await;
    let outcome = result?;

    println!("Digest: {}@{}", reference.repository_name(), outcome.descriptor.digest);
    if let Some(tag) = &reference.tag {
        println!("Tag: {}:{}", reference.repository_name(), tag);
    }
    if !args.quiet {
        println!("Transferred: {}", output::format_bytes(outcome.transferred));
    }
    Ok(())
}
