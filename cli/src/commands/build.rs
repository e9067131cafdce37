//! `olm-oci build` command - Build an artifact directory into a layout archive.
//!
//! The archive is a tar of an OCI image layout holding the whole graph, with
//! the root tagged by the artifact kind (or `--tag`). It can be pushed later
//! with `olm-oci push-archive`.

use std::path::PathBuf;

use clap::Args;
use olm_oci_runtime::LayoutStore;

use super::{ArtifactKind, Context};
use crate::output;

#[derive(Args)]
pub struct BuildArgs {
    /// What the directory holds
    #[arg(value_enum)]
    pub kind: ArtifactKind,

    /// Artifact directory
    pub dir: PathBuf,

    /// Output archive path (e.g., "etcd.tar")
    #[arg(short, long)]
    pub output: PathBuf,

    /// Tag for the root inside the archive (defaults to the kind)
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Only print the result
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: BuildArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let artifact = args.kind.load(&args.dir)?;
    let tag = args.tag.clone().unwrap_or_else(|| args.kind.name().to_string());

    let workdir = tempfile::tempdir()?;
    let layout = std::sync::Arc::new(LayoutStore::open(workdir.path().join("layout"))?);

    let events = ctx.events();
    let progress = output::spawn_progress(&events, args.quiet);
    let builder = ctx.builder(&events);
    drop(events);
    let result = builder.push(artifact, layout.clone(), Some(&tag)).await;
    drop(builder);
    let _ = progress.await;
    let outcome = result?;

    layout.save_archive(&args.output)?;
    let size = std::fs::metadata(&args.output).map(|m| m.len()).unwrap_or(0);

    let out = args.output.display();
    println!("Digest: {out}@{}", outcome.descriptor.digest);
    println!("Tag: {out}:{tag}");
    if !args.quiet {
        println!("Size: {}", output::format_bytes(size));
    }
    Ok(())
}
