//! `olm-oci push-archive` command - Push a root out of a layout archive.

use clap::Args;
use olm_oci_runtime::{ImageReference, LayoutStore};

use super::{layout_root, split_archive_ref, Context};
use crate::output;

#[derive(Args)]
pub struct PushArchiveArgs {
    /// Layout archive, optionally with the tag of the root to push ("etcd.tar:package")
    pub archive: String,

    /// Target reference (e.g., "quay.io/olm/etcd:v1"); the tag is optional
    pub reference: String,

    /// Only print the result
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: PushArchiveArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.reference)?;
    if reference.digest.is_some() {
        return Err(format!("cannot push to digest reference '{}'", args.reference).into());
    }
    let (archive, tag) = split_archive_ref(&args.archive);

    let workdir = tempfile::tempdir()?;
    let layout = std::sync::Arc::new(LayoutStore::open_archive(&archive, workdir.path())?);
    let root = layout_root(&layout, tag.as_deref()).await?;
    let target = ctx.remote(&reference);

    let events = ctx.events();
    let progress = output::spawn_progress(&events, args.quiet);
    let copier = ctx.copier(&events);
    drop(events);
    let result = copier.copy(layout, target, &root, reference.tag.as_deref()).await;
    drop(copier);
    let _ = progress.await;
    let transferred = result?;

    println!("Digest: {}@{}", reference.repository_name(), root.digest);
    if let Some(tag) = &reference.tag {
        println!("Tag: {}:{}", reference.repository_name(), tag);
    }
    if !args.quiet {
        println!("Transferred: {}", output::format_bytes(transferred));
    }
    Ok(())
}
