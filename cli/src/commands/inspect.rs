//! `olm-oci inspect` command - Print the structure of an artifact graph.
//!
//! Accepts either a layout archive (`etcd.tar[:tag]`) or a registry
//! reference. Registry roots are first copied into the local cache layout
//! and inspected from there. Ctrl-C stops the walk.

use std::io::Write;

use clap::Args;
use olm_oci_runtime::Inspector;
use tokio_util::sync::CancellationToken;

use super::{open_target, watch_interrupt, Context};

#[derive(Args)]
pub struct InspectArgs {
    /// Layout archive ("etcd.tar[:tag]") or registry reference with a tag or digest
    pub target: String,
}

pub async fn execute(args: InspectArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let watcher = watch_interrupt(cancel.clone(), "inspect");

    // Holds an extracted archive for the duration of the walk.
    let workdir = tempfile::tempdir()?;
    let (store, root) = open_target(ctx, &args.target, workdir.path(), &cancel).await?;

    let inspector = Inspector::standard().with_cancellation(cancel);
    let mut out = std::io::stdout();
    let result = inspector.inspect(store.as_ref(), &root, &mut out).await;
    out.flush()?;
    watcher.abort();
    result?;
    Ok(())
}
