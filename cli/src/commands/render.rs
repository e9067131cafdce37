//! `olm-oci render` command - Print the declarative config for a directory.
//!
//! Bundle images point at `<repo>@<digest>`, with digests computed by a dry
//! push; nothing is written anywhere.

use std::path::PathBuf;

use clap::Args;
use olm_oci_runtime::{load_catalog, load_package, DeclarativeConfig, GraphBuilder};

use super::Context;

#[derive(Args)]
pub struct RenderArgs {
    /// Package directory, or a catalog directory of packages
    pub dir: PathBuf,

    /// Repository the bundles will be pushed to (e.g., "quay.io/olm/etcd")
    pub repo: String,
}

pub async fn execute(args: RenderArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let builder = GraphBuilder::new(ctx.config.concurrency);
    let repo = args.repo.trim_start_matches("oci://");

    let config: DeclarativeConfig = if args.dir.join("package.yaml").is_file() {
        load_package(&args.dir)?.to_declarative_config(repo, &builder).await?
    } else {
        load_catalog(&args.dir)?.to_declarative_config(repo, &builder).await?
    };

    print!("{}", config.to_yaml()?);
    Ok(())
}
