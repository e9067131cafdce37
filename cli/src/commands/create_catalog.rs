//! `olm-oci create-catalog` command - Assemble a catalog from bundle archives.
//!
//! Every `*.oci.tar` file under the input directory must be a layout
//! archive whose `bundle` tag names a bundle (as written by
//! `olm-oci build bundle`). Each bundle graph is copied into the catalog
//! layout and tagged `<package>-<version>-<release>`. Bundles are grouped
//! by package into a single channel per package; each package is tagged
//! with its name and the catalog root with `--tag`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use olm_oci_core::descriptor::Descriptor;
use olm_oci_core::event::EventEmitter;
use olm_oci_runtime::catalog::{ChannelMetadata, PackageMetadata, UpgradeEdges};
use olm_oci_runtime::{ArtifactFetcher, Bundle, Catalog, Channel, ContentStore, LayoutStore, Package};

use super::Context;
use crate::output;

/// Suffix of the bundle archives picked up from the input directory.
const BUNDLE_ARCHIVE_SUFFIX: &str = ".oci.tar";

/// Tag of the bundle root inside each input archive.
const BUNDLE_TAG: &str = "bundle";

#[derive(Args)]
pub struct CreateCatalogArgs {
    /// Directory searched recursively for bundle archives
    pub dir: PathBuf,

    /// Output archive path (e.g., "catalog.tar"); must not exist yet
    #[arg(short, long)]
    pub output: PathBuf,

    /// Tag for the catalog root inside the archive
    #[arg(short, long, default_value = "catalog")]
    pub tag: String,

    /// Name of the channel holding each package's bundles
    #[arg(long, default_value = "default")]
    pub channel: String,

    /// Only print the result
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: CreateCatalogArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    if args.output.exists() {
        return Err(format!("output file already exists: {}", args.output.display()).into());
    }
    let archives = find_bundle_archives(&args.dir)?;
    if archives.is_empty() {
        return Err(format!("no {BUNDLE_ARCHIVE_SUFFIX} files under {}", args.dir.display()).into());
    }

    let workdir = tempfile::tempdir()?;
    let layout = Arc::new(LayoutStore::open(workdir.path().join("catalog"))?);

    let events = ctx.events();
    let progress = output::spawn_progress(&events, args.quiet);
    let result = assemble(&args, ctx, &events, &archives, workdir.path(), layout.clone()).await;
    drop(events);
    let _ = progress.await;
    let root = result?;

    layout.save_archive(&args.output)?;

    let out = args.output.display();
    println!("Digest: {out}@{}", root.digest);
    println!("Tag: {out}:{}", args.tag);
    Ok(())
}

async fn assemble(
    args: &CreateCatalogArgs,
    ctx: &Context,
    events: &EventEmitter,
    archives: &[PathBuf],
    workdir: &Path,
    layout: Arc<LayoutStore>,
) -> Result<Descriptor, Box<dyn std::error::Error>> {
    let copier = ctx.copier(events);
    let mut by_package: BTreeMap<String, Vec<Bundle>> = BTreeMap::new();

    for (i, path) in archives.iter().enumerate() {
        let source = Arc::new(LayoutStore::open_archive(path, &workdir.join(format!("bundle-{i}")))?);
        let root = source
            .resolve(BUNDLE_TAG)
            .await
            .map_err(|e| format!("{}: {e}", path.display()))?;
        let bundle = ArtifactFetcher::new(source.clone())
            .fetch_bundle(&root)
            .await
            .map_err(|e| format!("{}: {e}", path.display()))?;

        let tag = format!("{}-{}", bundle.metadata.package, bundle.full_version());
        copier.copy(source, layout.clone(), &root, Some(&tag)).await?;
        tracing::debug!(archive = %path.display(), tag, "Added bundle to catalog");
        if !args.quiet {
            println!("Copied bundle {} to catalog at tag {tag}", path.display());
        }
        by_package.entry(bundle.metadata.package.clone()).or_default().push(bundle);
    }

    let builder = ctx.builder(events);
    let mut packages = Vec::with_capacity(by_package.len());
    for (name, bundles) in by_package {
        let package = package_of(&name, &args.channel, bundles);
        builder.push(Arc::new(package.clone()), layout.clone(), Some(&name)).await?;
        packages.push(package);
    }

    let outcome = builder
        .push(Arc::new(Catalog { packages }), layout, Some(&args.tag))
        .await?;
    Ok(outcome.descriptor)
}

/// A package named `name` holding `bundles` in one channel, oldest first.
fn package_of(name: &str, channel: &str, mut bundles: Vec<Bundle>) -> Package {
    bundles.sort_by(|a, b| {
        (&a.metadata.version, a.metadata.release).cmp(&(&b.metadata.version, b.metadata.release))
    });
    Package {
        metadata: PackageMetadata {
            name: name.to_string(),
            display_name: name.to_string(),
            ..Default::default()
        },
        description: String::new(),
        icon: None,
        upgrade_edges: UpgradeEdges::new(),
        properties: Vec::new(),
        channels: vec![Channel {
            metadata: ChannelMetadata {
                name: channel.to_string(),
            },
            properties: Vec::new(),
            bundles,
        }],
    }
}

/// Bundle archives under `dir`, sorted by path.
fn find_bundle_archives(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(BUNDLE_ARCHIVE_SUFFIX))
            {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}
