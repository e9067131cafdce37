//! `olm-oci fetch` command - Read an OLM artifact back into its tree.
//!
//! Unlike `inspect`, which walks raw nodes, this decodes the root as a
//! catalog, package, channel or bundle and prints the reconstructed tree.
//! `--skip-content` leaves bundle content blobs unfetched.

use std::io::Write;

use clap::Args;
use olm_oci_core::descriptor::{ArtifactManifest, Descriptor};
use olm_oci_core::error::OciError;
use olm_oci_core::media_type;
use olm_oci_runtime::catalog::BundleContent;
use olm_oci_runtime::{ArtifactFetcher, Bundle, Catalog, Channel, ContentStore, Package};
use tokio_util::sync::CancellationToken;

use super::{open_target, watch_interrupt, Context};
use crate::output;

#[derive(Args)]
pub struct FetchArgs {
    /// Layout archive ("etcd.tar[:tag]") or registry reference with a tag or digest
    pub target: String,

    /// Do not fetch bundle content blobs
    #[arg(long)]
    pub skip_content: bool,
}

/// A fetched root, whichever level of the tree it is.
enum Fetched {
    Catalog(Catalog),
    Package(Package),
    Channel(Channel),
    Bundle(Bundle),
}

pub async fn execute(args: FetchArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancellationToken::new();
    let watcher = watch_interrupt(cancel.clone(), "fetch");

    let workdir = tempfile::tempdir()?;
    let (store, root) = open_target(ctx, &args.target, workdir.path(), &cancel).await?;

    let data = store.fetch(&root).await?;
    let manifest = ArtifactManifest::decode(&root, &data)?;

    let mut fetcher = ArtifactFetcher::new(store);
    if args.skip_content {
        fetcher = fetcher.skip_media_type(media_type::BUNDLE_CONTENT);
    }
    let fetched = tokio::select! {
        _ = cancel.cancelled() => Err(OciError::Cancelled),
        fetched = fetch_root(&fetcher, &root, &manifest.artifact_type) => fetched,
    };
    watcher.abort();
    let fetched = fetched?;

    let mut out = std::io::stdout();
    write_fetched(&mut out, &fetched)?;
    out.flush()?;
    Ok(())
}

async fn fetch_root(
    fetcher: &ArtifactFetcher,
    root: &Descriptor,
    artifact_type: &str,
) -> Result<Fetched, OciError> {
    let fetched = match artifact_type {
        media_type::CATALOG => Fetched::Catalog(fetcher.fetch_catalog(root).await?),
        media_type::PACKAGE => Fetched::Package(fetcher.fetch_package(root).await?),
        media_type::CHANNEL => Fetched::Channel(fetcher.fetch_channel(root).await?),
        media_type::BUNDLE => Fetched::Bundle(fetcher.fetch_bundle(root).await?),
        other => {
            return Err(OciError::Other(format!(
                "{} is not an OLM artifact (artifact type {:?})",
                root.digest, other
            )))
        }
    };
    Ok(fetched)
}

fn write_fetched(out: &mut impl Write, fetched: &Fetched) -> std::io::Result<()> {
    match fetched {
        Fetched::Catalog(catalog) => write_catalog(out, catalog),
        Fetched::Package(package) => write_package(out, package, ""),
        Fetched::Channel(channel) => write_channel(out, channel, ""),
        Fetched::Bundle(bundle) => write_bundle(out, bundle, ""),
    }
}

fn write_catalog(out: &mut impl Write, catalog: &Catalog) -> std::io::Result<()> {
    writeln!(out, "- Catalog:")?;
    writeln!(out, "  Packages:")?;
    for package in &catalog.packages {
        write_package(out, package, "    ")?;
    }
    Ok(())
}

fn write_package(out: &mut impl Write, package: &Package, indent: &str) -> std::io::Result<()> {
    writeln!(out, "{indent}- Package: {}", package.metadata.name)?;
    if !package.metadata.display_name.is_empty() {
        writeln!(out, "{indent}  Display Name: {}", package.metadata.display_name)?;
    }
    if let Some(icon) = &package.icon {
        writeln!(out, "{indent}  Icon: {} ({})", icon.media_type, output::format_bytes(icon.data.len() as u64))?;
    }
    if !package.upgrade_edges.is_empty() {
        writeln!(out, "{indent}  Upgrade Edges:")?;
        for (from, to) in &package.upgrade_edges {
            writeln!(out, "{indent}    {}: [{}]", from, to.join(", "))?;
        }
    }
    let child = format!("{indent}    ");
    writeln!(out, "{indent}  Channels:")?;
    for channel in &package.channels {
        write_channel(out, channel, &child)?;
    }
    Ok(())
}

fn write_channel(out: &mut impl Write, channel: &Channel, indent: &str) -> std::io::Result<()> {
    writeln!(out, "{indent}- Channel: {}", channel.metadata.name)?;
    let child = format!("{indent}    ");
    writeln!(out, "{indent}  Bundles:")?;
    for bundle in &channel.bundles {
        write_bundle(out, bundle, &child)?;
    }
    Ok(())
}

fn write_bundle(out: &mut impl Write, bundle: &Bundle, indent: &str) -> std::io::Result<()> {
    writeln!(out, "{indent}- Bundle: {} {}", bundle.metadata.package, bundle.full_version())?;
    if let Some(digest) = &bundle.digest {
        writeln!(out, "{indent}  Digest: {digest}")?;
    }
    writeln!(out, "{indent}  Content Media Type: {}", bundle.content_media_type)?;
    match &bundle.content {
        BundleContent::Archive(data) => {
            writeln!(out, "{indent}  Content: {}", output::format_bytes(data.len() as u64))?
        }
        BundleContent::Directory(dir) => writeln!(out, "{indent}  Content: {}", dir.display())?,
        BundleContent::Absent => writeln!(out, "{indent}  Content: not fetched")?,
    }
    if !bundle.related_images.is_empty() {
        writeln!(out, "{indent}  Related Images:")?;
        for image in &bundle.related_images {
            writeln!(out, "{indent}    - {}", image.image)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use olm_oci_runtime::catalog::{BundleMetadata, ChannelMetadata, PackageMetadata};
    use std::collections::BTreeMap;

    fn bundle(version: &str) -> Bundle {
        Bundle {
            metadata: BundleMetadata {
                package: "etcd".to_string(),
                version: version.parse().unwrap(),
                release: 0,
            },
            properties: Vec::new(),
            constraints: Vec::new(),
            related_images: Vec::new(),
            content_media_type: "plain+v0".to_string(),
            content: BundleContent::Absent,
            digest: Some("sha256:abc".to_string()),
        }
    }

    #[test]
    fn test_write_package_tree() {
        let package = Package {
            metadata: PackageMetadata {
                name: "etcd".to_string(),
                display_name: "etcd operator".to_string(),
                ..Default::default()
            },
            description: String::new(),
            icon: None,
            upgrade_edges: BTreeMap::from([("1.0.0-0".to_string(), vec!["2.0.0-0".to_string()])]),
            properties: Vec::new(),
            channels: vec![Channel {
                metadata: ChannelMetadata {
                    name: "stable".to_string(),
                },
                properties: Vec::new(),
                bundles: vec![bundle("1.0.0"), bundle("2.0.0")],
            }],
        };

        let mut out = Vec::new();
        write_fetched(&mut out, &Fetched::Package(package)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("- Package: etcd\n  Display Name: etcd operator\n"));
        assert!(text.contains("  Upgrade Edges:\n    1.0.0-0: [2.0.0-0]\n"));
        assert!(text.contains("    - Channel: stable\n      Bundles:\n        - Bundle: etcd 1.0.0-0\n"));
        assert!(text.contains("          Content: not fetched\n"));
        assert_eq!(text.matches("- Bundle:").count(), 2);
    }
}
