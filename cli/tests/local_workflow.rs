//! Integration test: build, inspect, fetch, render and assemble catalogs
//! without a registry.
//!
//! Commands are dispatched in-process against a package directory written
//! to a temp dir. The registry round trip at the bottom is `#[ignore]`d
//! because it needs a running registry:
//!
//! ```bash
//! docker run -d -p 5000:5000 registry:2
//! OLM_OCI_TEST_REGISTRY=localhost:5000 \
//!   cargo test -p olm-oci-cli --test local_workflow -- --ignored --nocapture
//! ```

use std::path::Path;

use std::sync::Arc;

use clap::Parser;
use olm_oci_cli::commands::{dispatch, Cli};
use olm_oci_runtime::{ArtifactFetcher, ContentStore, LayoutStore};
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn write_package(dir: &Path) {
    write(&dir.join("package.yaml"), "name: etcd\ndisplayName: etcd\n");
    write(&dir.join("README.md"), "# etcd\n");
    write(&dir.join("upgrade-edges.yaml"), "upgradeEdges:\n  1.0.0: [2.0.0]\n");
    for (version, release) in [("1.0.0", 0), ("2.0.0", 0)] {
        let bundle = dir.join(format!("bundles/v{version}-{release}"));
        write(
            &bundle.join("metadata/annotations.yaml"),
            &format!(
                "annotations:\n  \
                 io.operatorframework.bundle.package: etcd\n  \
                 io.operatorframework.bundle.version: {version}\n  \
                 io.operatorframework.bundle.release: \"{release}\"\n  \
                 io.operatorframework.bundle.content.mediatype: plain+v0\n"
            ),
        );
        write(&bundle.join("manifests/configmap.yaml"), "kind: ConfigMap\n");
    }
    write(&dir.join("channels/stable/channel.yaml"), "name: stable\n");
    write(&dir.join("channels/stable/entries.yaml"), "entries:\n- 1.0.0\n- 2.0.0\n");
}

async fn run(args: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = vec!["olm-oci"];
    argv.extend_from_slice(args);
    dispatch(Cli::try_parse_from(argv)?).await
}

#[tokio::test]
async fn test_build_writes_tagged_archive() {
    let tmp = TempDir::new().unwrap();
    let pkg = tmp.path().join("etcd");
    write_package(&pkg);
    let archive = tmp.path().join("etcd.tar");

    run(&["build", "package", pkg.to_str().unwrap(), "--output", archive.to_str().unwrap(), "--quiet"])
        .await
        .unwrap();

    let layout = LayoutStore::open_archive(&archive, &tmp.path().join("extracted")).unwrap();
    let tags = layout.tags().await;
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].0, "package");
    assert!(layout.exists(&tags[0].1).await.unwrap());

    run(&["inspect", &format!("{}:package", archive.display())]).await.unwrap();
    run(&["inspect", archive.to_str().unwrap()]).await.unwrap();
    assert!(run(&["inspect", &format!("{}:missing", archive.display())]).await.is_err());
}

#[tokio::test]
async fn test_build_twice_is_identical() {
    let tmp = TempDir::new().unwrap();
    let pkg = tmp.path().join("etcd");
    write_package(&pkg);

    let mut roots = Vec::new();
    for name in ["a.tar", "b.tar"] {
        let archive = tmp.path().join(name);
        run(&["build", "package", pkg.to_str().unwrap(), "-o", archive.to_str().unwrap(), "-q"])
            .await
            .unwrap();
        let layout = LayoutStore::open_archive(&archive, &tmp.path().join(format!("{name}.d"))).unwrap();
        roots.push(layout.resolve("package").await.unwrap());
    }
    assert_eq!(roots[0], roots[1]);
}

#[tokio::test]
async fn test_render_package() {
    let tmp = TempDir::new().unwrap();
    let pkg = tmp.path().join("etcd");
    write_package(&pkg);

    run(&["render", pkg.to_str().unwrap(), "quay.io/olm/etcd"]).await.unwrap();
    run(&["render", tmp.path().to_str().unwrap(), "oci://quay.io/olm/etcd"]).await.unwrap();
}

#[tokio::test]
async fn test_build_reports_load_errors() {
    let tmp = TempDir::new().unwrap();
    let pkg = tmp.path().join("etcd");
    write_package(&pkg);
    std::fs::remove_file(pkg.join("README.md")).unwrap();

    let err = run(&["build", "package", pkg.to_str().unwrap(), "-o", "unused.tar"]).await.unwrap_err();
    assert!(err.to_string().contains("README.md"));
}

#[tokio::test]
async fn test_fetch_archive() {
    let tmp = TempDir::new().unwrap();
    let pkg = tmp.path().join("etcd");
    write_package(&pkg);
    let archive = tmp.path().join("etcd.tar");
    run(&["build", "package", pkg.to_str().unwrap(), "-o", archive.to_str().unwrap(), "-q"])
        .await
        .unwrap();

    run(&["fetch", archive.to_str().unwrap()]).await.unwrap();
    run(&["fetch", &format!("{}:package", archive.display()), "--skip-content"]).await.unwrap();
    assert!(run(&["fetch", &format!("{}:missing", archive.display())]).await.is_err());

    // A lone blob root is not an OLM artifact.
    let layout = LayoutStore::open(tmp.path().join("blob")).unwrap();
    let readme = olm_oci_core::descriptor::Descriptor::from_bytes(olm_oci_core::media_type::MARKDOWN, b"# hi");
    layout.push_tagged(&readme, b"# hi".to_vec(), "readme").await.unwrap();
    let blob_archive = tmp.path().join("blob.tar");
    layout.save_archive(&blob_archive).unwrap();
    assert!(run(&["fetch", blob_archive.to_str().unwrap()]).await.is_err());
}

#[tokio::test]
async fn test_create_catalog_from_bundle_archives() {
    let tmp = TempDir::new().unwrap();
    let pkg = tmp.path().join("etcd");
    write_package(&pkg);
    let bundles = tmp.path().join("bundles");
    std::fs::create_dir_all(&bundles).unwrap();
    std::fs::write(bundles.join("notes.txt"), "not a bundle").unwrap();
    for version in ["1.0.0-0", "2.0.0-0"] {
        let dir = pkg.join(format!("bundles/v{version}"));
        let out = bundles.join(format!("etcd-{version}.oci.tar"));
        run(&["build", "bundle", dir.to_str().unwrap(), "-o", out.to_str().unwrap(), "-q"])
            .await
            .unwrap();
    }
    let catalog = tmp.path().join("catalog.tar");

    run(&["create-catalog", bundles.to_str().unwrap(), "-o", catalog.to_str().unwrap(), "-q"])
        .await
        .unwrap();

    let layout = Arc::new(LayoutStore::open_archive(&catalog, &tmp.path().join("extracted")).unwrap());
    let tags: Vec<String> = layout.tags().await.into_iter().map(|(tag, _)| tag).collect();
    assert_eq!(tags, vec!["catalog", "etcd", "etcd-1.0.0-0", "etcd-2.0.0-0"]);

    // The catalog references the very bundle graphs that were tagged.
    let root = layout.resolve("catalog").await.unwrap();
    let fetched = ArtifactFetcher::new(layout.clone()).fetch_catalog(&root).await.unwrap();
    assert_eq!(fetched.packages.len(), 1);
    let channel = &fetched.packages[0].channels[0];
    assert_eq!(channel.metadata.name, "default");
    let first = layout.resolve("etcd-1.0.0-0").await.unwrap();
    assert_eq!(channel.bundles[0].digest.as_deref(), Some(first.digest.as_str()));
    assert_eq!(channel.bundles[1].full_version(), "2.0.0-0");

    run(&["fetch", &format!("{}:catalog", catalog.display())]).await.unwrap();

    let err = run(&["create-catalog", bundles.to_str().unwrap(), "-o", catalog.to_str().unwrap()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
#[ignore]
async fn test_registry_round_trip() {
    let registry = std::env::var("OLM_OCI_TEST_REGISTRY").unwrap_or_else(|_| "localhost:5000".to_string());
    let tmp = TempDir::new().unwrap();
    let pkg = tmp.path().join("etcd");
    write_package(&pkg);
    let archive = tmp.path().join("etcd.tar");
    let source = format!("{registry}/olm-oci-test/etcd:v1");
    let mirror = format!("{registry}/olm-oci-test/etcd-mirror:v1");

    run(&["build", "package", pkg.to_str().unwrap(), "-o", archive.to_str().unwrap()]).await.unwrap();
    run(&["push-archive", archive.to_str().unwrap(), &source, "--plain-http"]).await.unwrap();
    run(&["copy", &source, &mirror, "--plain-http"]).await.unwrap();
    // Everything is present now; the second copy only rewrites the tag.
    run(&["copy", &source, &mirror, "--plain-http"]).await.unwrap();
    run(&["inspect", &mirror, "--plain-http"]).await.unwrap();
}
