//! Human-readable graph inspection.
//!
//! Walks a graph depth-first from a root descriptor, fetching each node
//! exactly once when it is reached. Every node prints its media type,
//! digest and size; nodes with a registered decoder additionally print
//! type-specific fields and name the children to descend into, in the
//! order their manifest lists them.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use oci_spec::image::{ImageConfiguration, ImageIndex, ImageManifest};
use olm_oci_core::descriptor::{ArtifactManifest, Descriptor};
use olm_oci_core::error::{OciError, Result};
use olm_oci_core::media_type;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use super::registry::{decode_error, from_oci_descriptor};
use crate::catalog::content::{list_entries, mode_string};
use crate::catalog::model::{
    BundleMetadata, ChannelMetadata, PackageMetadata, RelatedImage, TypeValue, UpgradeEdges,
};
use crate::store::ContentStore;

/// One piece of a decoded node, in output order.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// A line of text, relative to the node's indentation.
    Line(String),
    /// A child node, rendered one level deeper.
    Child(Descriptor),
}

/// Decodes fetched content into output segments.
pub type DecodeFn = Arc<dyn Fn(&Descriptor, &[u8]) -> Result<Vec<Segment>> + Send + Sync>;

/// Renders graphs using per-media-type decoders.
#[derive(Clone, Default)]
pub struct Inspector {
    decoders: HashMap<String, DecodeFn>,
    cancel: CancellationToken,
}

impl Inspector {
    /// Inspector that prints only node headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspector decoding every OCI, Docker and operator-framework type.
    pub fn standard() -> Self {
        let mut inspector = Self::new();
        inspector
            .register(media_type::ARTIFACT_MANIFEST, decode_artifact_manifest)
            .register(media_type::PACKAGE_METADATA, decode_package_metadata)
            .register(media_type::CHANNEL_METADATA, decode_channel_metadata)
            .register(media_type::BUNDLE_METADATA, decode_bundle_metadata)
            .register(media_type::UPGRADE_EDGES, decode_upgrade_edges)
            .register(media_type::RELATED_IMAGES, decode_related_images)
            .register(media_type::BUNDLE_CONTENT, |d, data| list_files(d, data, "Bundle Content"))
            .register(media_type::PROPERTIES, |d, data| decode_type_values(d, data, "Properties"))
            .register(media_type::CONSTRAINTS, |d, data| decode_type_values(d, data, "Constraints"))
            .register(media_type::IMAGE_INDEX, decode_image_index)
            .register(media_type::DOCKER_MANIFEST_LIST, decode_manifest_list)
            .register(media_type::IMAGE_MANIFEST, decode_image_manifest)
            .register(media_type::DOCKER_MANIFEST, decode_image_manifest)
            .register(media_type::IMAGE_CONFIG, decode_image_config)
            .register(media_type::DOCKER_CONFIG, decode_image_config);
        for layer in [
            media_type::IMAGE_LAYER,
            media_type::IMAGE_LAYER_GZIP,
            media_type::DOCKER_LAYER,
        ] {
            inspector.register(layer, |d, data| list_files(d, data, "File Content"));
        }
        inspector
    }

    pub fn register<F>(&mut self, media_type: impl Into<String>, decode: F) -> &mut Self
    where
        F: Fn(&Descriptor, &[u8]) -> Result<Vec<Segment>> + Send + Sync + 'static,
    {
        self.decoders.insert(media_type.into(), Arc::new(decode));
        self
    }

    /// Stop the walk before the next fetch once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Render the graph rooted at `root` into `out`.
    ///
    /// Returns [`OciError::Cancelled`] if cancelled before the walk finished.
    pub async fn inspect<W: Write + Send>(
        &self,
        store: &dyn ContentStore,
        root: &Descriptor,
        out: &mut W,
    ) -> Result<()> {
        let result = self.walk(store, root.clone(), String::new(), out).await;
        if let Err(e) = &result {
            if e.is_cancelled() {
                tracing::info!(digest = %root.digest, "Inspect cancelled");
            }
        }
        result
    }

    fn walk<'a, W: Write + Send>(
        &'a self,
        store: &'a dyn ContentStore,
        desc: Descriptor,
        indent: String,
        out: &'a mut W,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if self.cancel.is_cancelled() {
                return Err(OciError::Cancelled);
            }

            writeln!(out, "{indent}- Media Type: {}", desc.media_type)?;
            writeln!(out, "{indent}  Digest: {}", desc.digest)?;
            writeln!(out, "{indent}  Size: {}", desc.size)?;

            let data = store.fetch(&desc).await?;
            let Some(decode) = self.decoders.get(&desc.media_type) else {
                return Ok(());
            };

            let child_indent = format!("{indent}    ");
            for segment in decode(&desc, &data)? {
                match segment {
                    Segment::Line(line) => writeln!(out, "{indent}{line}")?,
                    Segment::Child(child) => {
                        self.walk(store, child, child_indent.clone(), &mut *out).await?;
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }
}

fn line(text: impl Into<String>) -> Segment {
    Segment::Line(text.into())
}

fn yaml<T: DeserializeOwned>(desc: &Descriptor, data: &[u8]) -> Result<T> {
    serde_yaml::from_slice(data).map_err(|e| decode_error(desc, e))
}

fn json<T: DeserializeOwned>(desc: &Descriptor, data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| decode_error(desc, e))
}

fn sorted<V: Clone>(map: &Option<HashMap<String, V>>) -> BTreeMap<String, V> {
    map.as_ref()
        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn decode_artifact_manifest(desc: &Descriptor, data: &[u8]) -> Result<Vec<Segment>> {
    let manifest = ArtifactManifest::decode(desc, data)?;
    let mut out = vec![
        line(format!("  Artifact Type: {}", manifest.artifact_type)),
        line(format!("  Artifact Annotations: {:?}", manifest.annotations)),
        line("  Artifact Blobs:"),
    ];
    out.extend(manifest.blobs.into_iter().map(Segment::Child));
    Ok(out)
}

fn decode_package_metadata(desc: &Descriptor, data: &[u8]) -> Result<Vec<Segment>> {
    let m: PackageMetadata = yaml(desc, data)?;
    let mut out = vec![line("  Package Metadata:"), line(format!("    Name: {}", m.name))];
    if !m.display_name.is_empty() {
        out.push(line(format!("    DisplayName: {}", m.display_name)));
    }
    if !m.keywords.is_empty() {
        out.push(line(format!("    Keywords: [{}]", m.keywords.join(", "))));
    }
    if !m.urls.is_empty() {
        out.push(line(format!("    URLs: [{}]", m.urls.join(", "))));
    }
    if !m.maintainers.is_empty() {
        let maintainers: Vec<String> = m
            .maintainers
            .iter()
            .map(|mt| match mt.name.as_str() {
                "" => mt.email.clone(),
                name => format!("{} <{}>", name, mt.email),
            })
            .collect();
        out.push(line(format!("    Maintainers: [{}]", maintainers.join(", "))));
    }
    Ok(out)
}

fn decode_channel_metadata(desc: &Descriptor, data: &[u8]) -> Result<Vec<Segment>> {
    let m: ChannelMetadata = yaml(desc, data)?;
    Ok(vec![line("  Channel Metadata:"), line(format!("    Name: {}", m.name))])
}

fn decode_bundle_metadata(desc: &Descriptor, data: &[u8]) -> Result<Vec<Segment>> {
    let m: BundleMetadata = yaml(desc, data)?;
    Ok(vec![
        line("  Bundle Metadata:"),
        line(format!("    Package: {}", m.package)),
        line(format!("    Version: {}", m.version)),
        line(format!("    Release: {}", m.release)),
    ])
}

fn decode_upgrade_edges(desc: &Descriptor, data: &[u8]) -> Result<Vec<Segment>> {
    let edges: UpgradeEdges = yaml(desc, data)?;
    let mut out = vec![line("  Upgrade Edges:")];
    for (from, to) in edges {
        out.push(line(format!("    - From: {}", from)));
        out.push(line(format!("      To: {}", to.join(", "))));
    }
    Ok(out)
}

fn decode_related_images(desc: &Descriptor, data: &[u8]) -> Result<Vec<Segment>> {
    let images: Vec<RelatedImage> = yaml(desc, data)?;
    let mut out = vec![line("  Related Images:")];
    for image in images {
        out.push(line(format!("    - Image: {}", image.image)));
        if !image.name.is_empty() {
            out.push(line(format!("      Name: {}", image.name)));
        }
    }
    Ok(out)
}

fn decode_type_values(desc: &Descriptor, data: &[u8], title: &str) -> Result<Vec<Segment>> {
    let values: Vec<TypeValue> = match serde_yaml::from_slice(data) {
        Ok(values) => values,
        // Entries outside the type/value shape are shown as written.
        Err(e) => {
            let text = std::str::from_utf8(data).map_err(|_| decode_error(desc, e))?;
            let mut out = vec![line(format!("  {}:", title))];
            out.extend(text.lines().map(|l| line(format!("    {}", l))));
            return Ok(out);
        }
    };
    if values.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = vec![line(format!("  {}:", title))];
    for tv in values {
        out.push(line(format!("    Type: {}", tv.type_)));
        out.push(line(format!("    Value: {}", tv.value)));
    }
    Ok(out)
}

fn list_files(desc: &Descriptor, data: &[u8], title: &str) -> Result<Vec<Segment>> {
    let entries = list_entries(data).map_err(|e| decode_error(desc, e))?;
    let mut out = vec![line(format!("  {}:", title))];
    for entry in entries {
        out.push(line(format!("    - Path: {}", entry.path)));
        out.push(line(format!("      Mode: {}", mode_string(entry.mode))));
        out.push(line(format!("      Size: {}", entry.size)));
    }
    Ok(out)
}

fn decode_image_index(desc: &Descriptor, data: &[u8]) -> Result<Vec<Segment>> {
    let index: ImageIndex = json(desc, data)?;
    let mut out = vec![
        line(format!("  Image Index Annotations: {:?}", sorted(index.annotations()))),
        line("  Image Index Manifests:"),
    ];
    out.extend(index.manifests().iter().map(|m| Segment::Child(from_oci_descriptor(m))));
    Ok(out)
}

fn decode_manifest_list(desc: &Descriptor, data: &[u8]) -> Result<Vec<Segment>> {
    let list: ImageIndex = json(desc, data)?;
    let mut out = vec![line("  Manifest List Manifests:")];
    out.extend(list.manifests().iter().map(|m| Segment::Child(from_oci_descriptor(m))));
    Ok(out)
}

fn decode_image_manifest(desc: &Descriptor, data: &[u8]) -> Result<Vec<Segment>> {
    let manifest: ImageManifest = json(desc, data)?;
    let mut out = vec![
        line("  Image Config:"),
        Segment::Child(from_oci_descriptor(manifest.config())),
        line("  Image Manifest Layers:"),
    ];
    out.extend(manifest.layers().iter().map(|l| Segment::Child(from_oci_descriptor(l))));
    Ok(out)
}

fn decode_image_config(desc: &Descriptor, data: &[u8]) -> Result<Vec<Segment>> {
    let image: ImageConfiguration = json(desc, data)?;
    let mut out = vec![line(format!(
        "  Author: {}",
        image.author().as_deref().unwrap_or_default()
    ))];
    if let Some(created) = image.created() {
        out.push(line(format!("  Created: {}", created)));
    }
    out.push(line(format!("  OS: {}", image.os())));
    if let Some(os_version) = image.os_version() {
        out.push(line(format!("  OS Version: {}", os_version)));
    }
    if let Some(features) = image.os_features().as_ref().filter(|f| !f.is_empty()) {
        out.push(line(format!("  OS Features: [{}]", features.join(","))));
    }
    out.push(line(format!("  Architecture: {}", image.architecture())));

    out.push(line("  RootFS:"));
    out.push(line(format!("      Type: {}", image.rootfs().typ())));
    out.push(line("      DiffIDs:"));
    for id in image.rootfs().diff_ids() {
        out.push(line(format!("          {}", id)));
    }

    out.push(line("  Config:"));
    if let Some(config) = image.config() {
        let labels = sorted(config.labels());
        if !labels.is_empty() {
            out.push(line(format!("      Labels: {:?}", labels)));
        }
        out.push(line(format!("      User: {}", config.user().as_deref().unwrap_or_default())));
        if let Some(cmd) = config.cmd().as_ref().filter(|c| !c.is_empty()) {
            out.push(line(format!("      Cmd: {:?}", cmd)));
        }
        out.push(line("      Env:"));
        for env in config.env().iter().flatten() {
            out.push(line(format!("          {}", env)));
        }
        out.push(line(format!(
            "      Entrypoint: {:?}",
            config.entrypoint().clone().unwrap_or_default()
        )));
        if let Some(ports) = config.exposed_ports().as_ref().filter(|p| !p.is_empty()) {
            out.push(line(format!("      ExposedPorts: {:?}", ports)));
        }
        out.push(line(format!(
            "      WorkingDir: {}",
            config.working_dir().as_deref().unwrap_or_default()
        )));
        if let Some(volumes) = config.volumes().as_ref().filter(|v| !v.is_empty()) {
            out.push(line(format!("      Volumes: {:?}", volumes)));
        }
        if let Some(signal) = config.stop_signal() {
            out.push(line(format!("      StopSignal: {}", signal)));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::tests::bundle;
    use crate::graph::GraphBuilder;
    use crate::store::MemoryStore;

    async fn render(inspector: &Inspector, store: &MemoryStore, root: &Descriptor) -> Result<String> {
        let mut out = Vec::new();
        inspector.inspect(store, root, &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_bundle_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let root = GraphBuilder::default()
            .stage(Arc::new(bundle("1.2.3", 4)), store.clone())
            .await
            .unwrap();

        let text = render(&Inspector::standard(), &store, &root).await.unwrap();
        assert!(text.starts_with(&format!(
            "- Media Type: {}\n  Digest: {}\n",
            media_type::ARTIFACT_MANIFEST,
            root.digest
        )));
        assert!(text.contains(&format!("  Artifact Type: {}\n", media_type::BUNDLE)));
        assert!(text.contains("      Bundle Metadata:\n        Package: etcd\n        Version: 1.2.3\n        Release: 4\n"));
    }

    #[tokio::test]
    async fn test_irregular_properties_print_raw() {
        let data = b"- name: olm.package\n  tags: [a, b]\n";
        let store = MemoryStore::new();
        let desc = Descriptor::from_bytes(media_type::PROPERTIES, data);
        store.push(&desc, data.to_vec()).await.unwrap();

        let text = render(&Inspector::standard(), &store, &desc).await.unwrap();
        assert!(text.contains("  Properties:\n    - name: olm.package\n      tags: [a, b]\n"));
    }

    #[tokio::test]
    async fn test_unknown_type_prints_header_only() {
        let store = MemoryStore::new();
        let desc = Descriptor::from_bytes("application/x-unknown", b"data");
        store.push(&desc, b"data".to_vec()).await.unwrap();

        let text = render(&Inspector::standard(), &store, &desc).await.unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.ends_with("  Size: 4\n"));
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let store = MemoryStore::new();
        let desc = Descriptor::from_bytes(media_type::MARKDOWN, b"# hi");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let inspector = Inspector::standard().with_cancellation(cancel);
        let err = render(&inspector, &store, &desc).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_missing_child_is_error() {
        let store = MemoryStore::new();
        let child = Descriptor::from_bytes(media_type::MARKDOWN, b"absent");
        let manifest = ArtifactManifest::new(media_type::PACKAGE, vec![child], BTreeMap::new());
        let (desc, bytes) = manifest.encode().unwrap();
        store.push(&desc, bytes).await.unwrap();

        let err = render(&Inspector::standard(), &store, &desc).await.unwrap_err();
        assert!(matches!(err, OciError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_image_manifest() {
        let store = MemoryStore::new();
        let config = serde_json::to_vec(&serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "rootfs": {"type": "layers", "diff_ids": ["sha256:1111"]},
            "config": {"User": "1001", "Entrypoint": ["/manager"], "Env": ["PATH=/bin"]}
        }))
        .unwrap();
        let config_desc = Descriptor::from_bytes(media_type::IMAGE_CONFIG, &config);
        store.push(&config_desc, config).await.unwrap();

        let manifest = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": media_type::IMAGE_MANIFEST,
            "config": config_desc,
            "layers": []
        }))
        .unwrap();
        let manifest_desc = Descriptor::from_bytes(media_type::IMAGE_MANIFEST, &manifest);
        store.push(&manifest_desc, manifest).await.unwrap();

        let text = render(&Inspector::standard(), &store, &manifest_desc).await.unwrap();
        let expected_config = format!(
            "  Image Config:\n    - Media Type: {}\n",
            media_type::IMAGE_CONFIG
        );
        assert!(text.contains(&expected_config));
        assert!(text.contains("      OS: linux\n      Architecture: amd64\n"));
        assert!(text.contains("          User: 1001\n"));
        assert!(text.contains("          Entrypoint: [\"/manager\"]\n"));
        assert!(text.ends_with("  Image Manifest Layers:\n"));
    }
}
