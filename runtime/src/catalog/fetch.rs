//! Rebuild catalog artifacts from a content store.

use std::collections::BTreeSet;
use std::sync::Arc;

use olm_oci_core::descriptor::{ArtifactManifest, Descriptor};
use olm_oci_core::error::{OciError, Result};
use olm_oci_core::media_type::{self, annotations};
use serde::de::DeserializeOwned;

use super::model::{
    Bundle, BundleContent, BundleMetadata, Catalog, Channel, ChannelMetadata, Icon, Package,
    PackageMetadata, RelatedImage, TypeValue, UpgradeEdges,
};
use crate::graph::registry::decode_error;
use crate::store::ContentStore;

/// Reads artifact manifests and their blobs back into the domain model.
///
/// Blobs whose media type was marked skipped are never fetched; skipping
/// [`media_type::BUNDLE_CONTENT`] yields sparse bundles that carry their
/// recorded digest but no content.
pub struct ArtifactFetcher {
    store: Arc<dyn ContentStore>,
    skip: BTreeSet<String>,
}

impl ArtifactFetcher {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            skip: BTreeSet::new(),
        }
    }

    pub fn skip_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.skip.insert(media_type.into());
        self
    }

    fn skipped(&self, desc: &Descriptor) -> bool {
        self.skip.contains(&desc.media_type)
    }

    /// Fetch and decode an artifact manifest of the given artifact type.
    async fn manifest(&self, desc: &Descriptor, artifact_type: &str) -> Result<ArtifactManifest> {
        if desc.media_type != media_type::ARTIFACT_MANIFEST {
            return Err(decode_error(
                desc,
                format!("expected {:?}, got {:?}", media_type::ARTIFACT_MANIFEST, desc.media_type),
            ));
        }
        let data = self.store.fetch(desc).await?;
        let manifest = ArtifactManifest::decode(desc, &data)?;
        if manifest.artifact_type != artifact_type {
            return Err(decode_error(
                desc,
                format!(
                    "expected artifact type {:?}, got {:?}",
                    artifact_type, manifest.artifact_type
                ),
            ));
        }
        Ok(manifest)
    }

    async fn yaml<T: DeserializeOwned>(&self, desc: &Descriptor) -> Result<T> {
        let data = self.store.fetch(desc).await?;
        serde_yaml::from_slice(&data).map_err(|e| decode_error(desc, e))
    }

    pub async fn fetch_catalog(&self, desc: &Descriptor) -> Result<Catalog> {
        let manifest = self.manifest(desc, media_type::CATALOG).await?;
        let mut packages = Vec::with_capacity(manifest.blobs.len());
        for child in &manifest.blobs {
            if self.skipped(child) {
                continue;
            }
            packages.push(self.fetch_package(child).await?);
        }
        Ok(Catalog { packages })
    }

    pub async fn fetch_package(&self, desc: &Descriptor) -> Result<Package> {
        let manifest = self.manifest(desc, media_type::PACKAGE).await?;

        let mut metadata: Option<PackageMetadata> = None;
        let mut package = Package {
            metadata: PackageMetadata::default(),
            description: String::new(),
            icon: None,
            upgrade_edges: UpgradeEdges::new(),
            properties: Vec::new(),
            channels: Vec::new(),
        };

        for blob in &manifest.blobs {
            if self.skipped(blob) {
                continue;
            }
            match blob.media_type.as_str() {
                media_type::ARTIFACT_MANIFEST => package.channels.push(self.fetch_channel(blob).await?),
                media_type::PACKAGE_METADATA => metadata = Some(self.yaml(blob).await?),
                media_type::UPGRADE_EDGES => package.upgrade_edges = self.yaml(blob).await?,
                media_type::PROPERTIES => package.properties = self.yaml::<Vec<TypeValue>>(blob).await?,
                media_type::MARKDOWN => {
                    let data = self.store.fetch(blob).await?;
                    package.description = String::from_utf8(data).map_err(|e| decode_error(blob, e))?;
                }
                media_type::SVG | media_type::PNG => {
                    package.icon = Some(Icon {
                        data: self.store.fetch(blob).await?,
                        media_type: blob.media_type.clone(),
                    });
                }
                _ => return Err(unsupported(blob)),
            }
        }

        package.metadata = metadata.ok_or_else(|| decode_error(desc, "package has no metadata blob"))?;
        Ok(package)
    }

    pub async fn fetch_channel(&self, desc: &Descriptor) -> Result<Channel> {
        let manifest = self.manifest(desc, media_type::CHANNEL).await?;

        let mut metadata: Option<ChannelMetadata> = None;
        let mut properties = Vec::new();
        let mut bundles = Vec::new();

        for blob in &manifest.blobs {
            if self.skipped(blob) {
                continue;
            }
            match blob.media_type.as_str() {
                media_type::ARTIFACT_MANIFEST => bundles.push(self.fetch_bundle(blob).await?),
                media_type::CHANNEL_METADATA => metadata = Some(self.yaml(blob).await?),
                media_type::PROPERTIES => properties = self.yaml(blob).await?,
                _ => return Err(unsupported(blob)),
            }
        }

        Ok(Channel {
            metadata: metadata.ok_or_else(|| decode_error(desc, "channel has no metadata blob"))?,
            properties,
            bundles,
        })
    }

    pub async fn fetch_bundle(&self, desc: &Descriptor) -> Result<Bundle> {
        let manifest = self.manifest(desc, media_type::BUNDLE).await?;

        let mut metadata: Option<BundleMetadata> = None;
        let mut properties = Vec::new();
        let mut constraints = Vec::new();
        let mut related_images: Vec<RelatedImage> = Vec::new();
        let mut content = BundleContent::Absent;

        for blob in &manifest.blobs {
            if self.skipped(blob) {
                continue;
            }
            match blob.media_type.as_str() {
                media_type::BUNDLE_METADATA => metadata = Some(self.yaml(blob).await?),
                media_type::PROPERTIES => properties = self.yaml(blob).await?,
                media_type::CONSTRAINTS => constraints = self.yaml(blob).await?,
                media_type::RELATED_IMAGES => related_images = self.yaml(blob).await?,
                media_type::BUNDLE_CONTENT => {
                    content = BundleContent::Archive(Arc::from(self.store.fetch(blob).await?));
                }
                _ => return Err(unsupported(blob)),
            }
        }

        tracing::debug!(digest = %desc.digest, sparse = content.is_absent(), "Fetched bundle");

        Ok(Bundle {
            metadata: metadata.ok_or_else(|| decode_error(desc, "bundle has no metadata blob"))?,
            properties,
            constraints,
            related_images,
            content_media_type: manifest
                .annotations
                .get(annotations::BUNDLE_CONTENT_MEDIA_TYPE)
                .cloned()
                .unwrap_or_default(),
            content,
            digest: Some(desc.digest.clone()),
        })
    }
}

fn unsupported(desc: &Descriptor) -> OciError {
    OciError::UnsupportedMediaType {
        media_type: desc.media_type.clone(),
        digest: desc.digest.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::loader::{load_package, tests::write_package};
    use crate::graph::GraphBuilder;
    use crate::store::MemoryStore;
    use olm_oci_core::descriptor::Descriptor;
    use tempfile::TempDir;

    async fn pushed_package() -> (TempDir, Arc<MemoryStore>, Descriptor, Package) {
        let tmp = TempDir::new().unwrap();
        write_package(tmp.path());
        let pkg = load_package(tmp.path()).unwrap();

        let store = Arc::new(MemoryStore::new());
        let desc = GraphBuilder::default()
            .stage(Arc::new(pkg.clone()), store.clone())
            .await
            .unwrap();
        (tmp, store, desc, pkg)
    }

    #[tokio::test]
    async fn test_fetch_package_roundtrip() {
        let (_tmp, store, desc, original) = pushed_package().await;

        let fetched = ArtifactFetcher::new(store.clone()).fetch_package(&desc).await.unwrap();
        assert_eq!(fetched.metadata, original.metadata);
        assert_eq!(fetched.description, original.description);
        assert_eq!(fetched.icon, original.icon);
        assert_eq!(fetched.upgrade_edges, original.upgrade_edges);
        assert_eq!(fetched.channels.len(), 1);
        assert_eq!(fetched.channels[0].bundles.len(), 3);

        // Rebuilding the fetched tree yields the same root.
        let rebuilt = GraphBuilder::default()
            .dry_push(Arc::new(fetched))
            .await
            .unwrap();
        assert_eq!(rebuilt.digest, desc.digest);
    }

    #[tokio::test]
    async fn test_fetch_sparse_bundles() {
        let (_tmp, store, desc, _) = pushed_package().await;

        let fetched = ArtifactFetcher::new(store)
            .skip_media_type(media_type::BUNDLE_CONTENT)
            .fetch_package(&desc)
            .await
            .unwrap();
        let bundle = &fetched.channels[0].bundles[0];
        assert!(bundle.content.is_absent());
        assert!(bundle.digest.as_deref().unwrap().starts_with("sha256:"));
        assert_eq!(bundle.content_media_type, "plain+v0");
    }

    #[tokio::test]
    async fn test_wrong_artifact_type() {
        let (_tmp, store, desc, _) = pushed_package().await;
        let err = ArtifactFetcher::new(store).fetch_bundle(&desc).await.unwrap_err();
        assert!(err.to_string().contains("expected artifact type"));
    }

    #[tokio::test]
    async fn test_unknown_blob_rejected() {
        let store = Arc::new(MemoryStore::new());
        let blob = Descriptor::from_bytes("application/x-unknown", b"?");
        store.push(&blob, b"?".to_vec()).await.unwrap();
        let manifest = ArtifactManifest::new(media_type::CHANNEL, vec![blob], Default::default());
        let (desc, bytes) = manifest.encode().unwrap();
        store.push(&desc, bytes).await.unwrap();

        let err = ArtifactFetcher::new(store).fetch_channel(&desc).await.unwrap_err();
        assert!(matches!(err, OciError::UnsupportedMediaType { .. }));
    }
}
