//! Catalog, package, channel and bundle artifacts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use olm_oci_core::error::{OciError, Result};
use olm_oci_core::media_type::{self, annotations};
use serde::{Deserialize, Serialize};

use super::content;
use crate::graph::{Artifact, Blob, BytesBlob, YamlBlob};

/// Expanded upgrade edges, keyed by full version (`<version>-<release>`).
pub type UpgradeEdges = BTreeMap<String, Vec<String>>;

/// A `{type, value}` pair used for properties and constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeValue {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub package: String,
    pub version: semver::Version,
    #[serde(default)]
    pub release: u64,
}

impl BundleMetadata {
    /// `<version>-<release>`, the key used by upgrade edges and channel entries.
    pub fn full_version(&self) -> String {
        format!("{}-{}", self.version, self.release)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelatedImage {
    pub image: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    pub data: Vec<u8>,
    pub media_type: String,
}

/// Where a bundle's packaged content comes from.
#[derive(Debug, Clone)]
pub enum BundleContent {
    /// A bundle directory, packaged when read.
    Directory(PathBuf),
    /// Already-packaged `tar+gzip` bytes, e.g. fetched from a store.
    Archive(Arc<[u8]>),
    /// Skipped while fetching; the bundle cannot be pushed again.
    Absent,
}

impl BundleContent {
    pub fn is_absent(&self) -> bool {
        matches!(self, BundleContent::Absent)
    }

    /// The packaged bytes.
    pub async fn read(&self) -> Result<Vec<u8>> {
        match self {
            BundleContent::Directory(dir) => {
                let dir = dir.clone();
                tokio::task::spawn_blocking(move || content::pack_directory(&dir))
                    .await
                    .map_err(|e| OciError::BlobData {
                        media_type: media_type::BUNDLE_CONTENT.to_string(),
                        message: format!("packaging task failed: {}", e),
                    })?
            }
            BundleContent::Archive(data) => Ok(data.to_vec()),
            BundleContent::Absent => Err(OciError::BlobData {
                media_type: media_type::BUNDLE_CONTENT.to_string(),
                message: "bundle content was not fetched".to_string(),
            }),
        }
    }
}

#[async_trait]
impl Blob for BundleContent {
    fn media_type(&self) -> String {
        media_type::BUNDLE_CONTENT.to_string()
    }

    async fn data(&self) -> Result<Vec<u8>> {
        self.read().await
    }
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub packages: Vec<Package>,
}

#[derive(Debug, Clone)]
pub struct Package {
    pub metadata: PackageMetadata,
    pub description: String,
    pub icon: Option<Icon>,
    pub upgrade_edges: UpgradeEdges,
    pub properties: Vec<TypeValue>,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub metadata: ChannelMetadata,
    pub properties: Vec<TypeValue>,
    pub bundles: Vec<Bundle>,
}

#[derive(Debug, Clone)]
pub struct Bundle {
    pub metadata: BundleMetadata,
    pub properties: Vec<TypeValue>,
    pub constraints: Vec<TypeValue>,
    pub related_images: Vec<RelatedImage>,
    /// Packaging convention of `content`, e.g. `registry+v1`.
    pub content_media_type: String,
    pub content: BundleContent,
    /// Manifest digest, known once the bundle was pushed or fetched.
    pub digest: Option<String>,
}

impl Bundle {
    pub fn full_version(&self) -> String {
        self.metadata.full_version()
    }
}

impl Artifact for Catalog {
    fn artifact_type(&self) -> String {
        media_type::CATALOG.to_string()
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn sub_artifacts(&self) -> Vec<Arc<dyn Artifact>> {
        self.packages
            .iter()
            .map(|p| Arc::new(p.clone()) as Arc<dyn Artifact>)
            .collect()
    }

    fn blobs(&self) -> Vec<Arc<dyn Blob>> {
        Vec::new()
    }
}

impl Artifact for Package {
    fn artifact_type(&self) -> String {
        media_type::PACKAGE.to_string()
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(annotations::NAME.to_string(), self.metadata.name.clone())])
    }

    fn sub_artifacts(&self) -> Vec<Arc<dyn Artifact>> {
        self.channels
            .iter()
            .map(|c| Arc::new(c.clone()) as Arc<dyn Artifact>)
            .collect()
    }

    fn blobs(&self) -> Vec<Arc<dyn Blob>> {
        let mut blobs: Vec<Arc<dyn Blob>> = vec![Arc::new(YamlBlob::new(
            media_type::PACKAGE_METADATA,
            self.metadata.clone(),
        ))];
        if !self.description.is_empty() {
            blobs.push(Arc::new(BytesBlob::new(media_type::MARKDOWN, self.description.clone())));
        }
        if let Some(icon) = &self.icon {
            blobs.push(Arc::new(BytesBlob::new(icon.media_type.clone(), icon.data.clone())));
        }
        if !self.upgrade_edges.is_empty() {
            blobs.push(Arc::new(YamlBlob::new(media_type::UPGRADE_EDGES, self.upgrade_edges.clone())));
        }
        if !self.properties.is_empty() {
            blobs.push(Arc::new(YamlBlob::new(media_type::PROPERTIES, self.properties.clone())));
        }
        blobs
    }
}

impl Artifact for Channel {
    fn artifact_type(&self) -> String {
        media_type::CHANNEL.to_string()
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(annotations::NAME.to_string(), self.metadata.name.clone())])
    }

    fn sub_artifacts(&self) -> Vec<Arc<dyn Artifact>> {
        self.bundles
            .iter()
            .map(|b| Arc::new(b.clone()) as Arc<dyn Artifact>)
            .collect()
    }

    fn blobs(&self) -> Vec<Arc<dyn Blob>> {
        let mut blobs: Vec<Arc<dyn Blob>> = vec![Arc::new(YamlBlob::new(
            media_type::CHANNEL_METADATA,
            self.metadata.clone(),
        ))];
        if !self.properties.is_empty() {
            blobs.push(Arc::new(YamlBlob::new(media_type::PROPERTIES, self.properties.clone())));
        }
        blobs
    }
}

impl Artifact for Bundle {
    fn artifact_type(&self) -> String {
        media_type::BUNDLE.to_string()
    }

    fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (annotations::BUNDLE_VERSION.to_string(), self.metadata.version.to_string()),
            (annotations::BUNDLE_RELEASE.to_string(), self.metadata.release.to_string()),
            (
                annotations::BUNDLE_CONTENT_MEDIA_TYPE.to_string(),
                self.content_media_type.clone(),
            ),
        ])
    }

    fn sub_artifacts(&self) -> Vec<Arc<dyn Artifact>> {
        Vec::new()
    }

    fn blobs(&self) -> Vec<Arc<dyn Blob>> {
        let mut blobs: Vec<Arc<dyn Blob>> = vec![Arc::new(YamlBlob::new(
            media_type::BUNDLE_METADATA,
            self.metadata.clone(),
        ))];
        if !self.properties.is_empty() {
            blobs.push(Arc::new(YamlBlob::new(media_type::PROPERTIES, self.properties.clone())));
        }
        if !self.constraints.is_empty() {
            blobs.push(Arc::new(YamlBlob::new(media_type::CONSTRAINTS, self.constraints.clone())));
        }
        if !self.related_images.is_empty() {
            blobs.push(Arc::new(YamlBlob::new(
                media_type::RELATED_IMAGES,
                self.related_images.clone(),
            )));
        }
        blobs.push(Arc::new(self.content.clone()));
        blobs
    }
}
