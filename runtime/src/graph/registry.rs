//! Media-type dispatch for graph traversal.
//!
//! Maps each recognized media type either to a leaf (opaque bytes, no
//! references) or to a function extracting the child descriptors embedded
//! in the content. Traversal code asks the registry and never matches on
//! media types itself; an unregistered type is an error, never a leaf.

use std::collections::HashMap;
use std::sync::Arc;

use oci_spec::image::{ImageIndex, ImageManifest};
use olm_oci_core::descriptor::{ArtifactManifest, Descriptor, Platform};
use olm_oci_core::error::{OciError, Result};
use olm_oci_core::media_type;

/// Extracts child descriptors, in manifest order, from fetched content.
pub type SuccessorFn = Arc<dyn Fn(&Descriptor, &[u8]) -> Result<Vec<Descriptor>> + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Leaf,
    Manifest(SuccessorFn),
}

/// Media type to handler map.
#[derive(Clone, Default)]
pub struct MediaTypeRegistry {
    handlers: HashMap<String, Handler>,
}

impl MediaTypeRegistry {
    /// Registry with nothing registered.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry knowing every OCI, Docker and operator-framework type.
    pub fn standard() -> Self {
        let mut registry = Self::empty();

        registry.register_manifest(media_type::ARTIFACT_MANIFEST, artifact_manifest_successors);
        registry.register_manifest(media_type::IMAGE_INDEX, image_index_successors);
        registry.register_manifest(media_type::DOCKER_MANIFEST_LIST, image_index_successors);
        registry.register_manifest(media_type::IMAGE_MANIFEST, image_manifest_successors);
        registry.register_manifest(media_type::DOCKER_MANIFEST, image_manifest_successors);

        for leaf in [
            media_type::IMAGE_CONFIG,
            media_type::IMAGE_LAYER,
            media_type::IMAGE_LAYER_GZIP,
            media_type::IMAGE_LAYER_ZSTD,
            media_type::IMAGE_LAYER_NON_DISTRIBUTABLE_GZIP,
            media_type::EMPTY_JSON,
            media_type::DOCKER_CONFIG,
            media_type::DOCKER_LAYER,
            media_type::DOCKER_FOREIGN_LAYER,
            media_type::DOCKER_FOREIGN_LAYER_GZIP,
            media_type::PACKAGE_METADATA,
            media_type::UPGRADE_EDGES,
            media_type::CHANNEL_METADATA,
            media_type::BUNDLE_METADATA,
            media_type::RELATED_IMAGES,
            media_type::BUNDLE_CONTENT,
            media_type::PROPERTIES,
            media_type::CONSTRAINTS,
            media_type::MARKDOWN,
            media_type::SVG,
            media_type::PNG,
        ] {
            registry.register_leaf(leaf);
        }

        registry
    }

    /// Treat `media_type` as opaque content.
    pub fn register_leaf(&mut self, media_type: impl Into<String>) -> &mut Self {
        self.handlers.insert(media_type.into(), Handler::Leaf);
        self
    }

    /// Treat `media_type` as a manifest whose children `successors` extracts.
    pub fn register_manifest<F>(&mut self, media_type: impl Into<String>, successors: F) -> &mut Self
    where
        F: Fn(&Descriptor, &[u8]) -> Result<Vec<Descriptor>> + Send + Sync + 'static,
    {
        self.handlers
            .insert(media_type.into(), Handler::Manifest(Arc::new(successors)));
        self
    }

    pub fn is_registered(&self, media_type: &str) -> bool {
        self.handlers.contains_key(media_type)
    }

    /// Child descriptors of `desc`, whose content is `data`.
    pub fn successors(&self, desc: &Descriptor, data: &[u8]) -> Result<Vec<Descriptor>> {
        match self.handlers.get(&desc.media_type) {
            Some(Handler::Leaf) => Ok(Vec::new()),
            Some(Handler::Manifest(successors)) => successors(desc, data),
            None => Err(OciError::UnsupportedMediaType {
                media_type: desc.media_type.clone(),
                digest: desc.digest.clone(),
            }),
        }
    }
}

pub(crate) fn decode_error(desc: &Descriptor, e: impl std::fmt::Display) -> OciError {
    OciError::Decode {
        media_type: desc.media_type.clone(),
        digest: desc.digest.clone(),
        message: e.to_string(),
    }
}

fn artifact_manifest_successors(desc: &Descriptor, data: &[u8]) -> Result<Vec<Descriptor>> {
    Ok(ArtifactManifest::decode(desc, data)?.blobs)
}

fn image_index_successors(desc: &Descriptor, data: &[u8]) -> Result<Vec<Descriptor>> {
    let index: ImageIndex = serde_json::from_slice(data).map_err(|e| decode_error(desc, e))?;
    Ok(index.manifests().iter().map(from_oci_descriptor).collect())
}

fn image_manifest_successors(desc: &Descriptor, data: &[u8]) -> Result<Vec<Descriptor>> {
    let manifest: ImageManifest = serde_json::from_slice(data).map_err(|e| decode_error(desc, e))?;
    let mut children = Vec::with_capacity(manifest.layers().len() + 1);
    children.push(from_oci_descriptor(manifest.config()));
    children.extend(manifest.layers().iter().map(from_oci_descriptor));
    Ok(children)
}

/// Convert an `oci-spec` descriptor. Docker manifest lists and schema2
/// manifests share the OCI JSON shape, so both decode through `oci-spec`.
pub(crate) fn from_oci_descriptor(d: &oci_spec::image::Descriptor) -> Descriptor {
    Descriptor {
        media_type: d.media_type().to_string(),
        digest: d.digest().to_string(),
        size: d.size(),
        annotations: d
            .annotations()
            .clone()
            .map(|a| a.into_iter().collect())
            .unwrap_or_default(),
        platform: d.platform().as_ref().map(|p| Platform {
            architecture: p.architecture().to_string(),
            os: p.os().to_string(),
            os_version: p.os_version().clone(),
            os_features: p.os_features().clone().unwrap_or_default(),
            variant: p.variant().clone(),
        }),
        artifact_type: None,
    }
}
