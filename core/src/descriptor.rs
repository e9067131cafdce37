//! Content descriptors and the artifact manifest.
//!
//! A [`Descriptor`] identifies one node of a content-addressed graph by
//! media type, digest and size. Digests are always `sha256:<hex>` over the
//! exact bytes, so equal digests imply identical content.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;

use crate::error::{OciError, Result};
use crate::media_type;

/// Digest algorithm prefix used for every digest this crate produces.
pub const SHA256_PREFIX: &str = "sha256:";

/// Identifies one node's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,

    pub digest: String,

    pub size: i64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
}

/// Platform an image manifest entry targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,

    pub os: String,

    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,

    #[serde(rename = "os.features", default, skip_serializing_if = "Vec::is_empty")]
    pub os_features: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

impl Descriptor {
    /// Describe `data` as content of `media_type`.
    pub fn from_bytes(media_type: impl Into<String>, data: &[u8]) -> Self {
        Self {
            media_type: media_type.into(),
            digest: sha256_digest(data),
            size: data.len() as i64,
            annotations: BTreeMap::new(),
            platform: None,
            artifact_type: None,
        }
    }

    /// Attach the artifact type carried by the manifest this descriptor points at.
    pub fn with_artifact_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = Some(artifact_type.into());
        self
    }

    /// Artifact type when present, otherwise the media type.
    pub fn kind(&self) -> &str {
        self.artifact_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(&self.media_type)
    }

    /// The 12 hex characters following the algorithm prefix.
    pub fn short_id(&self) -> &str {
        let hex = self
            .digest
            .split_once(':')
            .map(|(_, hex)| hex)
            .unwrap_or(&self.digest);
        &hex[..hex.len().min(12)]
    }

    /// Check that `data` is exactly the content this descriptor names.
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        let actual = sha256_digest(data);
        if actual != self.digest || data.len() as i64 != self.size {
            return Err(OciError::DigestMismatch {
                expected: self.digest.clone(),
                expected_size: self.size,
                actual,
                actual_size: data.len() as i64,
            });
        }
        Ok(())
    }
}

/// Compute a `sha256:<hex>` digest.
pub fn sha256_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{}{}", SHA256_PREFIX, hex::encode(hasher.finalize()))
}

/// Serialized form of one artifact node.
///
/// Field order is fixed by declaration order and `blobs` must already be
/// sorted by digest, so equal trees always serialize to equal bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactManifest {
    pub media_type: String,

    pub artifact_type: String,

    #[serde(default)]
    pub blobs: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ArtifactManifest {
    /// Build a manifest, sorting `blobs` ascending by digest.
    pub fn new(
        artifact_type: impl Into<String>,
        mut blobs: Vec<Descriptor>,
        annotations: BTreeMap<String, String>,
    ) -> Self {
        blobs.sort_by(|a, b| a.digest.cmp(&b.digest));
        Self {
            media_type: media_type::ARTIFACT_MANIFEST.to_string(),
            artifact_type: artifact_type.into(),
            blobs,
            annotations,
        }
    }

    /// Serialize to canonical bytes and describe them.
    pub fn encode(&self) -> Result<(Descriptor, Vec<u8>)> {
        let bytes = serde_json::to_vec(self)?;
        let desc = Descriptor::from_bytes(media_type::ARTIFACT_MANIFEST, &bytes)
            .with_artifact_type(self.artifact_type.clone());
        Ok((desc, bytes))
    }

    /// Decode manifest bytes fetched for `desc`.
    pub fn decode(desc: &Descriptor, data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| OciError::Decode {
            media_type: desc.media_type.clone(),
            digest: desc.digest.clone(),
            message: e.to_string(),
        })
    }
}
