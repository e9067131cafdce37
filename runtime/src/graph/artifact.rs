//! Artifact node model.
//!
//! Any entity that can be pushed as a content graph implements [`Artifact`]:
//! it names an artifact type, carries annotations, and owns an ordered list
//! of sub-artifacts and blobs. The graph builder only ever sees this
//! capability set.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use olm_oci_core::error::Result;

/// A leaf payload of an artifact.
#[async_trait]
pub trait Blob: Send + Sync {
    fn media_type(&self) -> String;

    /// Read the full content. Called at most once per push attempt.
    async fn data(&self) -> Result<Vec<u8>>;
}

/// A node of an artifact graph.
pub trait Artifact: Send + Sync {
    fn artifact_type(&self) -> String;

    fn annotations(&self) -> BTreeMap<String, String>;

    fn sub_artifacts(&self) -> Vec<Arc<dyn Artifact>>;

    fn blobs(&self) -> Vec<Arc<dyn Blob>>;
}

/// A blob whose content is already in memory.
#[derive(Debug, Clone)]
pub struct BytesBlob {
    media_type: String,
    data: Vec<u8>,
}

impl BytesBlob {
    pub fn new(media_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl Blob for BytesBlob {
    fn media_type(&self) -> String {
        self.media_type.clone()
    }

    async fn data(&self) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }
}

/// A blob serialized to YAML when read.
#[derive(Debug, Clone)]
pub struct YamlBlob<T> {
    media_type: &'static str,
    value: T,
}

impl<T> YamlBlob<T> {
    pub fn new(media_type: &'static str, value: T) -> Self {
        Self { media_type, value }
    }
}

#[async_trait]
impl<T: serde::Serialize + Send + Sync> Blob for YamlBlob<T> {
    fn media_type(&self) -> String {
        self.media_type.to_string()
    }

    async fn data(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(&self.value)?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize)]
    struct Meta {
        name: String,
    }

    #[tokio::test]
    async fn test_yaml_blob() {
        let blob = YamlBlob::new("application/x-yaml", Meta { name: "etcd".to_string() });
        assert_eq!(blob.media_type(), "application/x-yaml");
        assert_eq!(blob.data().await.unwrap(), b"name: etcd\n");
    }

    #[tokio::test]
    async fn test_bytes_blob() {
        let blob = BytesBlob::new("text/markdown", "# etcd");
        assert_eq!(blob.data().await.unwrap(), b"# etcd");
    }
}
