use async_trait::async_trait;
use dashmap::DashMap;
use olm_oci_core::descriptor::Descriptor;
use olm_oci_core::error::{OciError, Result};

use super::ContentStore;

/// Ephemeral in-memory store.
///
/// Used as the staging area of a build and for dry pushes. Content is
/// verified against its descriptor on push.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: DashMap<String, (Descriptor, Vec<u8>)>,
    tags: DashMap<String, Descriptor>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct digests held.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Sum of the sizes of all held content.
    pub fn total_bytes(&self) -> u64 {
        self.blobs.iter().map(|e| e.value().1.len() as u64).sum()
    }

    /// Descriptors of all held content, sorted by digest.
    pub fn descriptors(&self) -> Vec<Descriptor> {
        let mut all: Vec<Descriptor> = self.blobs.iter().map(|e| e.value().0.clone()).collect();
        all.sort_by(|a, b| a.digest.cmp(&b.digest));
        all
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn name(&self) -> String {
        "memory".to_string()
    }

    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        Ok(self.blobs.contains_key(&desc.digest))
    }

    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        self.blobs
            .get(&desc.digest)
            .map(|e| e.value().1.clone())
            .ok_or_else(|| OciError::NotFound(desc.digest.clone()))
    }

    async fn push(&self, desc: &Descriptor, data: Vec<u8>) -> Result<()> {
        desc.verify(&data)?;
        self.blobs
            .entry(desc.digest.clone())
            .or_insert_with(|| (desc.clone(), data));
        Ok(())
    }

    async fn tag(&self, desc: &Descriptor, name: &str) -> Result<()> {
        if !self.blobs.contains_key(&desc.digest) {
            return Err(OciError::NotFound(desc.digest.clone()));
        }
        self.tags.insert(name.to_string(), desc.clone());
        Ok(())
    }

    async fn resolve(&self, name: &str) -> Result<Descriptor> {
        self.tags
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| OciError::NotFound(name.to_string()))
    }
}
