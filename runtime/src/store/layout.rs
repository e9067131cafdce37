//! OCI image-layout directory store.
//!
//! Layout on disk:
//! - `oci-layout`
//! - `index.json` (tagged manifests, tag in `org.opencontainers.image.ref.name`)
//! - `blobs/sha256/<hex>`
//!
//! A layout can be serialized to and restored from a single tar archive.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use olm_oci_core::descriptor::Descriptor;
use olm_oci_core::error::{OciError, Result};
use olm_oci_core::media_type::{self, annotations};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{digest_hex, ContentStore};

const LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const LAYOUT_VERSION: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutIndex {
    schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

impl Default for LayoutIndex {
    fn default() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(media_type::IMAGE_INDEX.to_string()),
            manifests: Vec::new(),
        }
    }
}

/// Durable store backed by an OCI image-layout directory.
pub struct LayoutStore {
    root: PathBuf,
    index: RwLock<LayoutIndex>,
}

impl LayoutStore {
    /// Open the layout at `root`, creating it if it does not exist.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("blobs").join("sha256")).map_err(|e| {
            store_error(&root, format!("failed to create layout directory: {}", e))
        })?;

        let layout_path = root.join(LAYOUT_FILE);
        if !layout_path.exists() {
            std::fs::write(&layout_path, LAYOUT_VERSION)
                .map_err(|e| store_error(&root, format!("failed to write oci-layout: {}", e)))?;
        }

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let content = std::fs::read(&index_path)
                .map_err(|e| store_error(&root, format!("failed to read index.json: {}", e)))?;
            serde_json::from_slice(&content)
                .map_err(|e| store_error(&root, format!("failed to parse index.json: {}", e)))?
        } else {
            LayoutIndex::default()
        };

        tracing::debug!(root = %root.display(), "Opened image layout");

        Ok(Self {
            root,
            index: RwLock::new(index),
        })
    }

    /// Extract a tar-serialized layout into `workdir` and open it.
    pub fn open_archive(archive: &Path, workdir: &Path) -> Result<Self> {
        let file = std::fs::File::open(archive).map_err(|e| OciError::Store {
            store: archive.display().to_string(),
            message: format!("failed to open archive: {}", e),
        })?;
        let mut tar = tar::Archive::new(file);
        tar.unpack(workdir).map_err(|e| OciError::Store {
            store: archive.display().to_string(),
            message: format!("failed to extract archive: {}", e),
        })?;

        if !workdir.join(LAYOUT_FILE).exists() {
            return Err(OciError::Store {
                store: archive.display().to_string(),
                message: "archive is not an OCI image layout (missing oci-layout)".to_string(),
            });
        }
        Self::open(workdir)
    }

    /// Write the whole layout as a tar archive at `archive`.
    pub fn save_archive(&self, archive: &Path) -> Result<()> {
        let file = std::fs::File::create(archive).map_err(|e| OciError::Store {
            store: archive.display().to_string(),
            message: format!("failed to create archive: {}", e),
        })?;
        let mut builder = tar::Builder::new(file);
        builder.mode(tar::HeaderMode::Deterministic);
        builder.follow_symlinks(false);
        let write_err = |e: std::io::Error| OciError::Store {
            store: archive.display().to_string(),
            message: format!("failed to write archive: {}", e),
        };
        builder.append_dir_all(".", &self.root).map_err(write_err)?;
        let mut file = builder.into_inner().map_err(write_err)?;
        file.flush().map_err(write_err)?;

        tracing::info!(
            root = %self.root.display(),
            archive = %archive.display(),
            "Saved image layout archive"
        );
        Ok(())
    }

    /// Root directory of the layout.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All tags with the descriptors they point at, sorted by tag.
    pub async fn tags(&self) -> Vec<(String, Descriptor)> {
        let index = self.index.read().await;
        let mut tags: Vec<(String, Descriptor)> = index
            .manifests
            .iter()
            .filter_map(|d| {
                let name = d.annotations.get(annotations::REF_NAME)?.clone();
                Some((name, untagged(d)))
            })
            .collect();
        tags.sort_by(|a, b| a.0.cmp(&b.0));
        tags
    }

    fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let hex = digest_hex(digest).ok_or_else(|| OciError::Store {
            store: self.name(),
            message: format!("unsupported digest {:?}", digest),
        })?;
        Ok(self.root.join("blobs").join("sha256").join(hex))
    }

    async fn save_index(&self, index: &LayoutIndex) -> Result<()> {
        let data = serde_json::to_vec(index)?;
        write_atomic(self.root.clone(), self.root.join(INDEX_FILE), data)
            .await
            .map_err(|e| store_error(&self.root, format!("failed to write index.json: {}", e)))
    }
}

/// Write `data` to a temp file in `dir`, then rename it onto `target`.
///
/// Runs on the blocking pool.
async fn write_atomic(dir: PathBuf, target: PathBuf, data: Vec<u8>) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&data)?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}

fn untagged(desc: &Descriptor) -> Descriptor {
    let mut desc = desc.clone();
    desc.annotations.remove(annotations::REF_NAME);
    desc
}

fn store_error(root: &Path, message: String) -> OciError {
    OciError::Store {
        store: root.display().to_string(),
        message,
    }
}

#[async_trait]
impl ContentStore for LayoutStore {
    fn name(&self) -> String {
        self.root.display().to_string()
    }

    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        let path = self.blob_path(&desc.digest)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let path = self.blob_path(&desc.digest)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OciError::NotFound(desc.digest.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        desc.verify(&data)?;
        Ok(data)
    }

    async fn push(&self, desc: &Descriptor, data: Vec<u8>) -> Result<()> {
        desc.verify(&data)?;
        let path = self.blob_path(&desc.digest)?;
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }

        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        write_atomic(dir, path, data)
            .await
            .map_err(|e| store_error(&self.root, format!("failed to persist blob: {}", e)))?;

        tracing::debug!(digest = %desc.digest, size = desc.size, "Wrote layout blob");
        Ok(())
    }

    async fn tag(&self, desc: &Descriptor, name: &str) -> Result<()> {
        if !self.exists(desc).await? {
            return Err(OciError::NotFound(desc.digest.clone()));
        }

        let mut index = self.index.write().await;
        index
            .manifests
            .retain(|d| d.annotations.get(annotations::REF_NAME).map(String::as_str) != Some(name));

        let mut entry = untagged(desc);
        entry
            .annotations
            .insert(annotations::REF_NAME.to_string(), name.to_string());
        index.manifests.push(entry);
        self.save_index(&index).await?;

        tracing::debug!(tag = name, digest = %desc.digest, "Tagged layout manifest");
        Ok(())
    }

    async fn resolve(&self, name: &str) -> Result<Descriptor> {
        let index = self.index.read().await;
        index
            .manifests
            .iter()
            .find(|d| d.annotations.get(annotations::REF_NAME).map(String::as_str) == Some(name))
            .map(untagged)
            .ok_or_else(|| OciError::NotFound(name.to_string()))
    }
}
