//! Registry reference parsing.
//!
//! Parses references like `quay.io/olm/catalog:v1` or
//! `localhost:5000/pkg@sha256:...` into structured components.

use olm_oci_core::error::{OciError, Result};

/// Registry used when the first path component is not a hostname.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Parsed registry reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "quay.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "olm/catalog")
    pub repository: String,
    /// Tag (e.g., "latest", "v1")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference string.
    ///
    /// Unlike `docker pull`, no tag is implied: a reference naming only a
    /// repository is valid for push and copy destinations.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(OciError::InvalidReference("empty reference".to_string()));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(OciError::InvalidReference(format!(
                        "invalid digest in '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A tag can only follow the last path component; a colon before the
        // first slash is a registry port.
        let last_slash = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon) => {
                let colon = last_slash + colon;
                let tag = &name_tag[colon + 1..];
                if last_slash == 0 && digest.is_none() && tag.chars().all(|c| c.is_ascii_digit()) {
                    (name_tag, None)
                } else {
                    (&name_tag[..colon], Some(tag.to_string()))
                }
            }
            None => (name_tag, None),
        };

        if matches!(tag.as_deref(), Some("")) {
            return Err(OciError::InvalidReference(format!(
                "empty tag in '{}'",
                reference
            )));
        }

        let (registry, repository) = split_registry_repository(name, reference)?;

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// `registry/repository` without tag or digest.
    pub fn repository_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Same repository, pinned to `digest`.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// Same repository, pointing at `tag`.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.repository_name();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

fn split_registry_repository(name: &str, reference: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(OciError::InvalidReference(format!(
                    "empty repository in '{}'",
                    reference
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    if name.is_empty() {
        return Err(OciError::InvalidReference(format!(
            "empty repository in '{}'",
            reference
        )));
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };
    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}
