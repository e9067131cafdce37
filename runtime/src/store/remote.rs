//! Registry-backed content store.
//!
//! Uses the `oci-distribution` crate. One [`RemoteStore`] addresses a single
//! repository; it is constructed explicitly with its credentials and holds
//! no process-wide state.

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use olm_oci_core::descriptor::{Descriptor, SHA256_PREFIX};
use olm_oci_core::error::{OciError, Result};
use olm_oci_core::media_type;
use reqwest::header::HeaderValue;
use tokio::sync::OnceCell;

use super::ContentStore;
use crate::reference::ImageReference;

/// Manifest media types requested when resolving a tag.
const ACCEPTED_MANIFESTS: &[&str] = &[
    media_type::ARTIFACT_MANIFEST,
    media_type::IMAGE_INDEX,
    media_type::IMAGE_MANIFEST,
    media_type::DOCKER_MANIFEST_LIST,
    media_type::DOCKER_MANIFEST,
];

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if either is unset.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    /// Whether credentials are present.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() || self.password.is_none()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Content store for one registry repository.
pub struct RemoteStore {
    client: Client,
    auth: RegistryAuth,
    reference: ImageReference,
    pull_auth: OnceCell<()>,
    push_auth: OnceCell<()>,
}

impl RemoteStore {
    /// Create a store for the repository named by `reference`. Any tag or
    /// digest in `reference` is ignored by the store itself.
    pub fn new(reference: ImageReference, auth: RegistryAuth) -> Self {
        Self::with_protocol(reference, auth, ClientProtocol::Https)
    }

    /// Like [`RemoteStore::new`] but talking plain HTTP, for local test registries.
    pub fn insecure(reference: ImageReference, auth: RegistryAuth) -> Self {
        Self::with_protocol(reference, auth, ClientProtocol::Http)
    }

    fn with_protocol(reference: ImageReference, auth: RegistryAuth, protocol: ClientProtocol) -> Self {
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
            reference,
            pull_auth: OnceCell::new(),
            push_auth: OnceCell::new(),
        }
    }

    /// Repository this store addresses.
    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    fn by_digest(&self, digest: &str) -> Reference {
        Reference::with_digest(
            self.reference.registry.clone(),
            self.reference.repository.clone(),
            digest.to_string(),
        )
    }

    fn by_tag(&self, tag: &str) -> Reference {
        Reference::with_tag(
            self.reference.registry.clone(),
            self.reference.repository.clone(),
            tag.to_string(),
        )
    }

    fn registry_error(&self, action: &str, e: impl std::fmt::Display) -> OciError {
        OciError::Registry {
            registry: self.reference.registry.clone(),
            message: format!("{} {}: {}", action, self.reference.repository_name(), e),
        }
    }

    async fn authenticate(&self, operation: RegistryOperation) -> Result<()> {
        let cell = match operation {
            RegistryOperation::Push => &self.push_auth,
            RegistryOperation::Pull => &self.pull_auth,
        };
        cell.get_or_try_init(|| async {
            let scope = self.by_tag("latest");
            self.client
                .auth(&scope, &self.auth.to_oci_auth(), operation)
                .await
                .map(|_| ())
                .map_err(|e| self.registry_error("failed to authenticate to", e))
        })
        .await?;
        Ok(())
    }

    async fn push_manifest_as(&self, reference: &Reference, desc: &Descriptor, data: Vec<u8>) -> Result<()> {
        let content_type = HeaderValue::from_str(&desc.media_type)
            .map_err(|e| self.registry_error("invalid media type for", e))?;
        self.client
            .push_manifest_raw(reference, data, content_type)
            .await
            .map_err(|e| self.registry_error("failed to push manifest to", e))?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for RemoteStore {
    fn name(&self) -> String {
        self.reference.repository_name()
    }

    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        // Only manifests are checked. Blob uploads are idempotent registry-side.
        if !media_type::is_manifest(&desc.media_type) {
            return Ok(false);
        }
        match self
            .client
            .fetch_manifest_digest(&self.by_digest(&desc.digest), &self.auth.to_oci_auth())
            .await
        {
            Ok(digest) => Ok(digest == desc.digest),
            Err(e) if is_not_found(&e) => {
                tracing::debug!(digest = %desc.digest, error = %e, "Manifest not found in registry");
                Ok(false)
            }
            Err(e) => Err(self.registry_error("failed to check manifest in", e)),
        }
    }

    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let reference = self.by_digest(&desc.digest);
        let data = if media_type::is_manifest(&desc.media_type) {
            let (data, _digest) = self
                .client
                .pull_manifest_raw(&reference, &self.auth.to_oci_auth(), &[desc.media_type.as_str()])
                .await
                .map_err(|e| self.registry_error("failed to pull manifest from", e))?;
            data
        } else {
            self.authenticate(RegistryOperation::Pull).await?;
            let layer = OciDescriptor {
                media_type: desc.media_type.clone(),
                digest: desc.digest.clone(),
                size: desc.size,
                ..Default::default()
            };
            let mut data: Vec<u8> = Vec::with_capacity(desc.size.max(0) as usize);
            self.client
                .pull_blob(&reference, &layer, &mut data)
                .await
                .map_err(|e| self.registry_error("failed to pull blob from", e))?;
            data
        };
        desc.verify(&data)?;
        Ok(data)
    }

    async fn push(&self, desc: &Descriptor, data: Vec<u8>) -> Result<()> {
        desc.verify(&data)?;
        self.authenticate(RegistryOperation::Push).await?;
        let reference = self.by_digest(&desc.digest);

        if media_type::is_manifest(&desc.media_type) {
            self.push_manifest_as(&reference, desc, data).await?;
        } else {
            self.client
                .push_blob(&reference, &data, &desc.digest)
                .await
                .map_err(|e| self.registry_error("failed to push blob to", e))?;
        }
        tracing::debug!(digest = %desc.digest, media_type = %desc.media_type, "Pushed to registry");
        Ok(())
    }

    async fn tag(&self, desc: &Descriptor, name: &str) -> Result<()> {
        let data = self.fetch(desc).await?;
        self.push_tagged(desc, data, name).await
    }

    async fn resolve(&self, name: &str) -> Result<Descriptor> {
        let target = if name.starts_with(SHA256_PREFIX) {
            self.by_digest(name)
        } else {
            self.by_tag(name)
        };
        let (data, digest) = self
            .client
            .pull_manifest_raw(&target, &self.auth.to_oci_auth(), ACCEPTED_MANIFESTS)
            .await
            .map_err(|e| self.registry_error("failed to resolve reference in", e))?;

        #[derive(serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Head {
            media_type: Option<String>,
            artifact_type: Option<String>,
        }
        let head: Head = serde_json::from_slice(&data).map_err(|e| OciError::Decode {
            media_type: "manifest".to_string(),
            digest: digest.clone(),
            message: e.to_string(),
        })?;

        let mut desc = Descriptor::from_bytes(
            head.media_type.unwrap_or_else(|| media_type::IMAGE_MANIFEST.to_string()),
            &data,
        );
        desc.artifact_type = head.artifact_type;
        if desc.digest != digest {
            return Err(OciError::DigestMismatch {
                expected: digest,
                expected_size: desc.size,
                actual: desc.digest,
                actual_size: desc.size,
            });
        }
        Ok(desc)
    }

    async fn push_tagged(&self, desc: &Descriptor, data: Vec<u8>, name: &str) -> Result<()> {
        if !media_type::is_manifest(&desc.media_type) {
            return Err(OciError::Registry {
                registry: self.reference.registry.clone(),
                message: format!("cannot tag non-manifest content {}", desc.media_type),
            });
        }
        desc.verify(&data)?;
        self.authenticate(RegistryOperation::Push).await?;
        self.push_manifest_as(&self.by_tag(name), desc, data).await?;
        tracing::info!(
            reference = %self.reference.with_tag(name),
            digest = %desc.digest,
            "Tagged manifest in registry"
        );
        Ok(())
    }
}

/// Whether a registry answered that the manifest (or the whole repository) is unknown.
fn is_not_found(err: &OciDistributionError) -> bool {
    match err {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::RegistryError { envelope, .. } => envelope
            .errors
            .iter()
            .any(|e| matches!(e.code, OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown)),
        OciDistributionError::ServerError { code, .. } => *code == 404,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RemoteStore {
        let reference = ImageReference::parse("localhost:5000/olm/pkg").unwrap();
        RemoteStore::insecure(reference, RegistryAuth::anonymous())
    }

    #[test]
    fn test_registry_auth() {
        assert!(RegistryAuth::anonymous().is_anonymous());
        let auth = RegistryAuth::basic("user", "pass");
        assert!(!auth.is_anonymous());
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Basic(u, p) if u == "user" && p == "pass"));
    }

    #[test]
    fn test_references() {
        let store = store();
        assert_eq!(store.name(), "localhost:5000/olm/pkg");
        let r = store.by_tag("v1");
        assert_eq!(r.registry(), "localhost:5000");
        assert_eq!(r.repository(), "olm/pkg");
        assert_eq!(r.tag(), Some("v1"));

        let r = store.by_digest("sha256:abc");
        assert_eq!(r.digest(), Some("sha256:abc"));
    }

    #[tokio::test]
    async fn test_blobs_are_never_checked() {
        let desc = Descriptor::from_bytes(media_type::MARKDOWN, b"# hi");
        assert!(!store().exists(&desc).await.unwrap());
    }

    #[tokio::test]
    async fn test_push_tagged_rejects_blob() {
        let desc = Descriptor::from_bytes(media_type::MARKDOWN, b"# hi");
        let err = store().push_tagged(&desc, b"# hi".to_vec(), "v1").await.unwrap_err();
        assert!(matches!(err, OciError::Registry { .. }));
    }

    #[test]
    fn test_not_found_errors() {
        let envelope: oci_distribution::errors::OciEnvelope =
            serde_json::from_str(r#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"manifest unknown"}]}"#).unwrap();
        assert!(is_not_found(&OciDistributionError::RegistryError {
            envelope,
            url: "http://localhost:5000/v2/olm/pkg/manifests/sha256:abc".to_string(),
        }));
        assert!(is_not_found(&OciDistributionError::ImageManifestNotFoundError("x".to_string())));

        let envelope: oci_distribution::errors::OciEnvelope =
            serde_json::from_str(r#"{"errors":[{"code":"DENIED","message":"denied"}]}"#).unwrap();
        assert!(!is_not_found(&OciDistributionError::RegistryError {
            envelope,
            url: "http://localhost:5000/v2/olm/pkg/manifests/sha256:abc".to_string(),
        }));
        assert!(!is_not_found(&OciDistributionError::UnauthorizedError {
            url: "http://localhost:5000/v2/".to_string(),
        }));
    }

    #[tokio::test]
    async fn test_exists_reports_unreachable_registry() {
        let reference = ImageReference::parse("127.0.0.1:1/olm/pkg").unwrap();
        let store = RemoteStore::insecure(reference, RegistryAuth::anonymous());
        let (desc, _) = olm_oci_core::descriptor::ArtifactManifest::new(
            media_type::PACKAGE,
            Vec::new(),
            std::collections::BTreeMap::new(),
        )
        .encode()
        .unwrap();

        let err = store.exists(&desc).await.unwrap_err();
        assert!(matches!(err, OciError::Registry { .. }));
    }
}
