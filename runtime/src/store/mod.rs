//! Content-addressed stores.
//!
//! Every store offers the same four primitives (existence check, fetch,
//! push, tag) over [`Descriptor`]s, plus tag resolution. Pushing content
//! that already exists is a no-op, and implementations must tolerate
//! concurrent pushes of the same digest.

mod layout;
mod memory;
mod remote;

pub use layout::LayoutStore;
pub use memory::MemoryStore;
pub use remote::{RegistryAuth, RemoteStore};

use async_trait::async_trait;
use olm_oci_core::descriptor::Descriptor;
use olm_oci_core::error::Result;

/// Content-addressed storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Short human-readable name used in errors and logs.
    fn name(&self) -> String;

    /// Whether content for `desc` is present.
    async fn exists(&self, desc: &Descriptor) -> Result<bool>;

    /// Fetch the full bytes of `desc`.
    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>>;

    /// Store `data` as `desc`. A no-op when the digest is already present.
    async fn push(&self, desc: &Descriptor, data: Vec<u8>) -> Result<()>;

    /// Point `name` at `desc`, which must already be present.
    async fn tag(&self, desc: &Descriptor, name: &str) -> Result<()>;

    /// Look up the descriptor a tag points at.
    async fn resolve(&self, name: &str) -> Result<Descriptor>;

    /// Push and tag in one logical operation.
    async fn push_tagged(&self, desc: &Descriptor, data: Vec<u8>, name: &str) -> Result<()> {
        self.push(desc, data).await?;
        self.tag(desc, name).await
    }
}

/// Strip the algorithm prefix off a digest, rejecting anything that is not
/// a plain lowercase hex sha256.
pub(crate) fn digest_hex(digest: &str) -> Option<&str> {
    let hex = digest.strip_prefix(olm_oci_core::descriptor::SHA256_PREFIX)?;
    if hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        Some(hex)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_hex() {
        let desc = Descriptor::from_bytes("text/plain", b"x");
        assert_eq!(digest_hex(&desc.digest).map(str::len), Some(64));
        assert!(digest_hex("sha256:../../etc/passwd").is_none());
        assert!(digest_hex("sha512:abc").is_none());
    }
}
