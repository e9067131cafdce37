//! Graph copier.
//!
//! Replicates a content graph, known only by its root descriptor, from one
//! store to another. Children are discovered through the
//! [`MediaTypeRegistry`]; a node already present at the destination is
//! pruned along with its whole subtree. Every child lands before its parent
//! is pushed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use olm_oci_core::descriptor::Descriptor;
use olm_oci_core::error::{OciError, Result};
use olm_oci_core::event::{EventEmitter, TransferAction, TransferEvent};
use parking_lot::Mutex;
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::registry::MediaTypeRegistry;
use crate::store::ContentStore;

/// Copies graphs between stores.
#[derive(Clone)]
pub struct GraphCopier {
    limit: Arc<Semaphore>,
    registry: Arc<MediaTypeRegistry>,
    events: Option<EventEmitter>,
    cancel: CancellationToken,
}

impl GraphCopier {
    /// Create a copier allowing `concurrency` concurrent fetches/pushes.
    pub fn new(concurrency: usize) -> Self {
        Self::with_limit(Arc::new(Semaphore::new(concurrency.max(1))))
    }

    /// Create a copier sharing an existing worker bound.
    pub fn with_limit(limit: Arc<Semaphore>) -> Self {
        Self {
            limit,
            registry: Arc::new(MediaTypeRegistry::standard()),
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Use a custom media-type registry.
    pub fn with_registry(mut self, registry: MediaTypeRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Publish per-node progress.
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    /// Abort work when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Copy the graph rooted at `root` from `src` to `dest`, tagging the root
    /// with `tag` when given. Returns the bytes written to `dest`.
    ///
    /// On failure the error is wrapped in [`OciError::Transfer`] carrying the
    /// bytes already written; nothing is rolled back.
    pub async fn copy(
        &self,
        src: Arc<dyn ContentStore>,
        dest: Arc<dyn ContentStore>,
        root: &Descriptor,
        tag: Option<&str>,
    ) -> Result<u64> {
        let ctx = CopyContext {
            src,
            dest,
            limit: self.limit.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
            cancel: self.cancel.child_token(),
            transferred: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(DashMap::new()),
            first_error: Arc::new(Mutex::new(None)),
            root_tag: tag.map(|tag| (root.digest.clone(), tag.to_string())),
            root_tagged: Arc::new(AtomicBool::new(false)),
        };

        let result = match copy_node(root.clone(), ctx.clone()).await {
            // A pushed root was tagged with its push; a pruned one still needs the tag.
            Ok(()) => match tag {
                Some(tag) if !ctx.root_tagged.load(Ordering::SeqCst) => ctx.tag_root(root, tag).await,
                _ => Ok(()),
            },
            Err(e) => Err(ctx.first_error.lock().take().unwrap_or(e)),
        };

        let transferred = ctx.transferred.load(Ordering::SeqCst);
        match result {
            Ok(()) => {
                tracing::info!(
                    digest = %root.digest,
                    src = %ctx.src.name(),
                    dest = %ctx.dest.name(),
                    transferred,
                    "Copied artifact graph"
                );
                Ok(transferred)
            }
            Err(source) => Err(OciError::Transfer {
                transferred,
                source: Box::new(source),
            }),
        }
    }
}

#[derive(Clone)]
struct CopyContext {
    src: Arc<dyn ContentStore>,
    dest: Arc<dyn ContentStore>,
    limit: Arc<Semaphore>,
    registry: Arc<MediaTypeRegistry>,
    events: Option<EventEmitter>,
    cancel: CancellationToken,
    transferred: Arc<AtomicU64>,
    /// One copy per digest; later visitors wait on the first.
    in_flight: Arc<DashMap<String, Arc<OnceCell<()>>>>,
    first_error: Arc<Mutex<Option<OciError>>>,
    /// Root digest and the tag it is pushed under.
    root_tag: Option<(String, String)>,
    root_tagged: Arc<AtomicBool>,
}

impl CopyContext {
    fn fail(&self, err: OciError) -> OciError {
        if err.is_cancelled() {
            return err;
        }
        {
            let mut slot = self.first_error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.cancel.cancel();
        OciError::Cancelled
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    async fn permit(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OciError::Cancelled),
            permit = self.limit.clone().acquire_owned() => {
                permit.map_err(|_| OciError::Cancelled)
            }
        }
    }

    async fn tag_root(&self, root: &Descriptor, tag: &str) -> Result<()> {
        let _permit = self.permit().await?;
        self.dest
            .tag(root, tag)
            .await
            .map_err(|e| OciError::push(root.kind(), root.digest.as_str(), e))?;
        tracing::debug!(tag, digest = %root.digest, "Tagged root");
        self.emit(TransferEvent::tagged(root.clone(), tag));
        Ok(())
    }

    /// Copy `desc` and its subtree unless already present at the destination.
    async fn copy_one(&self, desc: &Descriptor) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(OciError::Cancelled);
        }

        let data = {
            let _permit = self.permit().await?;
            let present = self
                .dest
                .exists(desc)
                .await
                .map_err(|e| OciError::push(desc.kind(), desc.digest.as_str(), e))?;
            if present {
                tracing::debug!(digest = %desc.digest, kind = %desc.kind(), "Skipped existing");
                self.emit(TransferEvent::new(TransferAction::Skipped, desc.clone()));
                return Ok(());
            }
            self.src
                .fetch(desc)
                .await
                .map_err(|e| OciError::fetch(desc.kind(), desc.digest.as_str(), e))?
        };

        let children = self.registry.successors(desc, &data)?;
        if !children.is_empty() {
            let mut tasks: JoinSet<Result<()>> = JoinSet::new();
            for child in children {
                tasks.spawn(copy_node(child, self.clone()));
            }
            while let Some(joined) = tasks.join_next().await {
                let result = joined
                    .unwrap_or_else(|e| Err(OciError::Other(format!("copy task failed: {}", e))));
                if let Err(e) = result {
                    tasks.abort_all();
                    return Err(e);
                }
            }
        }

        let _permit = self.permit().await?;
        if self.cancel.is_cancelled() {
            return Err(OciError::Cancelled);
        }
        let root_tag = self
            .root_tag
            .as_ref()
            .filter(|(digest, _)| *digest == desc.digest)
            .map(|(_, tag)| tag.as_str());
        let pushed = match root_tag {
            Some(tag) => self.dest.push_tagged(desc, data, tag).await,
            None => self.dest.push(desc, data).await,
        };
        pushed.map_err(|e| OciError::push(desc.kind(), desc.digest.as_str(), e))?;
        self.transferred.fetch_add(desc.size.max(0) as u64, Ordering::SeqCst);

        tracing::debug!(digest = %desc.digest, kind = %desc.kind(), size = desc.size, "Pushed");
        self.emit(TransferEvent::new(TransferAction::Pushed, desc.clone()));
        if let Some(tag) = root_tag {
            self.root_tagged.store(true, Ordering::SeqCst);
            tracing::debug!(tag, digest = %desc.digest, "Tagged root");
            self.emit(TransferEvent::tagged(desc.clone(), tag));
        }
        Ok(())
    }
}

fn copy_node(desc: Descriptor, ctx: CopyContext) -> BoxFuture<'static, Result<()>> {
    async move {
        let cell = ctx
            .in_flight
            .entry(desc.digest.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        cell.get_or_try_init(|| ctx.copy_one(&desc))
            .await
            .map(|_| ())
            .map_err(|e| ctx.fail(e))
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use olm_oci_core::descriptor::ArtifactManifest;
    use olm_oci_core::media_type;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    /// Memory store recording how roots get their tags.
    #[derive(Default)]
    struct TagCountingStore {
        inner: MemoryStore,
        push_tagged: AtomicUsize,
        tag: AtomicUsize,
    }

    #[async_trait]
    impl ContentStore for TagCountingStore {
        fn name(&self) -> String {
            "counting".to_string()
        }

        async fn exists(&self, desc: &Descriptor) -> Result<bool> {
            self.inner.exists(desc).await
        }

        async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
            self.inner.fetch(desc).await
        }

        async fn push(&self, desc: &Descriptor, data: Vec<u8>) -> Result<()> {
            self.inner.push(desc, data).await
        }

        async fn tag(&self, desc: &Descriptor, name: &str) -> Result<()> {
            self.tag.fetch_add(1, Ordering::SeqCst);
            self.inner.tag(desc, name).await
        }

        async fn resolve(&self, name: &str) -> Result<Descriptor> {
            self.inner.resolve(name).await
        }

        async fn push_tagged(&self, desc: &Descriptor, data: Vec<u8>, name: &str) -> Result<()> {
            self.push_tagged.fetch_add(1, Ordering::SeqCst);
            self.inner.push(desc, data).await?;
            self.inner.tag(desc, name).await
        }
    }

    async fn put(store: &MemoryStore, media_type: &str, data: &[u8]) -> Descriptor {
        let desc = Descriptor::from_bytes(media_type, data);
        store.push(&desc, data.to_vec()).await.unwrap();
        desc
    }

    async fn put_manifest(store: &MemoryStore, kind: &str, blobs: Vec<Descriptor>) -> Descriptor {
        let (desc, bytes) = ArtifactManifest::new(kind, blobs, BTreeMap::new()).encode().unwrap();
        store.push(&desc, bytes).await.unwrap();
        desc
    }

    #[tokio::test]
    async fn test_copy_whole_graph_and_tag() {
        let src = Arc::new(MemoryStore::new());
        let readme = put(&src, media_type::MARKDOWN, b"# readme").await;
        let shared = put(&src, media_type::PROPERTIES, b"[]").await;
        let channel = put_manifest(&src, media_type::CHANNEL, vec![shared.clone()]).await;
        let root = put_manifest(&src, media_type::PACKAGE, vec![readme.clone(), shared.clone(), channel.clone()]).await;

        let dest = Arc::new(MemoryStore::new());
        let events = EventEmitter::new(64);
        let mut rx = events.subscribe();
        let copier = GraphCopier::new(2).with_events(events);
        let transferred = copier.copy(src.clone(), dest.clone(), &root, Some("v1")).await.unwrap();

        assert_eq!(dest.len(), 4);
        assert_eq!(transferred, src.total_bytes());
        assert_eq!(dest.resolve("v1").await.unwrap().digest, root.digest);

        let mut actions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            actions.push((event.action, event.descriptor.digest));
        }
        assert_eq!(actions.last().map(|a| a.0), Some(TransferAction::Tagged));
        let pos = |d: &str| actions.iter().position(|a| a.0 == TransferAction::Pushed && a.1 == d).unwrap();
        assert!(pos(&shared.digest) < pos(&channel.digest));
        assert!(pos(&channel.digest) < pos(&root.digest));
        assert!(pos(&readme.digest) < pos(&root.digest));
    }

    #[tokio::test]
    async fn test_copy_prunes_existing_root() {
        let src = Arc::new(MemoryStore::new());
        let readme = put(&src, media_type::MARKDOWN, b"# readme").await;
        let root = put_manifest(&src, media_type::PACKAGE, vec![readme]).await;

        let dest = Arc::new(MemoryStore::new());
        let copier = GraphCopier::new(2);
        copier.copy(src.clone(), dest.clone(), &root, None).await.unwrap();
        let again = copier.copy(src, dest, &root, None).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_copy_unknown_media_type_fails() {
        let src = Arc::new(MemoryStore::new());
        let odd = put(&src, "application/vnd.example.thing+json", b"{}").await;
        let root = put_manifest(&src, media_type::PACKAGE, vec![odd]).await;

        let dest = Arc::new(MemoryStore::new());
        let err = GraphCopier::new(2).copy(src, dest.clone(), &root, None).await.unwrap_err();
        let OciError::Transfer { source, .. } = &err else {
            panic!("expected transfer error, got {err}");
        };
        assert!(matches!(**source, OciError::UnsupportedMediaType { .. }));
        assert!(!dest.exists(&root).await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_missing_child_reports_partial_transfer() {
        let src = Arc::new(MemoryStore::new());
        let present = put(&src, media_type::MARKDOWN, b"# here").await;
        let missing = Descriptor::from_bytes(media_type::SVG, b"<svg/>");
        let root = put_manifest(&src, media_type::PACKAGE, vec![present, missing]).await;

        let dest = Arc::new(MemoryStore::new());
        let err = GraphCopier::new(1).copy(src, dest.clone(), &root, None).await.unwrap_err();
        assert!(!err.is_cancelled());
        assert!(!dest.exists(&root).await.unwrap());
        assert!(err.to_string().contains("Transfer aborted"));
    }

    #[tokio::test]
    async fn test_copy_cancelled() {
        let src = Arc::new(MemoryStore::new());
        let root = put(&src, media_type::MARKDOWN, b"# readme").await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = GraphCopier::new(1)
            .with_cancellation(cancel)
            .copy(src, Arc::new(MemoryStore::new()), &root, None)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.transferred(), 0);
    }

    #[tokio::test]
    async fn test_copy_pushes_root_with_its_tag() {
        let src = Arc::new(MemoryStore::new());
        let readme = put(&src, media_type::MARKDOWN, b"# readme").await;
        let root = put_manifest(&src, media_type::PACKAGE, vec![readme]).await;

        let dest = Arc::new(TagCountingStore::default());
        let copier = GraphCopier::new(2);
        copier.copy(src.clone(), dest.clone(), &root, Some("v1")).await.unwrap();
        assert_eq!(dest.push_tagged.load(Ordering::SeqCst), 1);
        assert_eq!(dest.tag.load(Ordering::SeqCst), 0);
        assert_eq!(dest.resolve("v1").await.unwrap().digest, root.digest);

        // Pruned root: only the tag is written.
        copier.copy(src, dest.clone(), &root, Some("v2")).await.unwrap();
        assert_eq!(dest.push_tagged.load(Ordering::SeqCst), 1);
        assert_eq!(dest.tag.load(Ordering::SeqCst), 1);
        assert_eq!(dest.resolve("v2").await.unwrap().digest, root.digest);
    }

    #[tokio::test]
    async fn test_copy_fetch_error_names_node() {
        let src = Arc::new(MemoryStore::new());
        let missing = Descriptor::from_bytes(media_type::SVG, b"<svg/>");
        let root = put_manifest(&src, media_type::PACKAGE, vec![missing.clone()]).await;

        let err = GraphCopier::new(1)
            .copy(src, Arc::new(MemoryStore::new()), &root, None)
            .await
            .unwrap_err();
        let OciError::Transfer { source, .. } = &err else {
            panic!("expected transfer error, got {err}");
        };
        let OciError::Fetch { kind, digest, .. } = &**source else {
            panic!("expected fetch error, got {source}");
        };
        assert_eq!(kind.as_str(), missing.kind());
        assert_eq!(digest, &missing.digest);
        assert!(err.to_string().contains(&missing.digest));
    }
}
