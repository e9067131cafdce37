//! Graph builder.
//!
//! Turns an [`Artifact`] tree into a content-addressed manifest tree,
//! bottom-up. Every blob and sub-artifact of a node is staged concurrently
//! under one shared worker bound; the node's manifest is written only once
//! all of its children have landed. Child descriptors are sorted by digest
//! before serialization, so scheduling order never affects the result.
//!
//! Pushing to a durable target happens in two phases: the whole tree is
//! first staged into a fresh [`MemoryStore`], then the copier transfers only
//! what the target is missing.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use olm_oci_core::descriptor::{ArtifactManifest, Descriptor};
use olm_oci_core::error::{OciError, Result};
use olm_oci_core::event::EventEmitter;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::artifact::{Artifact, Blob};
use super::copier::GraphCopier;
use crate::store::{ContentStore, MemoryStore};

/// Result of pushing a tree to a target store.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    /// Root manifest descriptor
    pub descriptor: Descriptor,
    /// Bytes written to the target (0 when everything was already there)
    pub transferred: u64,
}

/// Builds and pushes artifact trees.
#[derive(Clone)]
pub struct GraphBuilder {
    limit: Arc<Semaphore>,
    events: Option<EventEmitter>,
    cancel: CancellationToken,
}

impl GraphBuilder {
    /// Create a builder allowing `concurrency` concurrent blob/store operations.
    pub fn new(concurrency: usize) -> Self {
        Self {
            limit: Arc::new(Semaphore::new(concurrency.max(1))),
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Publish transfer progress of the copy phase.
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    /// Abort work when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build `root` into `store` and return the root manifest descriptor.
    pub async fn stage(&self, root: Arc<dyn Artifact>, store: Arc<dyn ContentStore>) -> Result<Descriptor> {
        let ctx = StageContext {
            store,
            limit: self.limit.clone(),
            cancel: self.cancel.child_token(),
            first_error: Arc::new(Mutex::new(None)),
        };

        match stage_node(root, ctx.clone()).await {
            Ok(desc) => Ok(desc),
            Err(e) => Err(ctx.first_error.lock().take().unwrap_or(e)),
        }
    }

    /// Build `root` in memory, then copy whatever `target` lacks, tagging the
    /// root with `tag` when given.
    pub async fn push(
        &self,
        root: Arc<dyn Artifact>,
        target: Arc<dyn ContentStore>,
        tag: Option<&str>,
    ) -> Result<PushOutcome> {
        let staging: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let descriptor = self.stage(root, staging.clone()).await?;

        tracing::info!(
            digest = %descriptor.digest,
            kind = %descriptor.kind(),
            objects = staging.len(),
            bytes = staging.total_bytes(),
            "Staged artifact graph"
        );

        let mut copier = GraphCopier::with_limit(self.limit.clone()).with_cancellation(self.cancel.clone());
        if let Some(events) = &self.events {
            copier = copier.with_events(events.clone());
        }
        let transferred = copier.copy(staging, target, &descriptor, tag).await?;

        Ok(PushOutcome {
            descriptor,
            transferred,
        })
    }

    /// Compute the root descriptor of `root` without touching any durable store.
    pub async fn dry_push(&self, root: Arc<dyn Artifact>) -> Result<Descriptor> {
        self.stage(root, Arc::new(MemoryStore::new())).await
    }
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(8)
    }
}

#[derive(Clone)]
struct StageContext {
    store: Arc<dyn ContentStore>,
    limit: Arc<Semaphore>,
    cancel: CancellationToken,
    first_error: Arc<Mutex<Option<OciError>>>,
}

impl StageContext {
    /// Record the first real failure, stop all other work, and hand back a
    /// cancellation marker for the caller to propagate.
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

    async fn permit(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OciError::Cancelled),
            permit = self.limit.clone().acquire_owned() => {
                permit.map_err(|_| OciError::Cancelled)
            }
        }
    }

    async fn push_if_absent(&self, desc: &Descriptor, data: Vec<u8>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(OciError::Cancelled);
        }
        if !self.store.exists(desc).await? {
            self.store.push(desc, data).await?;
        }
        Ok(())
    }
}

fn stage_node(node: Arc<dyn Artifact>, ctx: StageContext) -> BoxFuture<'static, Result<Descriptor>> {
    async move {
        let artifact_type = node.artifact_type();
        let mut tasks: JoinSet<Result<Descriptor>> = JoinSet::new();

        for blob in node.blobs() {
            tasks.spawn(stage_blob(blob, ctx.clone()));
        }
        for child in node.sub_artifacts() {
            tasks.spawn(stage_node(child, ctx.clone()));
        }

        let mut children = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(OciError::Other(format!("staging task failed: {}", e)))
            });
            match result {
                Ok(desc) => children.push(desc),
                Err(e) => {
                    tasks.abort_all();
                    return Err(ctx.fail(e));
                }
            }
        }

        let manifest = ArtifactManifest::new(artifact_type.clone(), children, node.annotations());
        let (desc, bytes) = manifest
            .encode()
            .map_err(|e| ctx.fail(OciError::push(artifact_type.as_str(), "", e)))?;

        let _permit = ctx.permit().await?;
        ctx.push_if_absent(&desc, bytes)
            .await
            .map_err(|e| ctx.fail(OciError::push(artifact_type.as_str(), desc.digest.as_str(), e)))?;

        tracing::debug!(kind = %artifact_type, digest = %desc.digest, "Staged manifest");
        Ok(desc)
    }
    .boxed()
}

async fn stage_blob(blob: Arc<dyn Blob>, ctx: StageContext) -> Result<Descriptor> {
    let media_type = blob.media_type();
    let _permit = ctx.permit().await?;

    let data = blob.data().await.map_err(|e| match e {
        OciError::BlobData { .. } | OciError::Cancelled => e,
        other => OciError::BlobData {
            media_type: media_type.clone(),
            message: other.to_string(),
        },
    })?;

    let desc = Descriptor::from_bytes(media_type.as_str(), &data);
    ctx.push_if_absent(&desc, data)
        .await
        .map_err(|e| OciError::push(media_type.as_str(), desc.digest.as_str(), e))?;

    tracing::debug!(media_type = %media_type, digest = %desc.digest, size = desc.size, "Staged blob");
    Ok(desc)
}
