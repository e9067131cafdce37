//! OLM OCI Runtime - artifact graph engine.
//!
//! This module builds operator catalogs, packages, channels and bundles
//! into content-addressed OCI graphs, pushes them with deduplication under
//! a bounded worker pool, copies existing graphs between stores, and
//! renders graphs for inspection.

#![allow(clippy::result_large_err)]

pub mod catalog;
pub mod graph;
pub mod reference;
pub mod store;

// Re-export common types
pub use catalog::{
    load_bundle, load_catalog, load_package, ArtifactFetcher, Bundle, Catalog, Channel, DeclarativeConfig, Package,
};
pub use graph::{Artifact, Blob, GraphBuilder, GraphCopier, Inspector, MediaTypeRegistry, PushOutcome};
pub use reference::ImageReference;
pub use store::{ContentStore, LayoutStore, MemoryStore, RegistryAuth, RemoteStore};

/// OLM OCI Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of concurrent blob and store operations.
pub const DEFAULT_CONCURRENCY: usize = 8;
