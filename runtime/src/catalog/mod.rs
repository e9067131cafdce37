//! Operator catalog domain model.
//!
//! A fixed four-level tree (catalog, package, channel, bundle) whose nodes
//! implement [`Artifact`](crate::graph::Artifact), along with loaders for the
//! on-disk layout, bundle content packaging, reconstruction from a store and
//! the declarative catalog projection.

pub mod content;
pub mod declcfg;
pub mod edges;
pub mod fetch;
pub mod loader;
pub mod model;

pub use declcfg::{ChannelEntry, DeclBundle, DeclChannel, DeclPackage, DeclarativeConfig};
pub use edges::expand_upgrade_edges;
pub use fetch::ArtifactFetcher;
pub use loader::{load_bundle, load_catalog, load_channel, load_package};
pub use model::{
    Bundle, BundleContent, BundleMetadata, Catalog, Channel, ChannelMetadata, Icon, Maintainer, Package,
    PackageMetadata, RelatedImage, TypeValue, UpgradeEdges,
};
