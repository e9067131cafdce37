//! Artifact graph engine: node model, builder, copier and inspector.

mod artifact;
mod builder;
mod copier;
mod inspect;
pub mod registry;

pub use artifact::{Artifact, Blob, BytesBlob, YamlBlob};
pub use builder::{GraphBuilder, PushOutcome};
pub use copier::GraphCopier;
pub use inspect::{DecodeFn, Inspector, Segment};
pub use registry::{MediaTypeRegistry, SuccessorFn};
