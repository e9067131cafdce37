//! OLM OCI Core - Foundational Types
//!
//! This module provides the error taxonomy, configuration, content
//! descriptors, media types and progress events shared by the runtime
//! and the command line.

pub mod config;
pub mod descriptor;
pub mod error;
pub mod event;
pub mod media_type;

// Re-export commonly used types
pub use config::{EngineConfig, LogLevel};
pub use descriptor::{sha256_digest, ArtifactManifest, Descriptor, Platform};
pub use error::{OciError, Result};
pub use event::{EventEmitter, EventStream, TransferAction, TransferEvent};

/// OLM OCI version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
