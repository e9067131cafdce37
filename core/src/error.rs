use thiserror::Error;

/// OLM OCI error types
#[derive(Error, Debug)]
pub enum OciError {
    /// Artifact definition could not be loaded from disk
    #[error("Load error: {path} - {message}")]
    Load { path: String, message: String },

    /// A blob's data could not be opened or read
    #[error("Failed reading {media_type} blob data: {message}")]
    BlobData { media_type: String, message: String },

    /// Content bytes did not decode as their claimed media type
    #[error("Failed decoding {media_type} with digest {digest}: {message}")]
    Decode {
        media_type: String,
        digest: String,
        message: String,
    },

    /// Pushed content did not hash to the expected descriptor
    #[error("Digest mismatch: expected {expected} ({expected_size} bytes), got {actual} ({actual_size} bytes)")]
    DigestMismatch {
        expected: String,
        expected_size: i64,
        actual: String,
        actual_size: i64,
    },

    /// Content store operation failed
    #[error("Store error: {store} - {message}")]
    Store { store: String, message: String },

    /// Content or tag not present in a store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// A manifest-like media type with no registered handler
    #[error("Unsupported media type {media_type:?} with digest {digest}")]
    UnsupportedMediaType { media_type: String, digest: String },

    /// Caller-initiated abort
    #[error("Operation cancelled")]
    Cancelled,

    /// Push of a node failed, annotated with its kind and digest
    #[error("Failed pushing {kind:?} with digest {digest}: {source}")]
    Push {
        kind: String,
        digest: String,
        #[source]
        source: Box<OciError>,
    },

    /// Fetch of a node from the source store failed
    #[error("Failed fetching {kind:?} with digest {digest}: {source}")]
    Fetch {
        kind: String,
        digest: String,
        #[source]
        source: Box<OciError>,
    },

    /// Copy aborted after some bytes already landed at the destination
    #[error("Transfer aborted after {transferred} bytes: {source}")]
    Transfer {
        transferred: u64,
        #[source]
        source: Box<OciError>,
    },

    /// Reference string could not be parsed
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl OciError {
    /// Wrap an error with the kind and digest of the node being pushed.
    pub fn push(kind: impl Into<String>, digest: impl Into<String>, source: OciError) -> Self {
        OciError::Push {
            kind: kind.into(),
            digest: digest.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an error with the kind and digest of the node being fetched.
    pub fn fetch(kind: impl Into<String>, digest: impl Into<String>, source: OciError) -> Self {
        OciError::Fetch {
            kind: kind.into(),
            digest: digest.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error is, or wraps, a caller-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            OciError::Cancelled => true,
            OciError::Push { source, .. } | OciError::Fetch { source, .. } | OciError::Transfer { source, .. } => {
                source.is_cancelled()
            }
            _ => false,
        }
    }

    /// Bytes that reached the destination before a copy failed.
    pub fn transferred(&self) -> u64 {
        match self {
            OciError::Transfer { transferred, .. } => *transferred,
            _ => 0,
        }
    }
}

impl From<serde_json::Error> for OciError {
    fn from(err: serde_json::Error) -> Self {
        OciError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for OciError {
    fn from(err: serde_yaml::Error) -> Self {
        OciError::Serialization(err.to_string())
    }
}

/// Result type alias for OLM OCI operations
pub type Result<T> = std::result::Result<T, OciError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display() {
        let error = OciError::Load {
            path: "pkg/package.yaml".to_string(),
            message: "missing name".to_string(),
        };
        assert_eq!(error.to_string(), "Load error: pkg/package.yaml - missing name");
    }

    #[test]
    fn test_unsupported_media_type_display() {
        let error = OciError::UnsupportedMediaType {
            media_type: "application/x-unknown".to_string(),
            digest: "sha256:abc".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Unsupported media type \"application/x-unknown\" with digest sha256:abc"
        );
    }

    #[test]
    fn test_push_error_wraps_source() {
        let error = OciError::push(
            "text/markdown",
            "sha256:abc",
            OciError::Store {
                store: "memory".to_string(),
                message: "boom".to_string(),
            },
        );
        let msg = error.to_string();
        assert!(msg.contains("\"text/markdown\""));
        assert!(msg.contains("sha256:abc"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_fetch_error_names_node() {
        let error = OciError::fetch(
            "application/vnd.cncf.operatorframework.olm.bundle.v1",
            "sha256:abc",
            OciError::NotFound("sha256:abc".to_string()),
        );
        assert!(error.to_string().starts_with("Failed fetching \"application/vnd.cncf.operatorframework.olm.bundle.v1\""));
        assert!(!error.is_cancelled());
        assert!(OciError::fetch("k", "d", OciError::Cancelled).is_cancelled());
    }

    #[test]
    fn test_is_cancelled_looks_through_wrappers() {
        assert!(OciError::Cancelled.is_cancelled());

        let wrapped = OciError::Transfer {
            transferred: 42,
            source: Box::new(OciError::push("k", "d", OciError::Cancelled)),
        };
        assert!(wrapped.is_cancelled());
        assert_eq!(wrapped.transferred(), 42);

        assert!(!OciError::Other("x".to_string()).is_cancelled());
    }

    #[test]
    fn test_transferred_defaults_to_zero() {
        assert_eq!(OciError::NotFound("sha256:abc".to_string()).transferred(), 0);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: OciError = io_error.into();
        assert!(matches!(error, OciError::Io(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let error: OciError = result.unwrap_err().into();
        assert!(matches!(error, OciError::Serialization(_)));
    }

    #[test]
    fn test_serde_yaml_error_conversion() {
        let result: std::result::Result<serde_yaml::Value, _> =
            serde_yaml::from_str("invalid: yaml: content:");
        let error: OciError = result.unwrap_err().into();
        assert!(matches!(error, OciError::Serialization(_)));
    }
}
