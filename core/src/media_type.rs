//! Media types, artifact types and annotation keys.

// OCI
pub const ARTIFACT_MANIFEST: &str = "application/vnd.oci.artifact.manifest.v1+json";
pub const IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const IMAGE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";
pub const IMAGE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
pub const IMAGE_LAYER_ZSTD: &str = "application/vnd.oci.image.layer.v1.tar+zstd";
pub const IMAGE_LAYER_NON_DISTRIBUTABLE_GZIP: &str =
    "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip";
pub const EMPTY_JSON: &str = "application/vnd.oci.empty.v1+json";

// Docker
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
pub const DOCKER_LAYER: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
pub const DOCKER_FOREIGN_LAYER: &str = "application/vnd.docker.image.rootfs.foreign.diff.tar";
pub const DOCKER_FOREIGN_LAYER_GZIP: &str =
    "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";

// Operator framework artifact types
pub const CATALOG: &str = "application/vnd.cncf.operatorframework.olm.catalog.v1";
pub const PACKAGE: &str = "application/vnd.cncf.operatorframework.olm.package.v1";
pub const CHANNEL: &str = "application/vnd.cncf.operatorframework.olm.channel.v1";
pub const BUNDLE: &str = "application/vnd.cncf.operatorframework.olm.bundle.v1";

// Operator framework blobs
pub const PACKAGE_METADATA: &str =
    "application/vnd.cncf.operatorframework.olm.package.metadata.v1+yaml";
pub const UPGRADE_EDGES: &str =
    "application/vnd.cncf.operatorframework.olm.upgrade-edges.v1+yaml";
pub const CHANNEL_METADATA: &str =
    "application/vnd.cncf.operatorframework.olm.channel.metadata.v1+yaml";
pub const BUNDLE_METADATA: &str =
    "application/vnd.cncf.operatorframework.olm.bundle.metadata.v1+yaml";
pub const RELATED_IMAGES: &str =
    "application/vnd.cncf.operatorframework.olm.bundle.related-images.v1+yaml";
pub const BUNDLE_CONTENT: &str =
    "application/vnd.cncf.operatorframework.olm.bundle.content.v1.tar+gzip";
pub const PROPERTIES: &str = "application/vnd.cncf.operatorframework.olm.properties.v1+yaml";
pub const CONSTRAINTS: &str = "application/vnd.cncf.operatorframework.olm.constraints.v1+yaml";

/// Packaging convention carried by bundle content produced from a plain directory.
pub const BUNDLE_FORMAT_REGISTRY_V1: &str = "registry+v1";

// Plain
pub const MARKDOWN: &str = "text/markdown";
pub const SVG: &str = "image/svg+xml";
pub const PNG: &str = "image/png";

/// Annotation keys
pub mod annotations {
    pub const NAME: &str = "io.operatorframework.name";
    pub const BUNDLE_PACKAGE: &str = "io.operatorframework.bundle.package";
    pub const BUNDLE_VERSION: &str = "io.operatorframework.bundle.version";
    pub const BUNDLE_RELEASE: &str = "io.operatorframework.bundle.release";
    pub const BUNDLE_CONTENT_MEDIA_TYPE: &str = "io.operatorframework.bundle.content.mediatype";

    /// Tag annotation on `index.json` entries of an image layout.
    pub const REF_NAME: &str = "org.opencontainers.image.ref.name";
}

/// Whether `media_type` is one of the OCI/Docker image manifest or index formats.
pub fn is_image_manifest(media_type: &str) -> bool {
    matches!(
        media_type,
        IMAGE_INDEX | IMAGE_MANIFEST | DOCKER_MANIFEST_LIST | DOCKER_MANIFEST
    )
}

/// Whether `media_type` is any manifest-like type (references other content).
pub fn is_manifest(media_type: &str) -> bool {
    media_type == ARTIFACT_MANIFEST || is_image_manifest(media_type)
}
