//! Load artifact definitions from a directory layout.
//!
//! ```text
//! <package>/
//!   package.yaml          name, displayName, keywords, urls, maintainers
//!   README.md             description
//!   icon.svg | icon.png   optional
//!   upgrade-edges.yaml    upgradeEdges: {<version>: [<version>, ...]}
//!   properties.yaml       optional, properties: [...]
//!   bundles/<dir>/        one bundle per directory
//!   channels/<dir>/       channel.yaml, entries.yaml, optional properties.yaml
//! ```
//!
//! A bundle directory carries `metadata/annotations.yaml` and, optionally,
//! `metadata/{properties,constraints,relatedImages}.yaml`. For `registry+v1`
//! bundles the version and related images come from the
//! ClusterServiceVersion under `manifests/`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use olm_oci_core::error::{OciError, Result};
use olm_oci_core::media_type::{self, annotations};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::edges::expand_upgrade_edges;
use super::model::{
    Bundle, BundleContent, BundleMetadata, Catalog, Channel, ChannelMetadata, Icon, Package,
    PackageMetadata, RelatedImage, TypeValue,
};

const LEGACY_PACKAGE: &str = "operators.operatorframework.io.bundle.package.v1";
const LEGACY_MEDIA_TYPE: &str = "operators.operatorframework.io.bundle.mediatype.v1";
const LEGACY_KEYS: [&str; 6] = [
    "operators.operatorframework.io.bundle.channel.default.v1",
    "operators.operatorframework.io.bundle.channels.v1",
    "operators.operatorframework.io.bundle.manifests.v1",
    LEGACY_MEDIA_TYPE,
    "operators.operatorframework.io.bundle.metadata.v1",
    LEGACY_PACKAGE,
];

#[derive(Deserialize)]
struct UpgradeEdgesFile {
    #[serde(rename = "upgradeEdges", default)]
    upgrade_edges: BTreeMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct PropertiesFile {
    #[serde(default)]
    properties: Vec<TypeValue>,
}

#[derive(Deserialize)]
struct ConstraintsFile {
    #[serde(default)]
    constraints: Vec<TypeValue>,
}

#[derive(Deserialize)]
struct RelatedImagesFile {
    #[serde(rename = "relatedImages", default)]
    related_images: Vec<RelatedImage>,
}

#[derive(Deserialize)]
struct AnnotationsFile {
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct EntriesFile {
    #[serde(default)]
    entries: Vec<String>,
}

fn load_error(path: &Path, message: impl std::fmt::Display) -> OciError {
    OciError::Load {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

fn read_required(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| load_error(path, e))
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(load_error(path, e)),
    }
}

fn parse_yaml<T: DeserializeOwned>(path: &Path, data: &[u8]) -> Result<T> {
    serde_yaml::from_slice(data).map_err(|e| load_error(path, e))
}

/// Subdirectories of `dir`, sorted by name.
fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| load_error(dir, e))? {
        let entry = entry.map_err(|e| load_error(dir, e))?;
        if entry.file_type().map_err(|e| load_error(dir, e))?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn load_type_values(path: &Path) -> Result<Vec<TypeValue>> {
    match read_optional(path)? {
        Some(data) => Ok(parse_yaml::<PropertiesFile>(path, &data)?.properties),
        None => Ok(Vec::new()),
    }
}

/// Load every package directory (one containing `package.yaml`) under `dir`.
pub fn load_catalog(dir: &Path) -> Result<Catalog> {
    let mut packages = Vec::new();
    for package_dir in subdirectories(dir)? {
        if !package_dir.join("package.yaml").is_file() {
            continue;
        }
        packages.push(load_package(&package_dir)?);
    }
    packages.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    tracing::debug!(dir = %dir.display(), packages = packages.len(), "Loaded catalog");
    Ok(Catalog { packages })
}

/// Load a package directory.
pub fn load_package(dir: &Path) -> Result<Package> {
    let metadata_path = dir.join("package.yaml");
    let metadata: PackageMetadata = parse_yaml(&metadata_path, &read_required(&metadata_path)?)?;

    let readme = dir.join("README.md");
    let description = String::from_utf8(read_required(&readme)?).map_err(|e| load_error(&readme, e))?;

    let icon = load_icon(dir)?;

    let mut bundles = Vec::new();
    for bundle_dir in subdirectories(&dir.join("bundles"))? {
        bundles.push(load_bundle(&bundle_dir)?);
    }

    let edges_path = dir.join("upgrade-edges.yaml");
    let declared: UpgradeEdgesFile = parse_yaml(&edges_path, &read_required(&edges_path)?)?;
    let bundle_metadata: Vec<BundleMetadata> = bundles.iter().map(|b| b.metadata.clone()).collect();
    let upgrade_edges =
        expand_upgrade_edges(&declared.upgrade_edges, &bundle_metadata).map_err(|e| load_error(&edges_path, e))?;

    let properties = load_type_values(&dir.join("properties.yaml"))?;

    let mut channels = Vec::new();
    for channel_dir in subdirectories(&dir.join("channels"))? {
        channels.push(load_channel(&channel_dir, &bundles)?);
    }

    tracing::debug!(
        package = %metadata.name,
        bundles = bundles.len(),
        channels = channels.len(),
        "Loaded package"
    );

    Ok(Package {
        metadata,
        description,
        icon,
        upgrade_edges,
        properties,
        channels,
    })
}

fn load_icon(dir: &Path) -> Result<Option<Icon>> {
    for (file, media_type) in [("icon.svg", media_type::SVG), ("icon.png", media_type::PNG)] {
        let path = dir.join(file);
        if path.is_file() {
            return Ok(Some(Icon {
                data: read_required(&path)?,
                media_type: media_type.to_string(),
            }));
        }
    }
    Ok(None)
}

/// Load a channel directory. Each entry names a version; every release of
/// that version among `bundles` joins the channel.
pub fn load_channel(dir: &Path, bundles: &[Bundle]) -> Result<Channel> {
    let metadata_path = dir.join("channel.yaml");
    let metadata: ChannelMetadata = parse_yaml(&metadata_path, &read_required(&metadata_path)?)?;

    let entries_path = dir.join("entries.yaml");
    let entries: EntriesFile = parse_yaml(&entries_path, &read_required(&entries_path)?)?;

    let mut by_version: HashMap<String, Vec<&Bundle>> = HashMap::new();
    for bundle in bundles {
        by_version
            .entry(bundle.metadata.version.to_string())
            .or_default()
            .push(bundle);
    }

    let mut members = Vec::new();
    for version in &entries.entries {
        let releases = by_version
            .get(version)
            .ok_or_else(|| load_error(&entries_path, format!("no bundles found with version {:?}", version)))?;
        members.extend(releases.iter().map(|b| (*b).clone()));
    }

    Ok(Channel {
        metadata,
        properties: load_type_values(&dir.join("properties.yaml"))?,
        bundles: members,
    })
}

/// Load a bundle directory.
pub fn load_bundle(dir: &Path) -> Result<Bundle> {
    let annotations_path = dir.join("metadata").join("annotations.yaml");
    let bundle_annotations = load_bundle_annotations(&annotations_path)?;

    let content_media_type = bundle_annotations
        .get(annotations::BUNDLE_CONTENT_MEDIA_TYPE)
        .cloned()
        .ok_or_else(|| load_error(&annotations_path, "could not detect bundle content media type"))?;
    let package = bundle_annotations
        .get(annotations::BUNDLE_PACKAGE)
        .cloned()
        .ok_or_else(|| {
            load_error(
                &annotations_path,
                format!("missing bundle package annotation {:?}", annotations::BUNDLE_PACKAGE),
            )
        })?;

    let (metadata, related_images) = if content_media_type == media_type::BUNDLE_FORMAT_REGISTRY_V1 {
        load_registry_v1(dir, package)?
    } else {
        let metadata = bundle_metadata_from_annotations(&annotations_path, &bundle_annotations, package)?;
        let related_path = dir.join("metadata").join("relatedImages.yaml");
        let related_images = match read_optional(&related_path)? {
            Some(data) => parse_yaml::<RelatedImagesFile>(&related_path, &data)?.related_images,
            None => Vec::new(),
        };
        (metadata, related_images)
    };

    let constraints_path = dir.join("metadata").join("constraints.yaml");
    let constraints = match read_optional(&constraints_path)? {
        Some(data) => parse_yaml::<ConstraintsFile>(&constraints_path, &data)?.constraints,
        None => Vec::new(),
    };

    Ok(Bundle {
        metadata,
        properties: load_type_values(&dir.join("metadata").join("properties.yaml"))?,
        constraints,
        related_images,
        content_media_type,
        content: BundleContent::Directory(dir.to_path_buf()),
        digest: None,
    })
}

/// Read `metadata/annotations.yaml`, mapping legacy operator-framework keys
/// onto their current names and dropping the rest of the legacy set.
fn load_bundle_annotations(path: &Path) -> Result<BTreeMap<String, String>> {
    let mut file: AnnotationsFile = parse_yaml(path, &read_required(path)?)?;
    let values = &mut file.annotations;

    if let Some(package) = values.get(LEGACY_PACKAGE).cloned() {
        values.insert(annotations::BUNDLE_PACKAGE.to_string(), package);
    }
    if let Some(media_type) = values.get(LEGACY_MEDIA_TYPE).cloned() {
        values.insert(annotations::BUNDLE_CONTENT_MEDIA_TYPE.to_string(), media_type);
    }
    for key in LEGACY_KEYS {
        values.remove(key);
    }
    Ok(file.annotations)
}

fn bundle_metadata_from_annotations(
    path: &Path,
    values: &BTreeMap<String, String>,
    package: String,
) -> Result<BundleMetadata> {
    let version = values.get(annotations::BUNDLE_VERSION).ok_or_else(|| {
        load_error(
            path,
            format!("missing bundle version annotation {:?}", annotations::BUNDLE_VERSION),
        )
    })?;
    let version = semver::Version::parse(version)
        .map_err(|e| load_error(path, format!("invalid bundle version {:?}: {}", version, e)))?;

    let release = match values.get(annotations::BUNDLE_RELEASE) {
        Some(r) => r
            .parse::<u64>()
            .map_err(|e| load_error(path, format!("invalid bundle release {:?}: {}", r, e)))?,
        None => 0,
    };

    Ok(BundleMetadata {
        package,
        version,
        release,
    })
}

/// Version and related images of a `registry+v1` bundle, read from its
/// ClusterServiceVersion. Related images are the declared ones plus every
/// deployment container image, deduplicated and sorted.
fn load_registry_v1(dir: &Path, package: String) -> Result<(BundleMetadata, Vec<RelatedImage>)> {
    let (csv_path, csv) = find_csv(&dir.join("manifests"))?;
    let spec = &csv["spec"];

    let version = spec["version"]
        .as_str()
        .ok_or_else(|| load_error(&csv_path, "ClusterServiceVersion has no spec.version"))?;
    let version = semver::Version::parse(version)
        .map_err(|e| load_error(&csv_path, format!("invalid bundle version {:?}: {}", version, e)))?;

    let mut related: Vec<RelatedImage> = match spec.get("relatedImages") {
        Some(value) if !value.is_null() => serde_yaml::from_value(value.clone())
            .map_err(|e| load_error(&csv_path, format!("invalid spec.relatedImages: {}", e)))?,
        _ => Vec::new(),
    };

    let mut seen: BTreeSet<String> = related.iter().map(|r| r.image.clone()).collect();
    for image in operator_images(spec) {
        if seen.insert(image.clone()) {
            related.push(RelatedImage {
                image,
                name: String::new(),
            });
        }
    }
    related.sort();

    Ok((
        BundleMetadata {
            package,
            version,
            release: 0,
        },
        related,
    ))
}

fn find_csv(manifests: &Path) -> Result<(PathBuf, serde_yaml::Value)> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(manifests).map_err(|e| load_error(manifests, e))? {
        let path = entry.map_err(|e| load_error(manifests, e))?.path();
        let is_manifest = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml") | Some("json")
        );
        if path.is_file() && is_manifest {
            files.push(path);
        }
    }
    files.sort();

    for path in files {
        let value: serde_yaml::Value = parse_yaml(&path, &read_required(&path)?)?;
        if value["kind"].as_str() == Some("ClusterServiceVersion") {
            return Ok((path, value));
        }
    }
    Err(load_error(manifests, "no ClusterServiceVersion found"))
}

/// Container and init container images of a `deployment` install strategy.
fn operator_images(spec: &serde_yaml::Value) -> Vec<String> {
    let install = &spec["install"];
    if install["strategy"].as_str() != Some("deployment") {
        return Vec::new();
    }

    let mut images = Vec::new();
    let deployments = install["spec"]["deployments"].as_sequence().cloned().unwrap_or_default();
    for deployment in &deployments {
        let pod = &deployment["spec"]["template"]["spec"];
        for key in ["containers", "initContainers"] {
            for container in pod[key].as_sequence().map(Vec::as_slice).unwrap_or_default() {
                if let Some(image) = container["image"].as_str() {
                    images.push(image.to_string());
                }
            }
        }
    }
    images
}
