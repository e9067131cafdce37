//! Declarative (file-based) catalog projection.
//!
//! Flattens a package tree into parallel lists of `olm.package`,
//! `olm.channel` and `olm.bundle` objects. Bundle images point at the
//! digest the bundle artifact has (or would have) once pushed to `repo`.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use olm_oci_core::error::{OciError, Result};
use serde::{Deserialize, Serialize};

use super::model::{Bundle, BundleContent, Catalog, Package, TypeValue};
use crate::graph::GraphBuilder;

pub const SCHEMA_PACKAGE: &str = "olm.package";
pub const SCHEMA_CHANNEL: &str = "olm.channel";
pub const SCHEMA_BUNDLE: &str = "olm.bundle";

const PROPERTY_BUNDLE_MEDIA_TYPE: &str = "olm.bundle.mediatype";
const PROPERTY_PACKAGE: &str = "olm.package";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclarativeConfig {
    pub packages: Vec<DeclPackage>,
    pub channels: Vec<DeclChannel>,
    pub bundles: Vec<DeclBundle>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclPackage {
    pub schema: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<DeclIcon>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<TypeValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclIcon {
    pub base64data: String,
    pub mediatype: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclChannel {
    pub schema: String,
    pub package: String,
    pub name: String,
    pub entries: Vec<ChannelEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<TypeValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replaces: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclBundle {
    pub schema: String,
    pub package: String,
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<TypeValue>,
}

impl DeclarativeConfig {
    pub fn extend(&mut self, other: DeclarativeConfig) {
        self.packages.extend(other.packages);
        self.channels.extend(other.channels);
        self.bundles.extend(other.bundles);
    }

    /// Render as a YAML stream: packages, then channels, then bundles.
    pub fn to_yaml(&self) -> Result<String> {
        let mut documents = Vec::new();
        for p in &self.packages {
            documents.push(serde_yaml::to_string(p)?);
        }
        for c in &self.channels {
            documents.push(serde_yaml::to_string(c)?);
        }
        for b in &self.bundles {
            documents.push(serde_yaml::to_string(b)?);
        }
        Ok(documents.join("---\n"))
    }
}

impl Catalog {
    /// Concatenated projection of every package.
    pub async fn to_declarative_config(&self, repo: &str, builder: &GraphBuilder) -> Result<DeclarativeConfig> {
        let mut out = DeclarativeConfig::default();
        for package in &self.packages {
            out.extend(package.to_declarative_config(repo, builder).await?);
        }
        Ok(out)
    }
}

impl Package {
    /// `<package>.v<version>-<release>`
    pub fn bundle_name(&self, bundle: &Bundle) -> String {
        format!("{}.v{}", self.metadata.name, bundle.full_version())
    }

    pub async fn to_declarative_config(&self, repo: &str, builder: &GraphBuilder) -> Result<DeclarativeConfig> {
        let package = DeclPackage {
            schema: SCHEMA_PACKAGE.to_string(),
            name: self.metadata.name.clone(),
            icon: self.icon.as_ref().map(|icon| DeclIcon {
                base64data: base64::engine::general_purpose::STANDARD.encode(&icon.data),
                mediatype: icon.media_type.clone(),
            }),
            description: self.description.clone(),
            properties: self.properties.clone(),
        };

        let mut channels = Vec::with_capacity(self.channels.len());
        let mut bundles: BTreeMap<String, DeclBundle> = BTreeMap::new();

        for channel in &self.channels {
            let lookup: BTreeMap<String, &Bundle> = channel
                .bundles
                .iter()
                .map(|b| (b.full_version(), b))
                .collect();

            let mut entries = Vec::with_capacity(channel.bundles.len());
            for bundle in &channel.bundles {
                if self.upgrade_edges.is_empty() {
                    entries.push(ChannelEntry {
                        name: self.bundle_name(bundle),
                        replaces: String::new(),
                    });
                    continue;
                }
                let from = bundle.full_version();
                for to in self.upgrade_edges.get(&from).into_iter().flatten() {
                    let Some(target) = lookup.get(to) else {
                        continue;
                    };
                    entries.push(ChannelEntry {
                        name: self.bundle_name(target),
                        replaces: self.bundle_name(bundle),
                    });
                }
            }

            channels.push(DeclChannel {
                schema: SCHEMA_CHANNEL.to_string(),
                package: self.metadata.name.clone(),
                name: channel.metadata.name.clone(),
                entries,
                properties: channel.properties.clone(),
            });

            for bundle in &channel.bundles {
                let key = bundle.full_version();
                if bundles.contains_key(&key) {
                    continue;
                }
                let digest = bundle_digest(bundle, builder).await?;
                bundles.insert(key, self.decl_bundle(bundle, repo, &digest));
            }
        }

        let mut bundles: Vec<DeclBundle> = bundles.into_values().collect();
        bundles.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(DeclarativeConfig {
            packages: vec![package],
            channels,
            bundles,
        })
    }

    fn decl_bundle(&self, bundle: &Bundle, repo: &str, digest: &str) -> DeclBundle {
        let mut properties = bundle.properties.clone();
        properties.push(TypeValue {
            type_: PROPERTY_BUNDLE_MEDIA_TYPE.to_string(),
            value: serde_json::Value::String(bundle.content_media_type.clone()),
        });
        properties.push(TypeValue {
            type_: PROPERTY_PACKAGE.to_string(),
            value: serde_json::json!({
                "packageName": bundle.metadata.package,
                "version": bundle.metadata.version.to_string(),
                "release": bundle.metadata.release,
            }),
        });
        properties.extend(bundle.constraints.iter().cloned());

        DeclBundle {
            schema: SCHEMA_BUNDLE.to_string(),
            package: self.metadata.name.clone(),
            name: self.bundle_name(bundle),
            image: format!("oci://{}@{}", repo, digest),
            properties,
        }
    }
}

/// Digest of the bundle artifact, from a dry push unless the content was
/// never fetched, in which case the recorded digest is trusted.
async fn bundle_digest(bundle: &Bundle, builder: &GraphBuilder) -> Result<String> {
    if let BundleContent::Absent = bundle.content {
        return bundle
            .digest
            .clone()
            .ok_or_else(|| OciError::Other("cannot compute digest for sparse bundle".to_string()));
    }
    let desc = builder.dry_push(Arc::new(bundle.clone())).await?;
    Ok(desc.digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::model::tests::bundle;
    use crate::catalog::model::{Channel, ChannelMetadata, Icon, PackageMetadata, UpgradeEdges};
    use olm_oci_core::media_type;

    fn package(edges: UpgradeEdges) -> Package {
        Package {
            metadata: PackageMetadata {
                name: "etcd".to_string(),
                ..Default::default()
            },
            description: "# etcd".to_string(),
            icon: Some(Icon {
                data: b"<svg/>".to_vec(),
                media_type: media_type::SVG.to_string(),
            }),
            upgrade_edges: edges,
            properties: Vec::new(),
            channels: vec![Channel {
                metadata: ChannelMetadata {
                    name: "stable".to_string(),
                },
                properties: Vec::new(),
                bundles: vec![bundle("1.0.0", 0), bundle("1.0.0", 1), bundle("2.0.0", 0)],
            }],
        }
    }

    fn example_edges() -> UpgradeEdges {
        UpgradeEdges::from([
            ("1.0.0-0".to_string(), vec!["2.0.0-0".to_string(), "1.0.0-1".to_string()]),
            ("1.0.0-1".to_string(), vec!["2.0.0-0".to_string()]),
        ])
    }

    #[tokio::test]
    async fn test_channel_entries_follow_edges() {
        let pkg = package(example_edges());
        let fbc = pkg.to_declarative_config("quay.io/olm/etcd", &GraphBuilder::default()).await.unwrap();

        let entries = &fbc.channels[0].entries;
        let pairs: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e.name.as_str(), e.replaces.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("etcd.v2.0.0-0", "etcd.v1.0.0-0"),
                ("etcd.v1.0.0-1", "etcd.v1.0.0-0"),
                ("etcd.v2.0.0-0", "etcd.v1.0.0-1"),
            ]
        );
    }

    #[tokio::test]
    async fn test_plain_entries_without_edges() {
        let pkg = package(UpgradeEdges::new());
        let fbc = pkg.to_declarative_config("quay.io/olm/etcd", &GraphBuilder::default()).await.unwrap();

        let names: Vec<&str> = fbc.channels[0].entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["etcd.v1.0.0-0", "etcd.v1.0.0-1", "etcd.v2.0.0-0"]);
        assert!(fbc.channels[0].entries.iter().all(|e| e.replaces.is_empty()));
    }

    #[tokio::test]
    async fn test_bundles_carry_dry_push_digest() {
        let pkg = package(UpgradeEdges::new());
        let builder = GraphBuilder::default();
        let fbc = pkg.to_declarative_config("quay.io/olm/etcd", &builder).await.unwrap();

        let expected = builder.dry_push(Arc::new(bundle("1.0.0", 0))).await.unwrap();
        assert_eq!(fbc.bundles.len(), 3);
        assert_eq!(fbc.bundles[0].name, "etcd.v1.0.0-0");
        assert_eq!(fbc.bundles[0].image, format!("oci://quay.io/olm/etcd@{}", expected.digest));

        let types: Vec<&str> = fbc.bundles[0].properties.iter().map(|p| p.type_.as_str()).collect();
        assert_eq!(types, vec!["olm.bundle.mediatype", "olm.package"]);
        assert_eq!(
            fbc.bundles[0].properties[1].value,
            serde_json::json!({"packageName": "etcd", "release": 0, "version": "1.0.0"})
        );
    }

    #[tokio::test]
    async fn test_sparse_bundle() {
        let mut pkg = package(UpgradeEdges::new());
        let sparse = &mut pkg.channels[0].bundles[0];
        sparse.content = BundleContent::Absent;

        let err = pkg
            .to_declarative_config("quay.io/olm/etcd", &GraphBuilder::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sparse bundle"));

        pkg.channels[0].bundles[0].digest = Some("sha256:abc".to_string());
        let fbc = pkg.to_declarative_config("quay.io/olm/etcd", &GraphBuilder::default()).await.unwrap();
        assert_eq!(fbc.bundles[0].image, "oci://quay.io/olm/etcd@sha256:abc");
    }

    #[tokio::test]
    async fn test_yaml_stream() {
        let pkg = package(UpgradeEdges::new());
        let fbc = pkg.to_declarative_config("quay.io/olm/etcd", &GraphBuilder::default()).await.unwrap();
        let yaml = fbc.to_yaml().unwrap();

        assert!(yaml.starts_with("schema: olm.package\nname: etcd\nicon:\n  base64data: PHN2Zy8+\n"));
        assert_eq!(yaml.matches("---\n").count(), 4);
        assert!(yaml.contains("schema: olm.channel\n"));
    }
}
