//! Upgrade-edge expansion.
//!
//! Packages declare upgrade edges between plain versions. At load time the
//! declaration is expanded over the releases actually present: each release
//! of a declared source version may upgrade to every later release of its own
//! version and to the newest release of each declared target version.

use std::collections::BTreeMap;

use olm_oci_core::error::{OciError, Result};

use super::model::{BundleMetadata, UpgradeEdges};

/// Expand `declared` (version to target versions) over `bundles`.
///
/// Only releases of declared source versions get an entry; a release
/// without an entry has no upgrade targets. Each target list is sorted in
/// descending string order of `<version>-<release>`.
pub fn expand_upgrade_edges(
    declared: &BTreeMap<String, Vec<String>>,
    bundles: &[BundleMetadata],
) -> Result<UpgradeEdges> {
    let mut by_version: BTreeMap<String, Vec<&BundleMetadata>> = BTreeMap::new();
    for bundle in bundles {
        by_version.entry(bundle.version.to_string()).or_default().push(bundle);
    }
    let by_version: BTreeMap<String, Vec<String>> = by_version
        .into_iter()
        .map(|(version, mut releases)| {
            releases.sort_by_key(|b| b.release);
            let full = releases.iter().map(|b| b.full_version()).collect();
            (version, full)
        })
        .collect();

    let mut expanded = UpgradeEdges::new();
    for (from_version, to_versions) in declared {
        let Some(releases) = by_version.get(from_version) else {
            tracing::warn!(version = %from_version, "Upgrade edge source has no bundles");
            continue;
        };

        for (i, from) in releases.iter().enumerate() {
            let mut targets: Vec<String> = releases[i + 1..].to_vec();
            for to_version in to_versions {
                let newest = by_version
                    .get(to_version)
                    .and_then(|r| r.last())
                    .ok_or_else(|| {
                        OciError::Other(format!(
                            "upgrade edge {} -> {}: no bundles found with version {:?}",
                            from_version, to_version, to_version
                        ))
                    })?;
                targets.push(newest.clone());
            }
            targets.sort_by(|a, b| b.cmp(a));
            expanded.insert(from.clone(), targets);
        }
    }
    Ok(expanded)
}
