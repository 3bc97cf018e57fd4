//! Namespace selection for hub backups
//!
//! Every managed cluster has a namespace on the hub named after it. A hub
//! backup captures those namespaces plus a fixed set of platform namespaces
//! that depend on the product edition.

use std::fmt;
use std::str::FromStr;

use kube::ResourceExt;

use crate::crd::{ManagedCluster, LOCAL_CLUSTER_NAME};
use crate::error::{Error, Result};

const OCM_PLATFORM_NAMESPACES: &[&str] = &[
    "open-cluster-management",
    "open-cluster-management-hub",
    "hive",
    "openshift-operator-lifecycle-manager",
];

const ACM_PLATFORM_NAMESPACES: &[&str] = &[
    "open-cluster-management-agent",
    "open-cluster-management-hub",
    "hive",
    "openshift-operator-lifecycle-manager",
];

/// Product edition the hub runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Edition {
    /// Upstream Open Cluster Management
    #[default]
    Ocm,
    /// Advanced Cluster Management
    Acm,
}

impl Edition {
    /// Platform namespaces always captured for this edition
    pub fn platform_namespaces(self) -> PlatformNamespaces {
        let table = match self {
            Edition::Ocm => OCM_PLATFORM_NAMESPACES,
            Edition::Acm => ACM_PLATFORM_NAMESPACES,
        };
        PlatformNamespaces::new(table.iter().map(|s| s.to_string()))
    }
}

impl FromStr for Edition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ocm" => Ok(Edition::Ocm),
            "acm" => Ok(Edition::Acm),
            other => Err(Error::config(format!(
                "Invalid edition '{}': must be one of: ocm, acm",
                other
            ))),
        }
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edition::Ocm => f.write_str("ocm"),
            Edition::Acm => f.write_str("acm"),
        }
    }
}

/// Namespaces appended to every backup regardless of cluster membership
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlatformNamespaces(Vec<String>);

impl PlatformNamespaces {
    pub fn new(namespaces: impl IntoIterator<Item = String>) -> Self {
        Self(namespaces.into_iter().collect())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Compute the namespaces a hub backup includes.
///
/// Managed cluster names come first in input order, with `local-cluster`
/// skipped, followed by the platform namespaces. Nothing is deduplicated.
/// Fails with [`Error::NoTargets`] when no managed cluster qualifies.
pub fn select_namespaces(
    managed_clusters: &[ManagedCluster],
    platform: &PlatformNamespaces,
) -> Result<Vec<String>> {
    let mut namespaces: Vec<String> = managed_clusters
        .iter()
        .map(|mc| mc.name_any())
        .filter(|name| name != LOCAL_CLUSTER_NAME)
        .collect();

    if namespaces.is_empty() {
        return Err(Error::NoTargets);
    }

    namespaces.extend(platform.as_slice().iter().cloned());
    Ok(namespaces)
}
