//! Object repository
//!
//! The Kubernetes API server is the only shared state between the two
//! reconcilers. Reconcilers talk to it through [`ObjectRepository`] so the
//! real client can be swapped for a mock or an in-memory store in tests.

mod kube_repository;

pub use kube_repository::KubeRepository;

use std::fmt;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};

#[cfg(test)]
use mockall::automock;

use crate::crd::{Backup, ManagedCluster, VeleroBackup};
use crate::error::Result;

/// Namespaced identity of an object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a namespaced resource; a missing namespace reads as empty
    pub fn of<K: Resource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Operations the reconcilers need from the object store
///
/// Each call is a single bounded API request. Implementations report a
/// missing object as `Error::NotFound` and an existing object or stale
/// resourceVersion as `Error::Conflict`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectRepository: Send + Sync {
    /// Fetch a Backup intent
    async fn get_backup(&self, key: &ObjectKey) -> Result<Backup>;

    /// Create a Backup intent
    async fn create_backup(&self, backup: &Backup) -> Result<Backup>;

    /// Replace a Backup's status subresource
    ///
    /// The object's resourceVersion is sent along, so a concurrent writer
    /// causes a Conflict instead of a lost update.
    async fn update_backup_status(&self, backup: &Backup) -> Result<Backup>;

    /// Fetch a Velero backup
    async fn get_velero_backup(&self, key: &ObjectKey) -> Result<VeleroBackup>;

    /// List Velero backups across all namespaces
    async fn list_velero_backups(&self) -> Result<Vec<VeleroBackup>>;

    /// Create a Velero backup
    async fn create_velero_backup(&self, velero_backup: &VeleroBackup) -> Result<VeleroBackup>;

    /// List all ManagedClusters
    async fn list_managed_clusters(&self) -> Result<Vec<ManagedCluster>>;
}
