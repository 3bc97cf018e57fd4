//! Custom Resource Definitions used by the OCM Backup Operator
//!
//! Only the `Backup` intent is owned by this operator. The Velero and
//! ManagedCluster types mirror resources installed by other components and
//! are modelled here so they can be read and written through typed APIs.

mod backup;
mod managed_cluster;
mod velero_backup;

pub use backup::*;
pub use managed_cluster::*;
pub use velero_backup::*;

use kube::CustomResourceExt;

/// Generate YAML manifests for the CRDs this operator owns
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    Ok(vec![serde_yaml::to_string(&Backup::crd())?])
}
