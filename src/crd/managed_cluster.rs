//! ManagedCluster resource
//!
//! Read-only view of `managedclusters.cluster.open-cluster-management.io`.
//! Only the name matters to the operator: each managed cluster owns a hub
//! namespace of the same name.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the hub's self-registration, never backed up as a managed cluster
pub const LOCAL_CLUSTER_NAME: &str = "local-cluster";

/// ManagedCluster specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster",
    plural = "managedclusters"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Whether the hub accepts the cluster's registration
    #[serde(default)]
    pub hub_accepts_client: bool,
}
