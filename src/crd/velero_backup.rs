//! Velero Backup resource
//!
//! Typed view of `backups.velero.io`, the job executed by Velero. The
//! operator creates these and reads their phase; the phase is written by
//! Velero alone.

use std::collections::BTreeMap;

use kube::ResourceExt;

/// Label opting a Velero backup in to tracking by the operator
pub const TRACKING_LABEL_KEY: &str = "ocm-backup";
/// Value of [`TRACKING_LABEL_KEY`]
pub const TRACKING_LABEL_VALUE: &str = "velero";

/// Annotation recording the namespace of the owning Backup
///
/// Owner references carry no namespace and the Velero backup lives in
/// Velero's namespace, not the intent's.
pub const OWNER_NAMESPACE_ANNOTATION: &str = "cluster.open-cluster-management.io/backup-namespace";

/// Resource kind Velero must never back up
pub const CERTIFICATE_SIGNING_REQUESTS: &str = "certificatesigningrequests";

/// Phases after which Velero no longer touches a backup
pub const TERMINAL_PHASES: &[&str] = &["Completed", "Failed", "PartiallyFailed"];

/// Whether `phase` ends the backup
pub fn is_terminal_phase(phase: &str) -> bool {
    TERMINAL_PHASES.contains(&phase)
}

/// Velero's kind is also called `Backup`; the derive lives in its own
/// module and the generated type is re-exported as [`VeleroBackup`].
mod velero_types {
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    /// Velero Backup specification (subset used by the operator)
    #[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[kube(
        group = "velero.io",
        version = "v1",
        kind = "Backup",
        plural = "backups",
        namespaced,
        status = "VeleroBackupStatus"
    )]
    #[serde(rename_all = "camelCase")]
    pub struct VeleroBackupSpec {
        /// Namespaces to include
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub included_namespaces: Vec<String>,

        /// Resource kinds to exclude
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pub excluded_resources: Vec<String>,

        /// Whether cluster-scoped resources are backed up
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub include_cluster_resources: Option<bool>,
    }

    /// Velero Backup status (subset used by the operator)
    #[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct VeleroBackupStatus {
        /// Phase reported by Velero
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub phase: Option<String>,
    }
}

pub use velero_types::{Backup as VeleroBackup, VeleroBackupSpec, VeleroBackupStatus};

impl VeleroBackup {
    /// Current phase; an empty phase reads as `None`
    pub fn phase(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .filter(|p| !p.is_empty())
    }

    /// Labels stamped on every Velero backup this operator creates
    pub fn tracking_labels() -> BTreeMap<String, String> {
        BTreeMap::from([(
            TRACKING_LABEL_KEY.to_string(),
            TRACKING_LABEL_VALUE.to_string(),
        )])
    }

    /// `namespace/name` key used in logs and errors
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }
}
