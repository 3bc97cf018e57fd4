//! Backup Custom Resource Definition
//!
//! The user-facing intent. Creating a Backup with a `veleroConfig` asks the
//! operator to run one Velero backup of the hub; the status mirrors that
//! Velero backup's identity and phase.

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::velero_backup::{is_terminal_phase, VeleroBackup};

/// Backup resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1alpha1",
    kind = "Backup",
    plural = "backups",
    singular = "backup",
    namespaced,
    status = "BackupStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.veleroBackup.phase"}"#,
    printcolumn = r#"{"name": "Velero Backup", "type": "string", "jsonPath": ".status.veleroBackup.name"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    /// Velero placement. Without it no Velero backup is requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velero_config: Option<VeleroConfig>,
}

/// Where the Velero backup is created
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VeleroConfig {
    /// Namespace Velero operates in
    pub namespace: String,
}

/// Backup status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    /// The Velero backup executing this intent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velero_backup: Option<VeleroBackupRef>,

    /// Last time the operator wrote this status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

/// Reference to a Velero backup plus its last observed phase
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VeleroBackupRef {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl VeleroBackupRef {
    /// Snapshot of a Velero backup's identity and phase
    pub fn from_velero_backup(velero_backup: &VeleroBackup) -> Self {
        Self {
            name: velero_backup.name_any(),
            namespace: velero_backup.namespace().unwrap_or_default(),
            phase: velero_backup.phase().map(str::to_string),
        }
    }
}

/// Lifecycle of a Backup, derived only from its current snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackupState {
    /// No Velero backup recorded yet
    NotStarted,
    /// Velero backup recorded, phase not terminal
    InProgress,
    /// Velero backup reached Completed, Failed or PartiallyFailed
    Finished,
}

impl Backup {
    /// The recorded Velero backup, if any
    pub fn velero_backup_ref(&self) -> Option<&VeleroBackupRef> {
        self.status.as_ref().and_then(|s| s.velero_backup.as_ref())
    }

    pub fn state(&self) -> BackupState {
        match self.velero_backup_ref() {
            None => BackupState::NotStarted,
            Some(r) if r.phase.as_deref().is_some_and(is_terminal_phase) => {
                BackupState::Finished
            }
            Some(_) => BackupState::InProgress,
        }
    }
}
