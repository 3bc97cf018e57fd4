//! Owner index over Velero backups
//!
//! Maps each Backup intent to the Velero backups it owns, so "which Velero
//! backups does this Backup own" is answered without listing. The index is
//! derived entirely from owner metadata: it is rebuilt from a full list at
//! startup and kept current as Velero backups are observed or created.

use std::collections::{BTreeSet, HashMap};

use kube::{Resource, ResourceExt};
use tokio::sync::RwLock;

use crate::crd::{Backup, VeleroBackup, OWNER_NAMESPACE_ANNOTATION};
use crate::repository::ObjectKey;

/// Derives the owner of a Velero backup from its metadata
pub type OwnerExtractor = fn(&VeleroBackup) -> Option<ObjectKey>;

/// The Backup intent controlling a Velero backup, if any.
///
/// Only a controller owner reference of kind `Backup` in the
/// `cluster.open-cluster-management.io` API group counts. The owner's
/// namespace is read from the owner-namespace annotation and defaults to
/// the Velero backup's own namespace.
pub fn backup_owner(velero_backup: &VeleroBackup) -> Option<ObjectKey> {
    let api_version = Backup::api_version(&());
    let kind = Backup::kind(&());

    let owner = velero_backup
        .owner_references()
        .iter()
        .find(|o| o.controller == Some(true))?;
    if owner.api_version != api_version || owner.kind != kind {
        return None;
    }

    let namespace = velero_backup
        .annotations()
        .get(OWNER_NAMESPACE_ANNOTATION)
        .cloned()
        .or_else(|| velero_backup.namespace())
        .unwrap_or_default();
    Some(ObjectKey::new(namespace, owner.name.clone()))
}

#[derive(Default)]
struct Entries {
    by_owner: HashMap<ObjectKey, BTreeSet<ObjectKey>>,
    owner_of: HashMap<ObjectKey, ObjectKey>,
}

impl Entries {
    fn remove(&mut self, dependent: &ObjectKey) {
        if let Some(owner) = self.owner_of.remove(dependent) {
            if let Some(set) = self.by_owner.get_mut(&owner) {
                set.remove(dependent);
                if set.is_empty() {
                    self.by_owner.remove(&owner);
                }
            }
        }
    }

    fn upsert(&mut self, dependent: ObjectKey, owner: Option<ObjectKey>) {
        self.remove(&dependent);
        if let Some(owner) = owner {
            self.by_owner
                .entry(owner.clone())
                .or_default()
                .insert(dependent.clone());
            self.owner_of.insert(dependent, owner);
        }
    }
}

/// Index from owner identity to owned Velero backups
pub struct OwnerIndex {
    extractor: OwnerExtractor,
    entries: RwLock<Entries>,
}

impl Default for OwnerIndex {
    fn default() -> Self {
        Self::new(backup_owner)
    }
}

impl OwnerIndex {
    /// Register an index keyed by `extractor`
    pub fn new(extractor: OwnerExtractor) -> Self {
        Self {
            extractor,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Replace the index contents with a full list
    pub async fn rebuild(&self, velero_backups: &[VeleroBackup]) {
        let mut fresh = Entries::default();
        for vb in velero_backups {
            fresh.upsert(ObjectKey::of(vb), (self.extractor)(vb));
        }
        *self.entries.write().await = fresh;
    }

    /// Record the current owner of a Velero backup
    pub async fn observe(&self, velero_backup: &VeleroBackup) {
        let owner = (self.extractor)(velero_backup);
        self.entries
            .write()
            .await
            .upsert(ObjectKey::of(velero_backup), owner);
    }

    /// Drop a Velero backup that no longer exists
    pub async fn forget(&self, key: &ObjectKey) {
        self.entries.write().await.remove(key);
    }

    /// Velero backups owned by `owner`, in key order
    pub async fn dependents_of(&self, owner: &ObjectKey) -> Vec<ObjectKey> {
        self.entries
            .read()
            .await
            .by_owner
            .get(owner)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of indexed Velero backups that have an owner
    pub async fn len(&self) -> usize {
        self.entries.read().await.owner_of.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BackupSpec, VeleroBackupSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use std::collections::BTreeMap;

    fn owned_velero_backup(name: &str, owner: Option<(&str, &str)>) -> VeleroBackup {
        let mut vb = VeleroBackup::new(name, VeleroBackupSpec::default());
        vb.metadata.namespace = Some("velero".to_string());
        if let Some((owner_ns, owner_name)) = owner {
            let mut intent = Backup::new(owner_name, BackupSpec::default());
            intent.metadata.namespace = Some(owner_ns.to_string());
            intent.metadata.uid = Some(format!("uid-{}", owner_name));
            vb.metadata.owner_references = intent.controller_owner_ref(&()).map(|o| vec![o]);
            vb.metadata.annotations = Some(BTreeMap::from([(
                OWNER_NAMESPACE_ANNOTATION.to_string(),
                owner_ns.to_string(),
            )]));
        }
        vb
    }

    #[test]
    fn test_backup_owner_reads_controller_reference() {
        let vb = owned_velero_backup("job", Some(("ops", "nightly")));
        assert_eq!(backup_owner(&vb), Some(ObjectKey::new("ops", "nightly")));
    }

    #[test]
    fn test_backup_owner_ignores_foreign_owners() {
        let mut vb = owned_velero_backup("job", None);
        vb.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            name: "velero".to_string(),
            uid: "u".to_string(),
            controller: Some(true),
            block_owner_deletion: None,
        }]);
        assert_eq!(backup_owner(&vb), None);
        assert_eq!(backup_owner(&owned_velero_backup("job", None)), None);
    }

    #[test]
    fn test_backup_owner_namespace_defaults_to_own_namespace() {
        let mut vb = owned_velero_backup("job", Some(("ops", "nightly")));
        vb.metadata.annotations = None;
        assert_eq!(backup_owner(&vb), Some(ObjectKey::new("velero", "nightly")));
    }

    #[tokio::test]
    async fn test_rebuild_and_lookup() {
        let index = OwnerIndex::default();
        index
            .rebuild(&[
                owned_velero_backup("a", Some(("ops", "nightly"))),
                owned_velero_backup("b", Some(("ops", "nightly"))),
                owned_velero_backup("c", Some(("ops", "weekly"))),
                owned_velero_backup("d", None),
            ])
            .await;

        assert_eq!(
            index.dependents_of(&ObjectKey::new("ops", "nightly")).await,
            vec![ObjectKey::new("velero", "a"), ObjectKey::new("velero", "b")]
        );
        assert_eq!(index.len().await, 3);
        assert!(index
            .dependents_of(&ObjectKey::new("ops", "missing"))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_observe_moves_and_forget_removes() {
        let index = OwnerIndex::default();
        index
            .observe(&owned_velero_backup("a", Some(("ops", "nightly"))))
            .await;
        index
            .observe(&owned_velero_backup("a", Some(("ops", "weekly"))))
            .await;

        assert!(index
            .dependents_of(&ObjectKey::new("ops", "nightly"))
            .await
            .is_empty());
        assert_eq!(
            index.dependents_of(&ObjectKey::new("ops", "weekly")).await,
            vec![ObjectKey::new("velero", "a")]
        );

        index.forget(&ObjectKey::new("velero", "a")).await;
        assert!(index.is_empty().await);
    }
}
