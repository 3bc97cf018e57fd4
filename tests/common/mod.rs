//! In-memory object repository for integration tests
//!
//! Mimics the API server semantics the reconcilers rely on: NotFound on
//! missing objects, Conflict on duplicate creates and stale
//! resourceVersions, and a status subresource that only touches `status`.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ocm_backup_operator::crd::{
    Backup, ManagedCluster, ManagedClusterSpec, VeleroBackup, VeleroBackupStatus,
};
use ocm_backup_operator::repository::{ObjectKey, ObjectRepository};
use ocm_backup_operator::{Error, Result};

/// Counters of mutating calls
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Calls {
    pub velero_backup_creates: usize,
    pub backup_creates: usize,
    pub status_updates: usize,
}

impl Calls {
    pub fn mutations(&self) -> usize {
        self.velero_backup_creates + self.backup_creates + self.status_updates
    }
}

#[derive(Default)]
struct State {
    backups: BTreeMap<ObjectKey, Backup>,
    velero_backups: BTreeMap<ObjectKey, VeleroBackup>,
    managed_clusters: Vec<ManagedCluster>,
    next_version: u64,
    calls: Calls,
    fail_managed_cluster_list: bool,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn with_managed_clusters(names: &[&str]) -> Self {
        let repo = Self::default();
        for name in names {
            repo.add_managed_cluster(name);
        }
        repo
    }

    pub fn add_managed_cluster(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .managed_clusters
            .push(ManagedCluster::new(name, ManagedClusterSpec::default()));
    }

    pub fn fail_managed_cluster_list(&self) {
        self.state.lock().unwrap().fail_managed_cluster_list = true;
    }

    /// Store a Backup as a user would create it
    pub fn seed_backup(&self, mut backup: Backup) -> Backup {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        backup.metadata.resource_version = Some(version.clone());
        backup.metadata.uid = Some(format!("uid-{}", version));
        state.backups.insert(ObjectKey::of(&backup), backup.clone());
        backup
    }

    /// Store a Velero backup created outside the operator
    pub fn seed_velero_backup(&self, mut velero_backup: VeleroBackup) -> VeleroBackup {
        let mut state = self.state.lock().unwrap();
        velero_backup.metadata.resource_version = Some(state.bump());
        state
            .velero_backups
            .insert(ObjectKey::of(&velero_backup), velero_backup.clone());
        velero_backup
    }

    /// Act as Velero: move a backup to `phase`
    pub fn set_velero_phase(&self, key: &ObjectKey, phase: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let vb = state
            .velero_backups
            .get_mut(key)
            .expect("velero backup exists");
        vb.status = Some(VeleroBackupStatus {
            phase: Some(phase.to_string()),
        });
        vb.metadata.resource_version = Some(version);
    }

    pub fn delete_velero_backup(&self, key: &ObjectKey) {
        self.state.lock().unwrap().velero_backups.remove(key);
    }

    pub fn backup(&self, key: &ObjectKey) -> Option<Backup> {
        self.state.lock().unwrap().backups.get(key).cloned()
    }

    pub fn backups(&self) -> Vec<Backup> {
        self.state.lock().unwrap().backups.values().cloned().collect()
    }

    pub fn velero_backups(&self) -> Vec<VeleroBackup> {
        self.state
            .lock()
            .unwrap()
            .velero_backups
            .values()
            .cloned()
            .collect()
    }

    pub fn calls(&self) -> Calls {
        self.state.lock().unwrap().calls
    }
}

fn not_found(kind: &'static str, key: &ObjectKey) -> Error {
    Error::NotFound {
        kind,
        key: key.to_string(),
    }
}

fn conflict(kind: &'static str, key: &ObjectKey, message: &str) -> Error {
    Error::Conflict {
        kind,
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[async_trait]
impl ObjectRepository for InMemoryRepository {
    async fn get_backup(&self, key: &ObjectKey) -> Result<Backup> {
        self.backup(key).ok_or_else(|| not_found("Backup", key))
    }

    async fn create_backup(&self, backup: &Backup) -> Result<Backup> {
        let mut state = self.state.lock().unwrap();
        state.calls.backup_creates += 1;
        let key = ObjectKey::of(backup);
        if state.backups.contains_key(&key) {
            return Err(conflict("Backup", &key, "already exists"));
        }
        let version = state.bump();
        let mut stored = backup.clone();
        stored.status = None;
        stored.metadata.resource_version = Some(version.clone());
        stored.metadata.uid = Some(format!("uid-{}", version));
        state.backups.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update_backup_status(&self, backup: &Backup) -> Result<Backup> {
        let mut state = self.state.lock().unwrap();
        state.calls.status_updates += 1;
        let key = ObjectKey::of(backup);
        let version = state.bump();
        let stored = state
            .backups
            .get_mut(&key)
            .ok_or_else(|| not_found("Backup", &key))?;
        if stored.metadata.resource_version != backup.metadata.resource_version {
            return Err(conflict("Backup", &key, "the object has been modified"));
        }
        if stored.status != backup.status {
            stored.status = backup.status.clone();
            stored.metadata.resource_version = Some(version);
        }
        Ok(stored.clone())
    }

    async fn get_velero_backup(&self, key: &ObjectKey) -> Result<VeleroBackup> {
        self.state
            .lock()
            .unwrap()
            .velero_backups
            .get(key)
            .cloned()
            .ok_or_else(|| not_found("velero.io/Backup", key))
    }

    async fn list_velero_backups(&self) -> Result<Vec<VeleroBackup>> {
        Ok(self.velero_backups())
    }

    async fn create_velero_backup(&self, velero_backup: &VeleroBackup) -> Result<VeleroBackup> {
        let mut state = self.state.lock().unwrap();
        state.calls.velero_backup_creates += 1;
        let key = ObjectKey::of(velero_backup);
        if state.velero_backups.contains_key(&key) {
            return Err(conflict("velero.io/Backup", &key, "already exists"));
        }
        let mut stored = velero_backup.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.velero_backups.insert(key, stored.clone());
        Ok(stored)
    }

    async fn list_managed_clusters(&self) -> Result<Vec<ManagedCluster>> {
        let state = self.state.lock().unwrap();
        if state.fail_managed_cluster_list {
            return Err(Error::config("managedclusters API unavailable"));
        }
        Ok(state.managed_clusters.clone())
    }
}

