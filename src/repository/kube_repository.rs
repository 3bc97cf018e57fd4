//! [`ObjectRepository`] backed by the Kubernetes API server

use async_trait::async_trait;
use kube::{
    api::{ListParams, PostParams},
    Api, Client, ResourceExt,
};

use super::{ObjectKey, ObjectRepository};
use crate::crd::{Backup, ManagedCluster, VeleroBackup};
use crate::error::{Error, Result};

/// Field manager recorded on every write
const FIELD_MANAGER: &str = "ocm-backup-operator";

/// Repository using a live `kube::Client`
#[derive(Clone)]
pub struct KubeRepository {
    client: Client,
}

impl KubeRepository {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        }
    }

    fn namespace_of<K: kube::Resource>(kind: &'static str, obj: &K) -> Result<String> {
        obj.namespace().ok_or_else(|| {
            Error::invalid_object(format!("{} {} has no namespace", kind, obj.name_any()))
        })
    }
}

#[async_trait]
impl ObjectRepository for KubeRepository {
    async fn get_backup(&self, key: &ObjectKey) -> Result<Backup> {
        let api: Api<Backup> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get(&key.name)
            .await
            .map_err(|e| Error::from_kube("Backup", key.to_string(), e))
    }

    async fn create_backup(&self, backup: &Backup) -> Result<Backup> {
        let namespace = Self::namespace_of("Backup", backup)?;
        let api: Api<Backup> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&Self::post_params(), backup)
            .await
            .map_err(|e| Error::from_kube("Backup", ObjectKey::of(backup).to_string(), e))
    }

    async fn update_backup_status(&self, backup: &Backup) -> Result<Backup> {
        let namespace = Self::namespace_of("Backup", backup)?;
        let api: Api<Backup> = Api::namespaced(self.client.clone(), &namespace);
        let data = serde_json::to_vec(backup)?;
        api.replace_status(&backup.name_any(), &Self::post_params(), data)
            .await
            .map_err(|e| Error::from_kube("Backup", ObjectKey::of(backup).to_string(), e))
    }

    async fn get_velero_backup(&self, key: &ObjectKey) -> Result<VeleroBackup> {
        let api: Api<VeleroBackup> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get(&key.name)
            .await
            .map_err(|e| Error::from_kube("velero.io/Backup", key.to_string(), e))
    }

    async fn list_velero_backups(&self) -> Result<Vec<VeleroBackup>> {
        let api: Api<VeleroBackup> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from_kube("velero.io/Backup", "*", e))?;
        Ok(list.items)
    }

    async fn create_velero_backup(&self, velero_backup: &VeleroBackup) -> Result<VeleroBackup> {
        let namespace = Self::namespace_of("velero.io/Backup", velero_backup)?;
        let api: Api<VeleroBackup> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&Self::post_params(), velero_backup)
            .await
            .map_err(|e| Error::from_kube("velero.io/Backup", velero_backup.key(), e))
    }

    async fn list_managed_clusters(&self) -> Result<Vec<ManagedCluster>> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from_kube("ManagedCluster", "*", e))?;
        Ok(list.items)
    }
}
