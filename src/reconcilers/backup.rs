//! Backup reconciler
//!
//! Handles the business logic for Backup intents:
//! - State derivation from the current snapshot
//! - Velero backup construction and creation
//! - Status updates recording the Velero backup

use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{runtime::controller::Action, Resource, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::controllers::Context;
use crate::crd::{
    Backup, BackupState, BackupStatus, VeleroBackup, VeleroBackupRef, VeleroBackupSpec,
    VeleroConfig, CERTIFICATE_SIGNING_REQUESTS, OWNER_NAMESPACE_ANNOTATION,
};
use crate::error::{Error, Result};
use crate::index::backup_owner;
use crate::metrics;
use crate::reconcilers::cancellable;
use crate::repository::ObjectKey;
use crate::selection::select_namespaces;

/// Longest name the API server accepts for a Velero backup
const MAX_NAME_LEN: usize = 253;
/// Hex digits of the identity digest kept in shortened names
const DIGEST_LEN: usize = 10;

/// Reconcile one Backup snapshot
pub async fn reconcile(backup: &Backup, ctx: &Context) -> Result<Action> {
    match backup.state() {
        BackupState::NotStarted => {
            start_backup(backup, ctx).await?;
        }
        BackupState::Finished => {
            info!(
                phase = backup
                    .velero_backup_ref()
                    .and_then(|r| r.phase.as_deref())
                    .unwrap_or_default(),
                "Backup terminated"
            );
        }
        BackupState::InProgress => {
            debug!("Backup started and not finished");
        }
    }
    Ok(Action::await_change())
}

/// Start a Backup: create its Velero backup and record it on the status.
///
/// Without a `veleroConfig` nothing is created, but the status is still
/// written back unchanged.
pub async fn start_backup(backup: &Backup, ctx: &Context) -> Result<Backup> {
    let mut updated = backup.clone();

    if let Some(velero_config) = &backup.spec.velero_config {
        let velero_backup = ensure_velero_backup(backup, velero_config, ctx).await?;
        updated.status = Some(BackupStatus {
            velero_backup: Some(VeleroBackupRef::from_velero_backup(&velero_backup)),
            last_update_time: Some(Utc::now()),
        });
    }

    update_status(&updated, ctx).await
}

/// Find the Velero backup this Backup already owns, or create it
async fn ensure_velero_backup(
    backup: &Backup,
    velero_config: &VeleroConfig,
    ctx: &Context,
) -> Result<VeleroBackup> {
    let owner = ObjectKey::of(backup);

    if let Some(existing) = ctx.index.dependents_of(&owner).await.into_iter().next() {
        match cancellable(&ctx.shutdown, ctx.repository.get_velero_backup(&existing)).await {
            Ok(velero_backup) => {
                info!(velero_backup = %existing, "Adopting Velero backup already owned by Backup");
                return Ok(velero_backup);
            }
            Err(e) if e.is_not_found() => ctx.index.forget(&existing).await,
            Err(e) => {
                return Err(e.wrap(|source| Error::JobCreate {
                    key: existing.to_string(),
                    source,
                }))
            }
        }
    }

    let managed_clusters = cancellable(&ctx.shutdown, ctx.repository.list_managed_clusters())
        .await
        .map_err(|e| {
            e.wrap(|source| Error::DependencyList {
                kind: "managedclusters",
                source,
            })
        })?;

    let included_namespaces =
        select_namespaces(&managed_clusters, &ctx.config.platform_namespaces)?;
    let desired = build_velero_backup(backup, velero_config, included_namespaces)?;
    let key = ObjectKey::of(&desired);

    let velero_backup =
        match cancellable(&ctx.shutdown, ctx.repository.create_velero_backup(&desired)).await {
            Ok(created) => {
                info!(velero_backup = %key, "Created Velero backup");
                metrics::VELERO_BACKUPS_CREATED
                    .with_label_values(&[&key.namespace])
                    .inc();
                created
            }
            Err(e) if e.is_conflict() => adopt_existing(&key, &owner, e, ctx).await?,
            Err(e) => {
                return Err(e.wrap(|source| Error::JobCreate {
                    key: key.to_string(),
                    source,
                }))
            }
        };

    ctx.index.observe(&velero_backup).await;
    Ok(velero_backup)
}

/// Take over a Velero backup that already exists under our derived name,
/// provided this Backup owns it
async fn adopt_existing(
    key: &ObjectKey,
    owner: &ObjectKey,
    conflict: Error,
    ctx: &Context,
) -> Result<VeleroBackup> {
    let existing = cancellable(&ctx.shutdown, ctx.repository.get_velero_backup(key))
        .await
        .map_err(|e| {
            e.wrap(|source| Error::JobCreate {
                key: key.to_string(),
                source,
            })
        })?;

    if backup_owner(&existing).as_ref() != Some(owner) {
        return Err(Error::JobCreate {
            key: key.to_string(),
            source: Box::new(conflict),
        });
    }

    info!(velero_backup = %key, "Velero backup already exists, adopting");
    Ok(existing)
}

/// Persist a Backup's status subresource
async fn update_status(backup: &Backup, ctx: &Context) -> Result<Backup> {
    cancellable(&ctx.shutdown, ctx.repository.update_backup_status(backup))
        .await
        .map_err(|e| {
            e.wrap(|source| Error::StatusUpdate {
                key: ObjectKey::of(backup).to_string(),
                source,
            })
        })
}

/// Name of the Velero backup for a Backup: `<namespace>.<name>`.
///
/// Namespaces never contain `.`, so distinct Backups never map to the same
/// name. Names over the limit are cut short and suffixed with a digest of
/// the full identity.
pub fn velero_backup_name(namespace: &str, name: &str) -> String {
    let full = format!("{}.{}", namespace, name);
    if full.len() <= MAX_NAME_LEN {
        return full;
    }

    let digest = Sha256::digest(format!("{}/{}", namespace, name).as_bytes());
    let suffix = &format!("{:x}", digest)[..DIGEST_LEN];
    let prefix = full[..MAX_NAME_LEN - DIGEST_LEN - 1].trim_end_matches(&['-', '.'][..]);
    format!("{}-{}", prefix, suffix)
}

/// Controller owner reference pointing at `backup`
pub fn owner_reference_for(backup: &Backup) -> Result<OwnerReference> {
    backup.controller_owner_ref(&()).ok_or_else(|| {
        Error::invalid_object(format!(
            "Backup {}/{} has no uid",
            backup.namespace().unwrap_or_default(),
            backup.name_any()
        ))
    })
}

/// Build the Velero backup requested by `backup`
pub fn build_velero_backup(
    backup: &Backup,
    velero_config: &VeleroConfig,
    included_namespaces: Vec<String>,
) -> Result<VeleroBackup> {
    let namespace = backup
        .namespace()
        .ok_or_else(|| Error::invalid_object(format!("Backup {} has no namespace", backup.name_any())))?;
    let owner_reference = owner_reference_for(backup)?;

    let mut velero_backup = VeleroBackup::new(
        &velero_backup_name(&namespace, &backup.name_any()),
        VeleroBackupSpec {
            included_namespaces,
            excluded_resources: vec![CERTIFICATE_SIGNING_REQUESTS.to_string()],
            include_cluster_resources: Some(false),
        },
    );
    velero_backup.metadata.namespace = Some(velero_config.namespace.clone());
    velero_backup.metadata.labels = Some(VeleroBackup::tracking_labels());
    velero_backup.metadata.annotations = Some(BTreeMap::from([(
        OWNER_NAMESPACE_ANNOTATION.to_string(),
        namespace,
    )]));
    velero_backup.metadata.owner_references = Some(vec![owner_reference]);

    Ok(velero_backup)
}
