//! Velero backup reconciler
//!
//! Propagates a tracked Velero backup onto the Backup that represents it.
//! Velero backups created by the operator point at their Backup through a
//! controller owner reference. Velero backups created by anyone else get a
//! Backup of the same namespace and name, created on first sight, so every
//! tracked Velero backup ends up with exactly one Backup mirroring its phase.

use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use crate::controllers::Context;
use crate::crd::{
    Backup, BackupSpec, BackupStatus, VeleroBackup, VeleroBackupRef, TRACKING_LABEL_KEY,
    TRACKING_LABEL_VALUE,
};
use crate::error::{Error, Result};
use crate::index::backup_owner;
use crate::metrics;
use crate::predicate::JobEvent;
use crate::reconcilers::cancellable;
use crate::repository::ObjectKey;

/// What a pass did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The Velero backup no longer exists
    Gone,
    /// The Velero backup is not tracked
    Ignored,
    /// The Backup already mirrored the Velero backup
    Unchanged,
    /// The Backup status was updated
    Updated,
    /// A Backup was created for the Velero backup and its status written
    Created,
    /// The Backup at the resolved identity tracks something else
    Foreign,
}

/// Reconcile the Velero backup identified by `key`
pub async fn reconcile(key: &ObjectKey, ctx: &Context) -> Result<SyncOutcome> {
    let velero_backup =
        match cancellable(&ctx.shutdown, ctx.repository.get_velero_backup(key)).await {
            Ok(vb) => vb,
            Err(e) if e.is_not_found() => {
                debug!(velero_backup = %key, "Velero backup is gone");
                ctx.index.forget(key).await;
                return Ok(SyncOutcome::Gone);
            }
            Err(e) => return Err(e),
        };

    // Labels may have changed since the event was queued
    if !ctx.filter.admits(&JobEvent::Generic(&velero_backup)) {
        debug!(velero_backup = %key, "Velero backup is not tracked");
        ctx.index.forget(key).await;
        return Ok(SyncOutcome::Ignored);
    }
    ctx.index.observe(&velero_backup).await;

    let owned = backup_owner(&velero_backup).is_some();
    let backup_key = backup_key_for(&velero_backup);
    let (backup, created) =
        match cancellable(&ctx.shutdown, ctx.repository.get_backup(&backup_key)).await {
            Ok(backup) => (backup, false),
            Err(e) if e.is_not_found() => (
                create_backup_from_velero_backup(&velero_backup, &backup_key, ctx).await?,
                true,
            ),
            Err(e) => return Err(e),
        };

    if !may_mirror(&backup, &velero_backup, owned) {
        warn!(
            backup = %backup_key,
            velero_backup = %key,
            recorded = ?backup.velero_backup_ref().map(|r| &r.name),
            "Backup does not track this Velero backup, leaving it alone"
        );
        return Ok(SyncOutcome::Foreign);
    }

    let outcome = sync_backup_from_velero_backup(backup, &velero_backup, ctx).await?;
    Ok(if created { SyncOutcome::Created } else { outcome })
}

/// Keep the owner index in step with a watch event.
///
/// Deletes always drop the entry. Removing the tracking label shows up on a
/// label-selected watch as a delete carrying the unlabelled object.
pub async fn observe_event(event: &JobEvent<'_>, ctx: &Context) {
    let velero_backup = event.object();
    match event {
        JobEvent::Deleted(_) => ctx.index.forget(&ObjectKey::of(velero_backup)).await,
        _ if ctx.filter.admits(event) => ctx.index.observe(velero_backup).await,
        _ => ctx.index.forget(&ObjectKey::of(velero_backup)).await,
    }
}

/// Whether `backup` may mirror `velero_backup`.
///
/// A Backup that already records a Velero backup only mirrors that one.
/// Otherwise the controller owner may, and so may a Backup derived from a
/// Velero backup. A user's Backup that merely shares the name never does.
fn may_mirror(backup: &Backup, velero_backup: &VeleroBackup, owned: bool) -> bool {
    match backup.velero_backup_ref() {
        Some(recorded) => {
            recorded.name == velero_backup.name_any()
                && recorded.namespace == velero_backup.namespace().unwrap_or_default()
        }
        None => owned || is_derived(backup),
    }
}

/// Created by this reconciler: no `veleroConfig`, tracking label set
fn is_derived(backup: &Backup) -> bool {
    backup.spec.velero_config.is_none()
        && backup
            .labels()
            .get(TRACKING_LABEL_KEY)
            .is_some_and(|v| v == TRACKING_LABEL_VALUE)
}

/// Identity of the Backup that represents a Velero backup.
///
/// The controller owner when there is one, otherwise a Backup with the
/// Velero backup's own namespace and name.
pub fn backup_key_for(velero_backup: &VeleroBackup) -> ObjectKey {
    backup_owner(velero_backup).unwrap_or_else(|| ObjectKey::of(velero_backup))
}

/// Create the Backup for a Velero backup the operator did not start.
///
/// The Backup carries no `veleroConfig`, so the Backup reconciler never
/// starts a second Velero backup for it. A Backup created concurrently is
/// fetched and used instead.
async fn create_backup_from_velero_backup(
    velero_backup: &VeleroBackup,
    key: &ObjectKey,
    ctx: &Context,
) -> Result<Backup> {
    let mut backup = Backup::new(&key.name, BackupSpec::default());
    backup.metadata.namespace = Some(key.namespace.clone());
    backup.metadata.labels = Some(VeleroBackup::tracking_labels());

    let wrap = |e: Error| {
        e.wrap(|source| Error::IntentSync {
            key: key.to_string(),
            source,
        })
    };

    match cancellable(&ctx.shutdown, ctx.repository.create_backup(&backup)).await {
        Ok(created) => {
            info!(
                backup = %key,
                velero_backup = %velero_backup.key(),
                "Created Backup for untracked Velero backup"
            );
            metrics::BACKUPS_CREATED_FROM_VELERO
                .with_label_values(&[&key.namespace])
                .inc();
            Ok(created)
        }
        Err(e) if e.is_conflict() => cancellable(&ctx.shutdown, ctx.repository.get_backup(key))
            .await
            .map_err(wrap),
        Err(e) => Err(wrap(e)),
    }
}

/// Write a Velero backup's identity and phase onto its Backup.
///
/// Skips the write when the status already mirrors the Velero backup, so
/// each observed phase produces one status update.
pub async fn sync_backup_from_velero_backup(
    backup: Backup,
    velero_backup: &VeleroBackup,
    ctx: &Context,
) -> Result<SyncOutcome> {
    let desired = VeleroBackupRef::from_velero_backup(velero_backup);
    if backup.velero_backup_ref() == Some(&desired) {
        return Ok(SyncOutcome::Unchanged);
    }

    let key = ObjectKey::of(&backup);
    let phase = desired.phase.clone().unwrap_or_default();
    let mut updated = backup;
    updated.status = Some(BackupStatus {
        velero_backup: Some(desired),
        last_update_time: Some(Utc::now()),
    });

    cancellable(&ctx.shutdown, ctx.repository.update_backup_status(&updated))
        .await
        .map_err(|e| {
            e.wrap(|source| Error::IntentSync {
                key: key.to_string(),
                source,
            })
        })?;

    info!(backup = %key, velero_backup = %velero_backup.name_any(), phase = %phase, "Synced Backup from Velero backup");
    metrics::BACKUP_SYNCS.with_label_values(&[&phase]).inc();
    Ok(SyncOutcome::Updated)
}
