//! Velero backup controller
//!
//! Watches Velero backups carrying the tracking label and mirrors them onto
//! Backup intents. The label selector is applied server-side on the watch
//! and again on every event.
//!
//! The runtime `Controller` never reconciles deleted objects, so a second
//! watch over the same selector feeds every event, deletes included, into
//! the owner index.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::{self, Config as WatcherConfig},
        WatchStreamExt,
    },
    Api, Client, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::controllers::Context;
use crate::crd::VeleroBackup;
use crate::error::{Error, Result};
use crate::metrics;
use crate::predicate::JobEvent;
use crate::reconcilers::velero_backup as velero_backup_reconciler;
use crate::repository::ObjectKey;

/// Run the Velero backup controller
pub async fn run(client: Client, context: Arc<Context>) {
    let Some(selector) = context.filter.selector_string() else {
        error!("Velero backup label selector does not compile, not watching Velero backups");
        return;
    };

    let api: Api<VeleroBackup> = Api::all(client);

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("Velero Backup CRD not installed: {}", e);
        return;
    }

    match context.repository.list_velero_backups().await {
        Ok(velero_backups) => {
            context.index.rebuild(&velero_backups).await;
            let tracked = context.index.len().await;
            metrics::TRACKED_VELERO_BACKUPS.set(tracked as f64);
            info!(tracked, "Rebuilt Velero backup owner index");
        }
        Err(e) => {
            warn!(error = %e, "Unable to list Velero backups, owner index starts empty");
        }
    }

    info!(selector = %selector, "Starting Velero backup controller");

    let watcher_config = WatcherConfig::default().labels(&selector);
    let index_watch = track_index(api.clone(), watcher_config.clone(), context.clone());
    let controller = Controller::new(api, watcher_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    debug!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled Velero backup"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS
                        .with_label_values(&["VeleroBackup"])
                        .inc();
                }
            }
        });

    tokio::select! {
        _ = controller => {}
        _ = index_watch => {
            warn!("Velero backup index watch ended");
        }
    }
}

/// Feed every watch event on tracked Velero backups into the owner index
async fn track_index(api: Api<VeleroBackup>, config: WatcherConfig, ctx: Arc<Context>) {
    let mut tracker = WatchTracker::default();
    let mut events = watcher::watcher(api, config).default_backoff().boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => tracker.apply(event, &ctx).await,
            Err(e) => warn!(error = %e, "Velero backup watch failed, retrying"),
        }
    }
}

/// Turns raw watch events into [`JobEvent`]s.
///
/// Remembers the last version of each Velero backup to tell creations from
/// updates, and after a relist reports anything that did not come back as
/// deleted.
#[derive(Default)]
pub(crate) struct WatchTracker {
    seen: HashMap<ObjectKey, VeleroBackup>,
    relisted: Option<HashSet<ObjectKey>>,
}

impl WatchTracker {
    pub(crate) async fn apply(&mut self, event: watcher::Event<VeleroBackup>, ctx: &Context) {
        match event {
            watcher::Event::Init => self.relisted = Some(HashSet::new()),
            watcher::Event::InitApply(obj) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(ObjectKey::of(&obj));
                }
                self.upsert(obj, ctx).await;
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return;
                };
                let vanished: Vec<ObjectKey> = self
                    .seen
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();
                for key in vanished {
                    if let Some(obj) = self.seen.remove(&key) {
                        velero_backup_reconciler::observe_event(&JobEvent::Deleted(&obj), ctx)
                            .await;
                    }
                }
            }
            watcher::Event::Apply(obj) => self.upsert(obj, ctx).await,
            watcher::Event::Delete(obj) => {
                self.seen.remove(&ObjectKey::of(&obj));
                velero_backup_reconciler::observe_event(&JobEvent::Deleted(&obj), ctx).await;
            }
        }

        metrics::TRACKED_VELERO_BACKUPS.set(ctx.index.len().await as f64);
    }

    async fn upsert(&mut self, obj: VeleroBackup, ctx: &Context) {
        let key = ObjectKey::of(&obj);
        let event = match self.seen.get(&key) {
            Some(old) => JobEvent::Updated { old, new: &obj },
            None => JobEvent::Created(&obj),
        };
        velero_backup_reconciler::observe_event(&event, ctx).await;
        self.seen.insert(key, obj);
    }
}

/// Main reconciliation function
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<VeleroBackup>, ctx: Arc<Context>) -> Result<Action> {
    if !ctx.filter.admits(&JobEvent::Generic(&obj)) {
        return Ok(Action::await_change());
    }

    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["VeleroBackup"])
        .start_timer();
    metrics::RECONCILIATIONS
        .with_label_values(&["VeleroBackup"])
        .inc();

    let key = ObjectKey::of(obj.as_ref());
    let outcome = velero_backup_reconciler::reconcile(&key, &ctx).await?;
    debug!(outcome = ?outcome, "Velero backup reconciled");

    metrics::TRACKED_VELERO_BACKUPS.set(ctx.index.len().await as f64);
    Ok(Action::await_change())
}

/// Error policy for the controller
fn error_policy(obj: Arc<VeleroBackup>, error: &Error, _ctx: Arc<Context>) -> Action {
    if matches!(error, Error::Cancelled) {
        return Action::await_change();
    }

    let requeue_duration = if error.is_conflict() {
        Duration::from_secs(5)
    } else {
        Duration::from_secs(30)
    };

    error!(
        name = %obj.name_any(),
        error = %error,
        retry_secs = requeue_duration.as_secs(),
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use kube::Resource;

    use crate::config::OperatorConfig;
    use crate::crd::{Backup, BackupSpec, VeleroBackupSpec, OWNER_NAMESPACE_ANNOTATION};
    use crate::repository::MockObjectRepository;

    fn context() -> Context {
        Context::new(
            Arc::new(MockObjectRepository::new()),
            OperatorConfig::default(),
        )
    }

    fn owned_velero_backup(name: &str, labelled: bool) -> VeleroBackup {
        let mut owner = Backup::new("nightly", BackupSpec::default());
        owner.metadata.namespace = Some("ops".to_string());
        owner.metadata.uid = Some("uid-1".to_string());

        let mut vb = VeleroBackup::new(name, VeleroBackupSpec::default());
        vb.metadata.namespace = Some("velero".to_string());
        vb.metadata.owner_references = owner.controller_owner_ref(&()).map(|o| vec![o]);
        vb.metadata.annotations = Some(BTreeMap::from([(
            OWNER_NAMESPACE_ANNOTATION.to_string(),
            "ops".to_string(),
        )]));
        if labelled {
            vb.metadata.labels = Some(VeleroBackup::tracking_labels());
        }
        vb
    }

    fn owner_key() -> ObjectKey {
        ObjectKey::new("ops", "nightly")
    }

    #[tokio::test]
    async fn test_delete_event_drops_index_entry() {
        let ctx = context();
        let mut tracker = WatchTracker::default();

        tracker
            .apply(watcher::Event::Apply(owned_velero_backup("a", true)), &ctx)
            .await;
        assert_eq!(
            ctx.index.dependents_of(&owner_key()).await,
            vec![ObjectKey::new("velero", "a")]
        );

        tracker
            .apply(watcher::Event::Delete(owned_velero_backup("a", true)), &ctx)
            .await;
        assert!(ctx.index.is_empty().await);
        assert!(tracker.seen.is_empty());
    }

    #[tokio::test]
    async fn test_label_removal_drops_index_entry() {
        let ctx = context();
        let mut tracker = WatchTracker::default();

        tracker
            .apply(watcher::Event::Apply(owned_velero_backup("a", true)), &ctx)
            .await;
        tracker
            .apply(watcher::Event::Apply(owned_velero_backup("a", false)), &ctx)
            .await;
        assert!(ctx.index.is_empty().await);

        tracker
            .apply(watcher::Event::Apply(owned_velero_backup("b", true)), &ctx)
            .await;
        tracker
            .apply(watcher::Event::Delete(owned_velero_backup("b", false)), &ctx)
            .await;
        assert!(ctx.index.is_empty().await);
    }

    #[tokio::test]
    async fn test_unlabelled_velero_backup_is_not_indexed() {
        let ctx = context();
        let mut tracker = WatchTracker::default();

        tracker
            .apply(watcher::Event::Apply(owned_velero_backup("a", false)), &ctx)
            .await;
        assert!(ctx.index.is_empty().await);
    }

    #[tokio::test]
    async fn test_relist_forgets_velero_backups_deleted_while_disconnected() {
        let ctx = context();
        let mut tracker = WatchTracker::default();

        tracker.apply(watcher::Event::Init, &ctx).await;
        for name in ["a", "b"] {
            tracker
                .apply(watcher::Event::InitApply(owned_velero_backup(name, true)), &ctx)
                .await;
        }
        tracker.apply(watcher::Event::InitDone, &ctx).await;
        assert_eq!(ctx.index.len().await, 2);

        // Reconnect: only `b` is still there
        tracker.apply(watcher::Event::Init, &ctx).await;
        tracker
            .apply(watcher::Event::InitApply(owned_velero_backup("b", true)), &ctx)
            .await;
        tracker.apply(watcher::Event::InitDone, &ctx).await;

        assert_eq!(
            ctx.index.dependents_of(&owner_key()).await,
            vec![ObjectKey::new("velero", "b")]
        );
        assert_eq!(tracker.seen.len(), 1);
    }
}
