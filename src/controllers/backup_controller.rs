//! Backup controller
//!
//! Watches Backup intents and triggers reconciliation.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::{Action, Controller},
        watcher::Config as WatcherConfig,
    },
    Api, Client, ResourceExt,
};
use tracing::{error, info, instrument, warn};

use crate::controllers::Context;
use crate::crd::Backup;
use crate::error::{Error, Result};
use crate::metrics;
use crate::reconcilers::backup as backup_reconciler;

/// Run the Backup controller
pub async fn run(client: Client, context: Arc<Context>) {
    let api: Api<Backup> = Api::all(client);

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("Backup CRD not installed: {}", e);
        return;
    }

    info!("Starting Backup controller");

    Controller::new(api, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, context)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        name = %obj.name,
                        namespace = obj.namespace.as_deref().unwrap_or("default"),
                        "Reconciled Backup"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation error");
                    metrics::RECONCILIATION_ERRORS
                        .with_label_values(&["Backup"])
                        .inc();
                }
            }
        })
        .await;
}

/// Main reconciliation function
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<Backup>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&["Backup"])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&["Backup"]).inc();

    info!(state = ?obj.state(), "Reconciling Backup");

    backup_reconciler::reconcile(&obj, &ctx).await
}

/// Error policy for the controller
fn error_policy(obj: Arc<Backup>, error: &Error, _ctx: Arc<Context>) -> Action {
    let name = obj.name_any();

    let requeue_duration = match error {
        Error::Cancelled => return Action::await_change(),
        Error::NoTargets => {
            warn!(name = %name, "No managed clusters to back up yet, scheduling retry");
            Duration::from_secs(120)
        }
        Error::InvalidObject(_) | Error::Config(_) => Duration::from_secs(300),
        e if e.is_conflict() => Duration::from_secs(5),
        _ => Duration::from_secs(30),
    };

    error!(
        name = %name,
        error = %error,
        retry_secs = requeue_duration.as_secs(),
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(requeue_duration)
}
