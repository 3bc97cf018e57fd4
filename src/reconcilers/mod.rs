//! Reconcilers for the OCM Backup Operator
//!
//! This module contains the business logic behind each controller:
//! - `backup`: turns a Backup intent into a Velero backup
//! - `velero_backup`: mirrors a Velero backup's phase onto its Backup
//!
//! Neither performs retries. Errors go back to the controller, whose error
//! policy requeues the object.

pub mod backup;
pub mod velero_backup;

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Run a repository call unless the pass is cancelled first
pub(crate) async fn cancellable<T, F>(token: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        result = call => result,
    }
}
