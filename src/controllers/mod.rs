//! Kubernetes controllers for the OCM Backup Operator
//!
//! Two independent watch loops: one over Backup intents, one over labelled
//! Velero backups. They share nothing but the API server and the derived
//! owner index.

mod backup_controller;
mod velero_backup_controller;

pub use backup_controller::run as run_backup_controller;
pub use velero_backup_controller::run as run_velero_backup_controller;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::OperatorConfig;
use crate::index::OwnerIndex;
use crate::predicate::EventFilter;
use crate::repository::ObjectRepository;

/// Shared context for all controllers
pub struct Context {
    /// Object store access (trait object for testability)
    pub repository: Arc<dyn ObjectRepository>,
    /// Velero backups by owning Backup
    pub index: OwnerIndex,
    /// Operator configuration
    pub config: OperatorConfig,
    /// Admits only tracked Velero backups
    pub filter: EventFilter,
    /// Cancelled on shutdown; in-flight API calls are abandoned
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a new context
    pub fn new(repository: Arc<dyn ObjectRepository>, config: OperatorConfig) -> Self {
        Self {
            repository,
            index: OwnerIndex::default(),
            config,
            filter: EventFilter::tracked_velero_backups(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Use `shutdown` as the cancellation signal
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Replace the Velero backup event filter
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }
}
