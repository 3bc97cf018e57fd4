//! Prometheus metrics for the OCM Backup Operator
//!
//! Exposes reconcile health and the Velero backup lifecycle as seen by the
//! operator.

mod prometheus;

pub use prometheus::*;
