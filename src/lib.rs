//! OCM Backup Kubernetes Operator
//!
//! Translates `Backup` intents into Velero backups of the hub and mirrors
//! the Velero backup phase back onto the intent.

pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod index;
pub mod metrics;
pub mod predicate;
pub mod reconcilers;
pub mod repository;
pub mod selection;

pub use error::{Error, Result};
