//! Operator configuration
//!
//! Read once at startup from environment variables. Lookups go through a
//! closure so tests never touch the process environment.

use crate::error::{Error, Result};
use crate::selection::{Edition, PlatformNamespaces};

/// Environment variable selecting the product edition
pub const EDITION_ENV: &str = "OCM_BACKUP_EDITION";
/// Environment variable overriding the metrics port
pub const METRICS_PORT_ENV: &str = "METRICS_PORT";

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Runtime configuration for the operator
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Product edition, selects the platform namespaces
    pub edition: Edition,
    /// Namespaces appended to every Velero backup
    pub platform_namespaces: PlatformNamespaces,
    /// Port for the metrics/health server
    pub metrics_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self::for_edition(Edition::default())
    }
}

impl OperatorConfig {
    /// Configuration with the edition's platform namespaces
    pub fn for_edition(edition: Edition) -> Self {
        Self {
            edition,
            platform_namespaces: edition.platform_namespaces(),
            metrics_port: DEFAULT_METRICS_PORT,
        }
    }

    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let edition = match lookup(EDITION_ENV) {
            Some(value) => value.parse()?,
            None => Edition::default(),
        };

        let metrics_port = match lookup(METRICS_PORT_ENV) {
            Some(value) => value.parse().map_err(|e| {
                Error::config(format!("Invalid {} '{}': {}", METRICS_PORT_ENV, value, e))
            })?,
            None => DEFAULT_METRICS_PORT,
        };

        Ok(Self {
            metrics_port,
            ..Self::for_edition(edition)
        })
    }
}
