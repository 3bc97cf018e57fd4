//! Event filtering for watched Velero backups
//!
//! Only Velero backups carrying the tracking label are reconciled. The
//! filter is compiled once; a selector that does not compile yields a
//! closed filter that admits nothing.

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::warn;

use crate::crd::{VeleroBackup, TRACKING_LABEL_KEY, TRACKING_LABEL_VALUE};

/// A watch event on a Velero backup
#[derive(Clone, Copy, Debug)]
pub enum JobEvent<'a> {
    Created(&'a VeleroBackup),
    Updated {
        old: &'a VeleroBackup,
        new: &'a VeleroBackup,
    },
    Deleted(&'a VeleroBackup),
    Generic(&'a VeleroBackup),
}

impl<'a> JobEvent<'a> {
    /// The object the filter is evaluated against
    pub fn object(&self) -> &'a VeleroBackup {
        match *self {
            JobEvent::Created(obj) | JobEvent::Deleted(obj) | JobEvent::Generic(obj) => obj,
            JobEvent::Updated { new, .. } => new,
        }
    }
}

/// Equality-based label selector admitting watch events
#[derive(Clone, Debug)]
pub struct EventFilter {
    selector: Option<BTreeMap<String, String>>,
}

impl EventFilter {
    /// Compile a filter from `matchLabels`; invalid labels close the filter
    pub fn from_match_labels(match_labels: BTreeMap<String, String>) -> Self {
        for (key, value) in &match_labels {
            if let Err(reason) = validate_label(key, value) {
                warn!(key = %key, value = %value, reason, "Label selector does not compile, rejecting all events");
                return Self { selector: None };
            }
        }
        Self {
            selector: Some(match_labels),
        }
    }

    /// Filter for the `ocm-backup: velero` tracking label
    pub fn tracked_velero_backups() -> Self {
        Self::from_match_labels(BTreeMap::from([(
            TRACKING_LABEL_KEY.to_string(),
            TRACKING_LABEL_VALUE.to_string(),
        )]))
    }

    /// Whether the selector failed to compile
    pub fn is_closed(&self) -> bool {
        self.selector.is_none()
    }

    /// Selector string for server-side watch filtering
    pub fn selector_string(&self) -> Option<String> {
        self.selector.as_ref().map(|labels| {
            labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",")
        })
    }

    /// Whether `labels` satisfy the selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match &self.selector {
            None => false,
            Some(required) => required
                .iter()
                .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v)),
        }
    }

    /// Whether an event should reach the reconciler
    pub fn admits(&self, event: &JobEvent<'_>) -> bool {
        self.matches(event.object().labels())
    }
}

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

fn validate_label(key: &str, value: &str) -> std::result::Result<(), &'static str> {
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
                return Err("invalid key prefix length");
            }
            if !prefix.split('.').all(is_dns_label) {
                return Err("key prefix is not a DNS subdomain");
            }
            name
        }
        None => key,
    };
    if name.is_empty() {
        return Err("empty key name");
    }
    if !is_qualified_name(name) {
        return Err("invalid key name");
    }
    if !value.is_empty() && !is_qualified_name(value) {
        return Err("invalid value");
    }
    Ok(())
}

fn is_qualified_name(s: &str) -> bool {
    s.len() <= MAX_NAME_LEN
        && s.starts_with(|c: char| c.is_ascii_alphanumeric())
        && s.ends_with(|c: char| c.is_ascii_alphanumeric())
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn is_dns_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_NAME_LEN
        && s.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && s.ends_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit())
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::VeleroBackupSpec;

    fn velero_backup(labels: &[(&str, &str)]) -> VeleroBackup {
        let mut vb = VeleroBackup::new("b", VeleroBackupSpec::default());
        vb.metadata.namespace = Some("velero".to_string());
        if !labels.is_empty() {
            vb.metadata.labels = Some(
                labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            );
        }
        vb
    }

    fn all_events<'a>(obj: &'a VeleroBackup, old: &'a VeleroBackup) -> [JobEvent<'a>; 4] {
        [
            JobEvent::Created(obj),
            JobEvent::Updated { old, new: obj },
            JobEvent::Deleted(obj),
            JobEvent::Generic(obj),
        ]
    }

    #[test]
    fn test_admits_labelled_backup_for_all_event_kinds() {
        let filter = EventFilter::tracked_velero_backups();
        let obj = velero_backup(&[("ocm-backup", "velero"), ("other", "x")]);
        let old = velero_backup(&[]);
        for event in all_events(&obj, &old) {
            assert!(filter.admits(&event), "{:?} rejected", event);
        }
    }

    #[test]
    fn test_rejects_unlabelled_or_mislabelled_for_all_event_kinds() {
        let filter = EventFilter::tracked_velero_backups();
        let labelled = velero_backup(&[("ocm-backup", "velero")]);
        for obj in [
            velero_backup(&[]),
            velero_backup(&[("ocm-backup", "restic")]),
            velero_backup(&[("backup", "velero")]),
        ] {
            for event in all_events(&obj, &labelled) {
                assert!(!filter.admits(&event), "{:?} admitted", event);
            }
        }
    }

    #[test]
    fn test_update_uses_new_object() {
        let filter = EventFilter::tracked_velero_backups();
        let labelled = velero_backup(&[("ocm-backup", "velero")]);
        let unlabelled = velero_backup(&[]);

        assert!(filter.admits(&JobEvent::Updated {
            old: &unlabelled,
            new: &labelled,
        }));
        assert!(!filter.admits(&JobEvent::Updated {
            old: &labelled,
            new: &unlabelled,
        }));
    }

    #[test]
    fn test_invalid_selector_fails_closed() {
        let filter = EventFilter::from_match_labels(BTreeMap::from([(
            "not a label!".to_string(),
            "velero".to_string(),
        )]));
        assert!(filter.is_closed());
        assert!(filter.selector_string().is_none());

        let obj = velero_backup(&[("not a label!", "velero")]);
        for event in all_events(&obj, &obj) {
            assert!(!filter.admits(&event));
        }
    }

    #[test]
    fn test_prefixed_keys_compile() {
        let filter = EventFilter::from_match_labels(BTreeMap::from([(
            "cluster.open-cluster-management.io/backup".to_string(),
            "true".to_string(),
        )]));
        assert!(!filter.is_closed());
    }

    #[test]
    fn test_selector_string() {
        assert_eq!(
            EventFilter::tracked_velero_backups().selector_string().as_deref(),
            Some("ocm-backup=velero")
        );
    }
}
