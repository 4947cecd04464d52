use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::severity::Severity;

/// One registered monitoring event
///
/// Created when a node accepts a registration and immutable afterwards.
/// `id` is `0` until the storage backend assigns one on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringEvent {
    pub id: i64,

    /// Registration time (always UTC)
    pub timestamp: DateTime<Utc>,

    pub machine: String,

    pub module: String,

    /// Dotted path of the registering node below the module root
    pub component: String,

    pub severity: Severity,

    pub title: String,

    pub description: String,
}

impl MonitoringEvent {
    pub fn new(
        machine: impl Into<String>,
        module: impl Into<String>,
        component: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            timestamp: Utc::now(),
            machine: machine.into(),
            module: module.into(),
            component: component.into(),
            severity,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }
}
