//! Resource kinds the exporter knows how to poll.
//!
//! Every configured task name is resolved against a static table at startup,
//! so an unknown name is a configuration error instead of a scrape failure.

use std::path::PathBuf;

use serde_json::Value;
use tracing::warn;

use openshift_exporter_common::MetricObservation;

use crate::config::{CollectionConfig, ConfigError};
use crate::mapping::{FlattenError, Flattener};

/// Turns one fetched collection document into observations.
pub type FlattenFn = fn(&Flattener, &str, &Value) -> Result<Vec<MetricObservation>, FlattenError>;

/// A pollable resource kind: collection path plus flatten function.
#[derive(Debug)]
pub struct TaskKind {
    /// Task name as used in configuration and metric names.
    pub name: &'static str,
    /// Collection path relative to the API base URL.
    pub api_path: &'static str,
    /// Flatten function for this kind's documents.
    pub flatten: FlattenFn,
}

static TASK_KINDS: [TaskKind; 3] = [
    TaskKind {
        name: "routes",
        api_path: "/apis/route.openshift.io/v1/routes",
        flatten: Flattener::flatten_items,
    },
    TaskKind {
        name: "networkpolicies",
        api_path: "/apis/networking.k8s.io/v1/networkpolicies",
        flatten: Flattener::flatten_items,
    },
    TaskKind {
        name: "secrets",
        api_path: "/api/v1/secrets",
        flatten: Flattener::flatten_items,
    },
];

impl TaskKind {
    /// All known kinds, in default run order.
    pub fn all() -> &'static [TaskKind] {
        &TASK_KINDS
    }

    /// Find a kind by task name.
    pub fn lookup(name: &str) -> Option<&'static TaskKind> {
        TASK_KINDS.iter().find(|k| k.name == name)
    }

    /// Names of all known kinds.
    pub fn known_names() -> Vec<&'static str> {
        TASK_KINDS.iter().map(|k| k.name).collect()
    }
}

/// A configured task, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Task {
    /// The resource kind.
    pub kind: &'static TaskKind,
    /// Fixture file; when set the task never touches the network.
    pub fixture: Option<PathBuf>,
}

impl Task {
    /// Task name.
    pub fn name(&self) -> &'static str {
        self.kind.name
    }

    /// Collection path relative to the API base URL.
    pub fn api_path(&self) -> &'static str {
        self.kind.api_path
    }

    /// Whether this task reads a local fixture.
    pub fn is_test_mode(&self) -> bool {
        self.fixture.is_some()
    }
}

/// Resolve configured task names into tasks, in configured order.
///
/// A fixture name only enables test mode when it mentions `json`.
pub fn resolve_tasks(config: &CollectionConfig) -> Result<Vec<Task>, ConfigError> {
    config
        .tasks
        .iter()
        .map(|name| {
            let kind = TaskKind::lookup(name).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "Unknown task '{}' (known tasks: {})",
                    name,
                    TaskKind::known_names().join(", ")
                ))
            })?;

            let fixture = match config.fixtures.get(name) {
                Some(file) if file.contains("json") => Some(config.fixture_dir.join(file)),
                Some(file) => {
                    warn!(task = %name, fixture = %file, "Ignoring fixture without json in its name");
                    None
                }
                None => None,
            };

            Ok(Task { kind, fixture })
        })
        .collect()
}
