//! Mapping from cluster API collection documents to metric observations.

use chrono::{Local, NaiveDateTime, TimeZone};
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use openshift_exporter_common::{
    LabelSet, MetricObservation, ResourceField, metric_description, metric_name,
};

use crate::config::CollectionConfig;

/// Layout of `metadata.creationTimestamp` once the zone designator is removed.
pub const CREATION_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Errors that abort flattening of a document.
#[derive(Debug, Error)]
pub enum FlattenError {
    #[error("document has no items array")]
    MissingItems,
    #[error("item {index}: missing {field}")]
    MissingField { index: usize, field: &'static str },
    #[error("item {index}: invalid creationTimestamp {value:?}: {source}")]
    InvalidTimestamp {
        index: usize,
        value: String,
        #[source]
        source: TimestampError,
    },
    #[error("item {index}: invalid resourceVersion {value}")]
    InvalidResourceVersion { index: usize, value: String },
}

/// Reasons a creation timestamp cannot be converted.
#[derive(Debug, Error)]
pub enum TimestampError {
    #[error(transparent)]
    Format(#[from] chrono::ParseError),
    #[error("time does not exist in the local time zone")]
    NonexistentLocalTime,
}

/// Flattens resource collections into observations.
#[derive(Debug, Clone)]
pub struct Flattener {
    exporter: String,
    keys_to_get: Vec<String>,
    labels_and_annotations_to_get: Vec<String>,
    sanitize_values: bool,
}

impl Flattener {
    /// Create a flattener that emits no labels.
    pub fn new(exporter: impl Into<String>) -> Self {
        Self {
            exporter: exporter.into(),
            keys_to_get: Vec::new(),
            labels_and_annotations_to_get: Vec::new(),
            sanitize_values: false,
        }
    }

    /// Create a flattener from the collection settings.
    pub fn from_config(exporter: impl Into<String>, config: &CollectionConfig) -> Self {
        Self::new(exporter)
            .with_keys(config.keys_to_get.clone())
            .with_labels_and_annotations(config.labels_and_annotations_to_get.clone())
            .with_sanitized_values(config.sanitize_label_values)
    }

    /// Top-level metadata keys to export as labels.
    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys_to_get = keys;
        self
    }

    /// Kubernetes label or annotation keys to export as labels.
    pub fn with_labels_and_annotations(mut self, keys: Vec<String>) -> Self {
        self.labels_and_annotations_to_get = keys;
        self
    }

    /// Clean every label value with [`label_clean`].
    pub fn with_sanitized_values(mut self, enabled: bool) -> Self {
        self.sanitize_values = enabled;
        self
    }

    /// Flatten a collection document into two observations per item.
    ///
    /// Any item with a missing or malformed timestamp or version fails the
    /// whole document.
    pub fn flatten_items(
        &self,
        task: &str,
        document: &Value,
    ) -> Result<Vec<MetricObservation>, FlattenError> {
        let items: &[Value] = match document.get("items") {
            Some(Value::Array(items)) => items.as_slice(),
            Some(Value::Null) => &[],
            _ => return Err(FlattenError::MissingItems),
        };

        let timestamp_name = metric_name(&self.exporter, task, ResourceField::CreationTimestamp);
        let timestamp_help = metric_description(task, ResourceField::CreationTimestamp);
        let version_name = metric_name(&self.exporter, task, ResourceField::ResourceVersion);
        let version_help = metric_description(task, ResourceField::ResourceVersion);

        let mut observations = Vec::with_capacity(items.len() * 2);

        for (index, item) in items.iter().enumerate() {
            let metadata = item
                .get("metadata")
                .filter(|m| m.is_object())
                .ok_or(FlattenError::MissingField {
                    index,
                    field: "metadata",
                })?;

            trace!(task, index, metadata = %metadata, "Flattening item");

            let labels = self.extract_labels(metadata);

            let raw_timestamp = metadata
                .get("creationTimestamp")
                .and_then(Value::as_str)
                .ok_or(FlattenError::MissingField {
                    index,
                    field: "metadata.creationTimestamp",
                })?;
            let created = parse_creation_timestamp(raw_timestamp).map_err(|source| {
                FlattenError::InvalidTimestamp {
                    index,
                    value: raw_timestamp.to_string(),
                    source,
                }
            })?;

            let raw_version = metadata
                .get("resourceVersion")
                .ok_or(FlattenError::MissingField {
                    index,
                    field: "metadata.resourceVersion",
                })?;
            let version = parse_resource_version(raw_version).ok_or_else(|| {
                FlattenError::InvalidResourceVersion {
                    index,
                    value: raw_version.to_string(),
                }
            })?;

            observations.push(
                MetricObservation::new(&timestamp_name, &timestamp_help, created)
                    .with_labels(labels.clone()),
            );
            observations.push(
                MetricObservation::new(&version_name, &version_help, version).with_labels(labels),
            );
        }

        Ok(observations)
    }

    /// Extract the configured labels from an item's metadata.
    ///
    /// Keys that are absent are left out of the set.
    pub fn extract_labels(&self, metadata: &Value) -> LabelSet {
        let mut labels = LabelSet::new();

        for key in &self.keys_to_get {
            if let Some(value) = metadata.get(key) {
                labels.push((key.clone(), self.label_value(value)));
            }
        }

        for key in &self.labels_and_annotations_to_get {
            let found = ["labels", "annotations"]
                .iter()
                .find_map(|section| metadata.get(section).and_then(|s| s.get(key)));

            if let Some(value) = found {
                let name = sanitize_label_name(key);
                // Don't override an existing label
                if !labels.iter().any(|(k, _)| k == &name) {
                    labels.push((name, self.label_value(value)));
                }
            }
        }

        labels
    }

    fn label_value(&self, value: &Value) -> String {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        if self.sanitize_values {
            label_clean(&text)
        } else {
            text
        }
    }
}

/// Convert a creation timestamp to Unix seconds.
///
/// The trailing zone designator is dropped and the remaining wall-clock time
/// is interpreted in the local time zone of this process.
pub fn parse_creation_timestamp(raw: &str) -> Result<f64, TimestampError> {
    let trimmed = raw
        .strip_suffix('Z')
        .or_else(|| raw.strip_suffix('z'))
        .unwrap_or(raw);
    let naive = NaiveDateTime::parse_from_str(trimmed, CREATION_TIMESTAMP_FORMAT)?;

    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or(TimestampError::NonexistentLocalTime)?;

    Ok(local.timestamp() as f64)
}

/// Parse a resource version, given either as a numeric string or a number.
pub fn parse_resource_version(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Clean a raw label value.
///
/// Hyphens and spaces become underscores; quotes, backslashes and control
/// characters are removed.
pub fn label_clean(value: &str) -> String {
    value
        .chars()
        .filter_map(|c| match c {
            '-' | ' ' => Some('_'),
            '"' | '\\' => None,
            c if c.is_control() => None,
            c => Some(c),
        })
        .collect()
}

/// Sanitize a label name to be Prometheus-compatible.
///
/// Prometheus label names must match `[a-zA-Z_][a-zA-Z0-9_]*`.
/// Labels starting with `__` are reserved for internal use.
pub fn sanitize_label_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len());
    let mut last_was_underscore = false;

    for (i, c) in name.chars().enumerate() {
        let valid = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || c == '_'
        };

        if valid {
            result.push(c);
            last_was_underscore = c == '_';
        } else if !last_was_underscore {
            result.push('_');
            last_was_underscore = true;
        }
    }

    // Remove trailing underscores
    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        return "label".to_string();
    }

    // Reserved prefix
    if result.starts_with("__") {
        result.insert(0, 'z');
    }

    result
}
