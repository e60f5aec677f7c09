use serde::{Deserialize, Serialize};

/// Ordered label set: keys appear in the order they were configured.
pub type LabelSet = Vec<(String, String)>;

/// A single resolved data point produced by flattening one resource item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    /// Full metric name (e.g. "openshift_exporter_routes_resource_version").
    pub name: String,

    /// Labels extracted from the resource metadata.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: LabelSet,

    /// Help text for the metric family.
    pub description: String,

    /// The observed value.
    pub value: f64,
}

impl MetricObservation {
    /// Create a new observation without labels.
    pub fn new(name: impl Into<String>, description: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            labels: Vec::new(),
            description: description.into(),
            value,
        }
    }

    /// Add a label to this observation.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Add multiple labels to this observation.
    pub fn with_labels(mut self, labels: LabelSet) -> Self {
        self.labels.extend(labels);
        self
    }

    /// Label keys in order.
    pub fn label_keys(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|(k, _)| k.as_str())
    }

    /// Look up a label value by key.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Which metadata field an observation was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceField {
    CreationTimestamp,
    ResourceVersion,
}

impl ResourceField {
    /// Metric name suffix for this field.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceField::CreationTimestamp => "creation_timestamp",
            ResourceField::ResourceVersion => "resource_version",
        }
    }

    /// Human readable name used in metric descriptions.
    pub fn description(&self) -> &'static str {
        match self {
            ResourceField::CreationTimestamp => "creation timestamp",
            ResourceField::ResourceVersion => "resource version",
        }
    }
}

impl std::fmt::Display for ResourceField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build the metric name for a task field.
///
/// Format: `{exporter}_exporter_{task}_{field}`
pub fn metric_name(exporter: &str, task: &str, field: ResourceField) -> String {
    format!("{}_exporter_{}_{}", exporter, task, field.as_str())
}

/// Build the static description for a task field.
pub fn metric_description(task: &str, field: ResourceField) -> String {
    format!("Openshift {} {}", task, field.description())
}
