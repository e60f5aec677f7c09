//! Per-scrape collection and exposition.
//!
//! Every scrape runs one full cycle over the configured tasks, aggregates the
//! observations into gauge families and encodes them together with the
//! exporter's health metrics. Nothing is cached between scrapes.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{
    DescriptorEncoder, EncodeLabelValue, EncodeMetric, LabelValueEncoder,
};
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::registry::Registry;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use openshift_exporter_common::MetricObservation;

use crate::config::{ConfigError, ExporterConfig};
use crate::fetcher::{FetchError, ResourceFetcher};
use crate::health::ExporterHealth;
use crate::mapping::{FlattenError, Flattener};
use crate::tasks::{Task, resolve_tasks};

/// Errors that abort a collection cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("task '{task}': {source}")]
    Fetch {
        task: String,
        #[source]
        source: FetchError,
    },
    #[error("task '{task}': {source}")]
    Flatten {
        task: String,
        #[source]
        source: FlattenError,
    },
}

/// One labeled data point of a family.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Label values, in the family's key order.
    pub label_values: Vec<String>,
    /// Gauge value.
    pub value: f64,
}

/// A gauge family built during one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    /// Metric name.
    pub name: String,
    /// Help text.
    pub help: String,
    /// Label keys, fixed by the first observation of the family.
    pub label_keys: Vec<String>,
    /// Data points in observation order.
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    fn from_observation(observation: &MetricObservation) -> Self {
        Self {
            name: observation.name.clone(),
            help: observation.description.clone(),
            label_keys: observation.label_keys().map(str::to_string).collect(),
            samples: Vec::new(),
        }
    }

    /// Project an observation onto this family's label keys.
    ///
    /// Missing keys become empty strings, extra keys are dropped.
    fn project(&self, observation: &MetricObservation) -> Vec<String> {
        if observation.label_keys().any(|k| !self.label_keys.iter().any(|f| f == k)) {
            trace!(
                metric = %self.name,
                "Dropping label keys not present in the family schema"
            );
        }

        self.label_keys
            .iter()
            .map(|key| observation.label(key).unwrap_or_default().to_string())
            .collect()
    }

    /// Label pairs of a sample, with values escaped for the exposition.
    fn encoded_labels<'a>(&'a self, sample: &'a Sample) -> Vec<(&'a str, EscapedLabelValue<'a>)> {
        self.label_keys
            .iter()
            .map(String::as_str)
            .zip(sample.label_values.iter().map(|v| EscapedLabelValue(v)))
            .collect()
    }
}

/// Label value written with `\\`, `\"` and `\n` escaped.
#[derive(Debug, Clone, Copy)]
struct EscapedLabelValue<'a>(&'a str);

impl EncodeLabelValue for EscapedLabelValue<'_> {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        for c in self.0.chars() {
            match c {
                '\\' => encoder.write_str("\\\\")?,
                '"' => encoder.write_str("\\\"")?,
                '\n' => encoder.write_str("\\n")?,
                c => encoder.write_char(c)?,
            }
        }
        Ok(())
    }
}

/// Groups observations into families by metric name.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    families: Vec<MetricFamily>,
    index: HashMap<String, usize>,
    seen: HashSet<(usize, Vec<String>)>,
}

impl SnapshotBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one observation.
    ///
    /// Observations without labels are skipped. A data point whose label
    /// values repeat an earlier one in the same family is dropped; the first
    /// one wins.
    pub fn push(&mut self, observation: &MetricObservation) {
        if observation.labels.is_empty() {
            trace!(metric = %observation.name, "Skipping observation without labels");
            return;
        }

        let families = &mut self.families;
        let slot = *self
            .index
            .entry(observation.name.clone())
            .or_insert_with(|| {
                families.push(MetricFamily::from_observation(observation));
                families.len() - 1
            });

        let family = &mut self.families[slot];
        let label_values = family.project(observation);

        if !self.seen.insert((slot, label_values.clone())) {
            warn!(
                metric = %family.name,
                labels = ?label_values,
                "Dropping duplicate series"
            );
            return;
        }

        family.samples.push(Sample {
            label_values,
            value: observation.value,
        });
    }

    /// Finish the snapshot, keeping families in first-seen order.
    pub fn build(self) -> Snapshot {
        Snapshot {
            families: self.families,
        }
    }
}

/// Gauge families produced by one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Families in first-seen order.
    pub families: Vec<MetricFamily>,
}

impl Snapshot {
    /// Aggregate observations into families.
    pub fn from_observations<'a>(observations: impl IntoIterator<Item = &'a MetricObservation>) -> Self {
        let mut builder = SnapshotBuilder::new();
        for observation in observations {
            builder.push(observation);
        }
        builder.build()
    }

    /// Find a family by name.
    pub fn family(&self, name: &str) -> Option<&MetricFamily> {
        self.families.iter().find(|f| f.name == name)
    }

    /// Total number of data points.
    pub fn sample_count(&self) -> usize {
        self.families.iter().map(|f| f.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

impl Collector for Snapshot {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        for family in &self.families {
            let mut family_encoder =
                encoder.encode_descriptor(&family.name, &family.help, None, MetricType::Gauge)?;

            for sample in &family.samples {
                let labels = family.encoded_labels(sample);
                let metric_encoder = family_encoder.encode_family(&labels)?;
                ConstGauge::new(sample.value).encode(metric_encoder)?;
            }
        }
        Ok(())
    }
}

/// Collector shared between the HTTP handlers.
pub type SharedCollector = Arc<SnapshotCollector>;

/// Runs collection cycles on demand.
#[derive(Debug)]
pub struct SnapshotCollector {
    name: String,
    tasks: Vec<Task>,
    fetcher: ResourceFetcher,
    flattener: Flattener,
    health: ExporterHealth,
    cycle_lock: Mutex<()>,
}

impl SnapshotCollector {
    /// Create a collector from its parts.
    pub fn new(
        name: impl Into<String>,
        tasks: Vec<Task>,
        fetcher: ResourceFetcher,
        flattener: Flattener,
    ) -> Self {
        Self {
            name: name.into(),
            tasks,
            fetcher,
            flattener,
            health: ExporterHealth::new(),
            cycle_lock: Mutex::new(()),
        }
    }

    /// Create a collector from validated configuration.
    pub fn from_config(config: &ExporterConfig) -> Result<Self, ConfigError> {
        let tasks = resolve_tasks(&config.collection)?;
        Ok(Self::new(
            config.name.clone(),
            tasks,
            ResourceFetcher::from_config(&config.api),
            Flattener::from_config(config.name.clone(), &config.collection),
        ))
    }

    /// Exporter name used as metric prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured tasks in run order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Health metrics.
    pub fn health(&self) -> &ExporterHealth {
        &self.health
    }

    /// Run every task once and return all observations.
    ///
    /// Timeouts and HTTP error statuses only skip the affected task; any
    /// other failure aborts the cycle.
    pub async fn collect_observations(&self) -> Result<Vec<MetricObservation>, CycleError> {
        let mut observations = Vec::new();

        for task in &self.tasks {
            let outcome = self
                .fetcher
                .fetch(task)
                .await
                .map_err(|source| CycleError::Fetch {
                    task: task.name().to_string(),
                    source,
                })?;

            if let Some(code) = outcome.http_code() {
                self.health.set_http_code(code);
            }

            let Some(document) = outcome.into_document() else {
                continue;
            };

            let collected = (task.kind.flatten)(&self.flattener, task.name(), &document)
                .map_err(|source| CycleError::Flatten {
                    task: task.name().to_string(),
                    source,
                })?;

            debug!(
                task = task.name(),
                observations = collected.len(),
                "Task collected"
            );
            observations.extend(collected);
        }

        Ok(observations)
    }

    /// Run one cycle and return its families.
    ///
    /// A failed cycle yields an empty snapshot; its error is logged and
    /// counted. Concurrent scrapes run one cycle at a time.
    pub async fn scrape(&self) -> Snapshot {
        let _guard = self.cycle_lock.lock().await;
        let started = Instant::now();

        let snapshot = match self.collect_observations().await {
            Ok(observations) => {
                self.health.record_success();
                let snapshot = Snapshot::from_observations(&observations);
                info!(
                    families = snapshot.families.len(),
                    samples = snapshot.sample_count(),
                    "Collection cycle finished"
                );
                snapshot
            }
            Err(e) => {
                error!(error = %e, "Collection cycle failed");
                debug!(error = ?e, "Collection cycle failure details");
                self.health.record_failure();
                Snapshot::default()
            }
        };

        self.health.observe_cycle(started.elapsed());
        snapshot
    }

    /// Encode a snapshot together with the health metrics.
    pub fn encode(&self, snapshot: Snapshot) -> Result<String, std::fmt::Error> {
        let mut registry = Registry::default();
        self.health.register(&mut registry, &self.name);
        registry.register_collector(Box::new(snapshot));

        let mut body = String::new();
        prometheus_client::encoding::text::encode(&mut body, &registry)?;
        Ok(body)
    }

    /// Run one cycle and render the exposition text.
    pub async fn render(&self) -> Result<String, std::fmt::Error> {
        let snapshot = self.scrape().await;
        self.encode(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::TaskKind;
    use std::path::Path;
    use std::time::Duration;

    fn obs(name: &str, value: f64, labels: &[(&str, &str)]) -> MetricObservation {
        let mut observation = MetricObservation::new(name, format!("help for {}", name), value);
        for (k, v) in labels {
            observation = observation.with_label(*k, *v);
        }
        observation
    }

    fn fixture_collector(dir: &Path, files: &[(&str, &str)]) -> SnapshotCollector {
        let tasks = files
            .iter()
            .map(|(task, content)| {
                let path = dir.join(format!("{}.json", task));
                std::fs::write(&path, content).unwrap();
                Task {
                    kind: TaskKind::lookup(task).unwrap(),
                    fixture: Some(path),
                }
            })
            .collect();

        SnapshotCollector::new(
            "openshift",
            tasks,
            ResourceFetcher::new("https://unused.invalid", Duration::from_secs(1)),
            Flattener::new("openshift").with_keys(vec!["name".to_string()]),
        )
    }

    #[test]
    fn test_builder_groups_by_name_in_first_seen_order() {
        let snapshot = Snapshot::from_observations(&[
            obs("b_metric", 1.0, &[("name", "x")]),
            obs("a_metric", 2.0, &[("name", "x")]),
            obs("b_metric", 3.0, &[("name", "y")]),
        ]);

        let names: Vec<_> = snapshot.families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["b_metric", "a_metric"]);
        assert_eq!(snapshot.family("b_metric").unwrap().samples.len(), 2);
        assert_eq!(snapshot.sample_count(), 3);
    }

    #[test]
    fn test_builder_projects_onto_first_schema() {
        let snapshot = Snapshot::from_observations(&[
            obs("m", 1.0, &[("name", "a"), ("namespace", "ns")]),
            obs("m", 2.0, &[("name", "b"), ("extra", "dropped")]),
        ]);

        let family = snapshot.family("m").unwrap();
        assert_eq!(family.label_keys, vec!["name", "namespace"]);
        assert_eq!(family.samples[1].label_values, vec!["b", ""]);
    }

    #[test]
    fn test_builder_drops_duplicate_series() {
        let snapshot = Snapshot::from_observations(&[
            obs("m", 1.0, &[("name", "a")]),
            obs("m", 2.0, &[("name", "a")]),
            obs("m", 3.0, &[("name", "b")]),
        ]);

        let family = snapshot.family("m").unwrap();
        assert_eq!(family.samples.len(), 2);
        assert_eq!(family.samples[0].value, 1.0);
        assert_eq!(family.samples[1].value, 3.0);
    }

    #[test]
    fn test_builder_skips_unlabeled_observations() {
        let snapshot = Snapshot::from_observations(&[
            obs("unlabeled", 1.0, &[]),
            obs("unlabeled", 2.0, &[]),
            obs("unlabeled", 3.0, &[]),
            obs("m", 4.0, &[]),
            obs("m", 5.0, &[("name", "kept")]),
        ]);

        // a family with no labeled observation is left out
        assert!(snapshot.family("unlabeled").is_none());
        let family = snapshot.family("m").unwrap();
        assert_eq!(family.label_keys, vec!["name"]);
        assert_eq!(family.samples.len(), 1);
        assert_eq!(family.samples[0].value, 5.0);
        assert_eq!(snapshot.sample_count(), 1);
    }

    #[test]
    fn test_snapshot_escapes_label_values() {
        let value = "say \"hi\"\nC:\\tmp";
        let snapshot = Snapshot::from_observations(&[obs("m", 1.0, &[("note", value)])]);

        // stored values stay raw
        assert_eq!(snapshot.families[0].samples[0].label_values[0], value);

        let mut registry = Registry::default();
        registry.register_collector(Box::new(snapshot));
        let mut output = String::new();
        prometheus_client::encoding::text::encode(&mut output, &registry).unwrap();

        assert!(output.contains(r#"m{note="say \"hi\"\nC:\\tmp"} 1.0"#));
        assert!(!output.contains("hi\"\n"));
    }

    #[test]
    fn test_snapshot_encodes_gauges() {
        let snapshot = Snapshot::from_observations(&[
            obs("openshift_exporter_routes_resource_version", 42.0, &[("name", "web")]),
            obs("openshift_exporter_routes_resource_version", 7.0, &[("name", "api")]),
        ]);

        let mut registry = Registry::default();
        registry.register_collector(Box::new(snapshot));
        let mut output = String::new();
        prometheus_client::encoding::text::encode(&mut output, &registry).unwrap();

        assert!(output.contains("# TYPE openshift_exporter_routes_resource_version gauge"));
        assert!(output.contains("# HELP openshift_exporter_routes_resource_version help for"));
        assert!(output.contains("openshift_exporter_routes_resource_version{name=\"web\"} 42.0"));
        assert!(output.contains("openshift_exporter_routes_resource_version{name=\"api\"} 7.0"));
    }

    #[tokio::test]
    async fn test_scrape_success_sets_up() {
        let dir = tempfile::tempdir().unwrap();
        let collector = fixture_collector(
            dir.path(),
            &[(
                "routes",
                r#"{"items": [{"metadata": {"name": "web", "creationTimestamp": "2024-01-15T10:30:00Z", "resourceVersion": "12345"}}]}"#,
            )],
        );

        let snapshot = collector.scrape().await;

        assert_eq!(snapshot.families.len(), 2);
        let version = snapshot
            .family("openshift_exporter_routes_resource_version")
            .unwrap();
        assert_eq!(version.samples[0].value, 12345.0);
        assert_eq!(collector.health().up(), 1);
        assert_eq!(collector.health().errors(), 0);
        // fixtures never touch the recorded HTTP code
        assert_eq!(collector.health().http_code(), 0);
    }

    #[tokio::test]
    async fn test_scrape_failure_discards_partial_results() {
        let dir = tempfile::tempdir().unwrap();
        let collector = fixture_collector(
            dir.path(),
            &[
                (
                    "routes",
                    r#"{"items": [{"metadata": {"name": "web", "creationTimestamp": "2024-01-15T10:30:00Z", "resourceVersion": "1"}}]}"#,
                ),
                (
                    "secrets",
                    r#"{"items": [{"metadata": {"name": "s", "creationTimestamp": "2024-01-15T10:30:00Z", "resourceVersion": "abc"}}]}"#,
                ),
            ],
        );

        let snapshot = collector.scrape().await;

        assert!(snapshot.is_empty());
        assert_eq!(collector.health().up(), 0);
        assert_eq!(collector.health().errors(), 1);
    }

    #[tokio::test]
    async fn test_render_includes_health() {
        let dir = tempfile::tempdir().unwrap();
        let collector = fixture_collector(dir.path(), &[("secrets", r#"{"items": []}"#)]);

        let output = collector.render().await.unwrap();

        assert!(output.contains("openshift_exporter_up 1"));
        assert!(output.contains("openshift_exporter_errors_total 0"));
        assert!(output.contains("openshift_exporter_http_code 0"));
        assert!(output.contains("request_processing_seconds_count 1"));
        assert!(output.ends_with("# EOF\n"));
    }
}
