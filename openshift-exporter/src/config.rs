//! Configuration for the OpenShift exporter.
//!
//! Settings come from an optional JSON5 file, then environment variables
//! (the names used by the container image), then CLI flags.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use openshift_exporter_common::{LoggingConfig, load_config, parse_config};

use crate::tasks::TaskKind;

/// Service account token mounted into every pod.
pub const DEFAULT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Cluster CA bundle mounted into every pod.
pub const DEFAULT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] openshift_exporter_common::Error),
    #[error("Invalid value for {name}: {value:?}")]
    Env { name: String, value: String },
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Exporter name used as metric prefix (default: "openshift").
    #[serde(default = "default_name")]
    pub name: String,

    /// Cluster API connection settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// What to collect and how to label it.
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Metrics endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_name() -> String {
    "openshift".to_string()
}

/// Cluster API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the API server.
    #[serde(default = "default_url")]
    pub url: String,

    /// Optional User-Agent header.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Bearer token file.
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,

    /// CA certificate file used to verify the API server.
    #[serde(default = "default_ca_path")]
    pub ca_path: PathBuf,
}

fn default_url() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_token_path() -> PathBuf {
    PathBuf::from(DEFAULT_TOKEN_PATH)
}

fn default_ca_path() -> PathBuf {
    PathBuf::from(DEFAULT_CA_PATH)
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            user_agent: None,
            timeout_secs: default_timeout(),
            token_path: default_token_path(),
            ca_path: default_ca_path(),
        }
    }
}

/// Collection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Task names to run on every scrape, in order.
    #[serde(default = "default_tasks")]
    pub tasks: Vec<String>,

    /// Top-level metadata keys exported as labels.
    #[serde(default)]
    pub keys_to_get: Vec<String>,

    /// Kubernetes label or annotation keys exported as labels.
    #[serde(default)]
    pub labels_and_annotations_to_get: Vec<String>,

    /// Clean label values before emitting them.
    #[serde(default)]
    pub sanitize_label_values: bool,

    /// Fixture file per task name; enables test mode for that task.
    #[serde(default)]
    pub fixtures: HashMap<String, String>,

    /// Directory fixture files are read from.
    #[serde(default = "default_fixture_dir")]
    pub fixture_dir: PathBuf,
}

fn default_tasks() -> Vec<String> {
    TaskKind::all().iter().map(|k| k.name.to_string()).collect()
}

fn default_fixture_dir() -> PathBuf {
    PathBuf::from("/opt/exporter/test")
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            tasks: default_tasks(),
            keys_to_get: Vec::new(),
            labels_and_annotations_to_get: Vec::new(),
            sanitize_label_values: false,
            fixtures: HashMap::new(),
            fixture_dir: default_fixture_dir(),
        }
    }
}

/// Metrics endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to bind (default: "0.0.0.0").
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Port to listen on (default: 9647).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Sleep interval of the idle loop in seconds.
    #[serde(default = "default_idle_interval")]
    pub idle_interval_secs: u64,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    9647
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_idle_interval() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            listen_port: default_listen_port(),
            path: default_path(),
            idle_interval_secs: default_idle_interval(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    ///
    /// Not validated: environment and CLI overrides still apply, so callers
    /// run [`ExporterConfig::validate`] once every layer is in.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = load_config(path)?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults and the process environment.
    ///
    /// Not validated, like [`ExporterConfig::load_from_file`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Override settings from environment-style variables.
    ///
    /// Empty values are ignored. List options are whitespace separated.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let list = |value: String| -> Vec<String> {
            value.split_whitespace().map(str::to_string).collect()
        };

        if let Some(v) = get("TASKS") {
            self.collection.tasks = list(v);
        }
        if let Some(v) = get("KEYS_TO_GET") {
            self.collection.keys_to_get = list(v);
        }
        if let Some(v) = get("LABELS_AND_ANNOTATIONS_TO_GET") {
            self.collection.labels_and_annotations_to_get = list(v);
        }
        if let Some(v) = get("URL") {
            self.api.url = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.logging.set_level(&v);
        }
        if let Some(v) = get("HEADER_USER_AGENT") {
            self.api.user_agent = Some(v);
        }

        let mut task_names: Vec<String> =
            TaskKind::all().iter().map(|k| k.name.to_string()).collect();
        for name in &self.collection.tasks {
            if !task_names.contains(name) {
                task_names.push(name.clone());
            }
        }
        for name in task_names {
            if let Some(v) = get(&format!("TEST_{}", name.to_ascii_uppercase())) {
                self.collection.fixtures.insert(name, v);
            }
        }

        if let Some(v) = get("CHECK_TIMEOUT") {
            self.api.timeout_secs = parse_env("CHECK_TIMEOUT", &v)?;
        }
        if let Some(v) = get("MAIN_LOOP_SLEEP_INTERVAL") {
            self.http.idle_interval_secs = parse_env("MAIN_LOOP_SLEEP_INTERVAL", &v)?;
        }
        if let Some(v) = get("LISTEN_PORT") {
            self.http.listen_port = parse_env("LISTEN_PORT", &v)?;
        }

        Ok(())
    }

    /// Socket address the metrics endpoint binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.http.bind, self.http.listen_port)
            .parse()
            .map_err(|_| {
                ConfigError::Validation(format!(
                    "Invalid listen address: {}:{}",
                    self.http.bind, self.http.listen_port
                ))
            })
    }

    /// Per-request timeout for the cluster API.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Sleep interval of the idle loop.
    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.http.idle_interval_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Validation("name must not be empty".to_string()));
        }

        if self.collection.tasks.is_empty() {
            return Err(ConfigError::Validation(
                "at least one task must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for task in &self.collection.tasks {
            if TaskKind::lookup(task).is_none() {
                return Err(ConfigError::Validation(format!(
                    "Unknown task '{}' (known tasks: {})",
                    task,
                    TaskKind::known_names().join(", ")
                )));
            }
            if !seen.insert(task.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Task '{}' is configured more than once",
                    task
                )));
            }
        }

        if self.api.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeout_secs must be > 0".to_string(),
            ));
        }

        if self.http.idle_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "idle_interval_secs must be > 0".to_string(),
            ));
        }

        if reqwest::Url::parse(&self.api.url).is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid API url: {}",
                self.api.url
            )));
        }

        // Validate listen address format
        self.listen_addr()?;

        // Validate path starts with /
        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        name: name.to_string(),
        value: value.to_string(),
    })
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            api: ApiConfig::default(),
            collection: CollectionConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = ExporterConfig::parse("{}").unwrap();

        assert_eq!(config.name, "openshift");
        assert_eq!(config.api.url, "https://kubernetes.default.svc");
        assert_eq!(config.api.timeout_secs, 10);
        assert_eq!(config.api.token_path, PathBuf::from(DEFAULT_TOKEN_PATH));
        assert_eq!(
            config.collection.tasks,
            vec!["routes", "networkpolicies", "secrets"]
        );
        assert!(config.collection.keys_to_get.is_empty());
        assert_eq!(config.http.listen_port, 9647);
        assert_eq!(config.http.path, "/metrics");
        assert_eq!(config.http.idle_interval_secs, 10);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            name: "okd",
            api: {
                url: "https://api.cluster.local:6443",
                user_agent: "exporter/1.0",
                timeout_secs: 3,
                token_path: "/tmp/token",
                ca_path: "/tmp/ca.crt"
            },
            collection: {
                tasks: ["secrets"],
                keys_to_get: ["namespace", "name"],
                labels_and_annotations_to_get: ["app"],
                sanitize_label_values: true,
                fixtures: { secrets: "secrets.json" },
                fixture_dir: "/srv/fixtures"
            },
            http: {
                bind: "127.0.0.1",
                listen_port: 9100,
                path: "/prometheus/metrics",
                idle_interval_secs: 30
            },
            logging: {
                level: "debug",
                format: "json"
            }
        }"#;

        let config = ExporterConfig::parse(json).unwrap();

        assert_eq!(config.name, "okd");
        assert_eq!(config.api.user_agent.as_deref(), Some("exporter/1.0"));
        assert_eq!(config.request_timeout(), Duration::from_secs(3));
        assert_eq!(config.collection.tasks, vec!["secrets"]);
        assert_eq!(config.collection.keys_to_get, vec!["namespace", "name"]);
        assert!(config.collection.sanitize_label_values);
        assert_eq!(
            config.collection.fixtures.get("secrets"),
            Some(&"secrets.json".to_string())
        );
        assert_eq!(
            config.listen_addr().unwrap(),
            "127.0.0.1:9100".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.idle_interval(), Duration::from_secs(30));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut config = ExporterConfig::default();
        config
            .apply_env(env(&[
                ("TASKS", "secrets  routes"),
                ("KEYS_TO_GET", "namespace name"),
                ("LABELS_AND_ANNOTATIONS_TO_GET", "app.kubernetes.io/name"),
                ("URL", "https://api.example:6443"),
                ("LOG_LEVEL", "DEBUG"),
                ("HEADER_USER_AGENT", "probe"),
                ("TEST_ROUTES", "routes.json"),
                ("CHECK_TIMEOUT", "5"),
                ("MAIN_LOOP_SLEEP_INTERVAL", "2"),
                ("LISTEN_PORT", "9000"),
            ]))
            .unwrap();

        assert_eq!(config.collection.tasks, vec!["secrets", "routes"]);
        assert_eq!(config.collection.keys_to_get, vec!["namespace", "name"]);
        assert_eq!(
            config.collection.labels_and_annotations_to_get,
            vec!["app.kubernetes.io/name"]
        );
        assert_eq!(config.api.url, "https://api.example:6443");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.api.user_agent.as_deref(), Some("probe"));
        assert_eq!(
            config.collection.fixtures.get("routes"),
            Some(&"routes.json".to_string())
        );
        assert_eq!(config.api.timeout_secs, 5);
        assert_eq!(config.http.idle_interval_secs, 2);
        assert_eq!(config.http.listen_port, 9000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_env_ignores_empty_values() {
        let mut config = ExporterConfig::default();
        config
            .apply_env(env(&[("TASKS", "  "), ("URL", ""), ("TEST_SECRETS", "")]))
            .unwrap();

        assert_eq!(config.collection.tasks.len(), 3);
        assert_eq!(config.api.url, "https://kubernetes.default.svc");
        assert!(config.collection.fixtures.is_empty());
    }

    #[test]
    fn test_apply_env_invalid_integer() {
        let mut config = ExporterConfig::default();
        let result = config.apply_env(env(&[("LISTEN_PORT", "ninety")]));

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("LISTEN_PORT"));
    }

    #[test]
    fn test_file_task_list_overridden_by_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter.json5");
        std::fs::write(&path, r#"{ collection: { tasks: ["pods"] } }"#).unwrap();

        let mut config = ExporterConfig::load_from_file(&path).unwrap();
        assert!(config.validate().is_err());

        config
            .apply_env(env(&[("TASKS", "routes secrets")]))
            .unwrap();
        config.validate().unwrap();
        assert_eq!(config.collection.tasks, vec!["routes", "secrets"]);
    }

    #[test]
    fn test_load_from_file_missing() {
        let result = ExporterConfig::load_from_file("/nonexistent/exporter.json5");
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_validate_unknown_task() {
        let json = r#"{ collection: { tasks: ["routes", "pods"] } }"#;

        let result = ExporterConfig::parse(json);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Unknown task 'pods'"));
    }

    #[test]
    fn test_validate_duplicate_task() {
        let json = r#"{ collection: { tasks: ["routes", "routes"] } }"#;

        let result = ExporterConfig::parse(json);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn test_validate_invalid_path() {
        let json = r#"{
            http: { path: "no-leading-slash" }
        }"#;

        let result = ExporterConfig::parse(json);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("must start with /")
        );
    }

    #[test]
    fn test_validate_invalid_bind() {
        let json = r#"{ http: { bind: "not-an-address" } }"#;

        let result = ExporterConfig::parse(json);
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_zero_timeout() {
        let json = r#"{ api: { timeout_secs: 0 } }"#;

        assert!(ExporterConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_invalid_url() {
        let json = r#"{ api: { url: "not a url" } }"#;

        assert!(ExporterConfig::parse(json).is_err());
    }
}
