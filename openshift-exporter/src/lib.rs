//! Prometheus exporter for OpenShift resources.
//!
//! This crate polls the cluster API for routes, network policies and secrets
//! and exposes each item's creation timestamp and resource version as gauges
//! on an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Cluster API   │────>│    Collector    │────>│   HTTP Server   │
//! │  (or fixtures)  │     │  (per scrape)   │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! Every scrape runs a full collection cycle; nothing is cached between
//! scrapes.
//!
//! # Usage
//!
//! ```bash
//! openshift-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod collector;
pub mod config;
pub mod fetcher;
pub mod health;
pub mod http;
pub mod mapping;
pub mod scheduler;
pub mod tasks;

pub use collector::{SharedCollector, Snapshot, SnapshotCollector};
pub use config::ExporterConfig;
pub use fetcher::{FetchOutcome, ResourceFetcher};
pub use health::ExporterHealth;
pub use http::HttpServer;
pub use mapping::Flattener;
pub use scheduler::IdleLoop;
pub use tasks::{Task, TaskKind};
