#![deny(missing_docs)]

//! Core library for the corpus triple extraction batch.

/// Environment-driven configuration management.
pub mod config;
/// Structured logging and tracing setup.
pub mod logging;
/// Per-run counters.
pub mod metrics;
/// Remote model client, provider adapters and retry policy.
pub mod model;
/// TEI token reduction.
pub mod optimizer;
/// Extraction pipeline and batch orchestration.
pub mod processing;
/// Record sources (directory tree, SQLite query).
pub mod source;
