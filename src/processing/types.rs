//! Core data types and error definitions for the extraction pipeline.

use crate::{metrics::MetricsSnapshot, model::ModelError, source::SourceError};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use super::persist::PersistError;

/// Abstraction level requested from the model (1 = coarse, 5 = fine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Granularity(u8);

impl Granularity {
    /// Accept levels in `1..=5`.
    pub fn new(level: u8) -> Option<Self> {
        (1..=5).contains(&level).then_some(Self(level))
    }

    /// Numeric level.
    pub fn level(self) -> u8 {
        self.0
    }

    /// Number of triples the model is asked to produce at this level.
    pub fn expected_triples(self) -> TripleRange {
        match self.0 {
            1 => TripleRange::between(1, 2),
            2 => TripleRange::between(3, 8),
            3 => TripleRange::between(9, 16),
            4 => TripleRange::between(17, 24),
            _ => TripleRange::at_least(25),
        }
    }
}

/// Inclusive triple count range; `max` is open for the finest level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripleRange {
    /// Lower bound.
    pub min: usize,
    /// Upper bound, if any.
    pub max: Option<usize>,
}

impl TripleRange {
    fn between(min: usize, max: usize) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    /// Whether `count` falls inside the range.
    pub fn contains(&self, count: usize) -> bool {
        count >= self.min && self.max.is_none_or(|max| count <= max)
    }
}

impl fmt::Display for TripleRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}-{}", self.min, max),
            None => write!(f, "mindestens {}", self.min),
        }
    }
}

/// Requirement that values of `field` in each element of `list` name a key of `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceRule {
    /// Top-level array holding the referencing objects.
    pub list: &'static str,
    /// Field inside each element carrying the reference.
    pub field: &'static str,
    /// Top-level object whose keys are valid targets.
    pub target: &'static str,
}

const TRIPLE_REFERENCES: [ReferenceRule; 3] = [
    ReferenceRule {
        list: "triples",
        field: "subjekt",
        target: "entities",
    },
    ReferenceRule {
        list: "triples",
        field: "praedikat",
        target: "praedikate",
    },
    ReferenceRule {
        list: "triples",
        field: "objekt",
        target: "entities",
    },
];

/// Output schema produced by the configured prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVariant {
    /// Entities, normalized predicates and triples.
    Triples,
    /// Concept comparison across languages.
    Concepts,
}

impl SchemaVariant {
    /// Required top-level keys when `REQUIRED_KEYS` is not configured.
    pub fn default_required_keys(self) -> &'static [&'static str] {
        match self {
            Self::Triples => &["entities", "praedikate", "triples"],
            Self::Concepts => &["konzepte", "vergleich"],
        }
    }

    /// Cross-reference rules checked after key validation.
    pub fn reference_rules(self) -> &'static [ReferenceRule] {
        match self {
            Self::Triples => &TRIPLE_REFERENCES,
            Self::Concepts => &[],
        }
    }

    /// Whether the prompt carries an expected triple count.
    pub fn counts_triples(self) -> bool {
        matches!(self, Self::Triples)
    }
}

impl FromStr for SchemaVariant {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "triples" => Ok(Self::Triples),
            "concepts" => Ok(Self::Concepts),
            _ => Err(()),
        }
    }
}

/// Step at which a record stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStage {
    /// Source record could not be read.
    Reading,
    /// Model invocation, including response normalization and validation.
    Requesting,
    /// Result could not be written.
    Persisting,
    /// Existing output could not be rewritten in metadata-only mode.
    Updating,
}

impl fmt::Display for RecordStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reading => "reading",
            Self::Requesting => "requesting",
            Self::Persisting => "persisting",
            Self::Updating => "updating",
        };
        f.write_str(name)
    }
}

/// Per-record failure; never aborts the batch.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Reading the record failed.
    #[error("Failed to read record: {0}")]
    Source(#[from] SourceError),
    /// Every model attempt failed.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// Writing the result failed.
    #[error("Failed to persist result: {0}")]
    Persist(#[source] PersistError),
    /// Refreshing an existing output failed.
    #[error("Failed to update metadata: {0}")]
    Update(#[source] PersistError),
}

impl RecordError {
    /// Stage the error belongs to.
    pub fn stage(&self) -> RecordStage {
        match self {
            Self::Source(_) => RecordStage::Reading,
            Self::Model(_) => RecordStage::Requesting,
            Self::Persist(_) => RecordStage::Persisting,
            Self::Update(_) => RecordStage::Updating,
        }
    }
}

/// Terminal state of one record.
#[derive(Debug)]
pub enum RecordOutcome {
    /// Extraction result written to the given path.
    Persisted(PathBuf),
    /// Metadata of an existing output rewritten.
    Updated(PathBuf),
    /// Record failed; the batch continues.
    Failed(RecordError),
}

/// Identifier and reason of a failed record.
#[derive(Debug, Clone, Serialize)]
pub struct FailedRecord {
    /// Record identifier.
    pub id: String,
    /// Stage that failed.
    pub stage: RecordStage,
    /// Rendered error chain.
    pub reason: String,
}

/// Totals reported at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    /// Records pulled from the source.
    pub seen: usize,
    /// Counter snapshot at the end of the run.
    pub metrics: MetricsSnapshot,
    /// Failed records in processing order.
    pub failed: Vec<FailedRecord>,
}
