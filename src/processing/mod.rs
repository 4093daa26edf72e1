//! Extraction pipeline: prompt construction, response cleanup, contract checks, persistence,
//! and the batch orchestrator that ties them together.

pub mod hook;
pub mod metadata;
pub mod normalize;
pub mod persist;
pub mod prompt;
mod service;
pub mod types;
pub mod validate;

pub use hook::{ArtifactHook, CommandHook};
pub use persist::{OutputIndex, OutputLayout, OutputWriter, PersistError};
pub use prompt::{PromptError, PromptTemplate};
pub use service::{BatchError, BatchMode, BatchProcessor, BatchSettings, OutputContract};
pub use types::{
    BatchSummary, FailedRecord, Granularity, RecordError, RecordOutcome, RecordStage, ReferenceRule,
    SchemaVariant, TripleRange,
};
