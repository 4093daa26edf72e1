//! Batch orchestration: source → optimizer → model → normalizer → validator → writer.

use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use time::OffsetDateTime;

use crate::{
    metrics::BatchMetrics,
    model::{AttemptError, ModelClient},
    optimizer,
    processing::{
        hook::ArtifactHook,
        metadata::{self, RunFacts},
        normalize::normalize,
        persist::{self, OutputIndex, OutputWriter, PersistError},
        prompt::PromptTemplate,
        types::{
            BatchSummary, FailedRecord, Granularity, RecordError, RecordOutcome, ReferenceRule,
            SchemaVariant,
        },
        validate::{check_references, validate},
    },
    source::{RecordSource, SourceError, SourceRecord},
};

/// Errors that stop a batch before any record is processed.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Source could not be listed or the single target was not found.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// Existing outputs could not be indexed.
    #[error("Failed to index existing outputs: {0}")]
    Index(#[from] PersistError),
}

/// What the batch does with each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Full extraction; optionally skip records that already have output.
    Extract {
        /// Skip records found in the output index.
        skip_existing: bool,
    },
    /// Rewrite the original-text field of existing outputs without calling the model.
    UpdateMetadata,
}

/// Per-run options, usually derived from the command line.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Processing mode.
    pub mode: BatchMode,
    /// Process only this file name or record id.
    pub target: Option<String>,
    /// Maximum number of non-skipped records.
    pub limit: Option<usize>,
    /// Requested abstraction level.
    pub granularity: Granularity,
    /// Send XML unchanged instead of reducing TEI.
    pub raw_xml: bool,
    /// Run the artifact hook after each persisted record.
    pub render_graphs: bool,
}

/// Output contract applied to every parsed response.
#[derive(Debug, Clone)]
pub struct OutputContract {
    /// Schema variant (drives metadata and prompt shape).
    pub variant: SchemaVariant,
    /// Top-level keys that must be present.
    pub required_keys: Vec<String>,
    /// Cross-reference rules; empty disables the check.
    pub references: &'static [ReferenceRule],
}

impl OutputContract {
    /// Contract for `variant`, with reference checks when `validate_references` is set.
    pub fn new(
        variant: SchemaVariant,
        required_keys: Vec<String>,
        validate_references: bool,
    ) -> Self {
        Self {
            variant,
            required_keys,
            references: if validate_references {
                variant.reference_rules()
            } else {
                &[]
            },
        }
    }

    fn accept(
        &self,
        raw: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>, AttemptError> {
        let value = normalize(raw).map_err(|error| AttemptError::Malformed(error.to_string()))?;
        validate(&value, &self.required_keys)
            .and_then(|()| check_references(&value, self.references))
            .map_err(|error| AttemptError::ValidationFailed(error.to_string()))?;
        match value {
            serde_json::Value::Object(object) => Ok(object),
            _ => Err(AttemptError::ValidationFailed("response is not a JSON object".into())),
        }
    }
}

/// Sequential, failure-isolating record pipeline.
pub struct BatchProcessor {
    source: Box<dyn RecordSource>,
    client: ModelClient,
    prompt: PromptTemplate,
    contract: OutputContract,
    writer: OutputWriter,
    hook: Option<Box<dyn ArtifactHook>>,
}

impl BatchProcessor {
    /// Assemble a processor from its collaborators.
    pub fn new(
        source: Box<dyn RecordSource>,
        client: ModelClient,
        prompt: PromptTemplate,
        contract: OutputContract,
        writer: OutputWriter,
    ) -> Self {
        Self {
            source,
            client,
            prompt,
            contract,
            writer,
            hook: None,
        }
    }

    /// Attach the hook run after each persisted output.
    pub fn with_hook(mut self, hook: Box<dyn ArtifactHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Process every record (or the single target) and return the run summary.
    pub async fn run(&self, settings: &BatchSettings) -> Result<BatchSummary, BatchError> {
        let metrics = BatchMetrics::new();
        let layout = self.writer.layout();
        let index = OutputIndex::scan(layout)?;

        let records: Box<dyn Iterator<Item = Result<SourceRecord, SourceError>> + '_> =
            match &settings.target {
                Some(name) => Box::new(std::iter::once(Ok(self.source.get(name)?))),
                None => self.source.records()?,
            };

        match settings.mode {
            BatchMode::UpdateMetadata if index.is_empty() => {
                tracing::warn!("Update mode: no existing outputs to refresh")
            }
            BatchMode::UpdateMetadata => {
                tracing::info!("Update mode: refreshing original texts in existing outputs")
            }
            BatchMode::Extract { skip_existing: true } => {
                tracing::info!(existing = index.len(), "Skip mode: existing outputs are skipped")
            }
            BatchMode::Extract { .. } => {}
        }

        let mut seen = 0usize;
        let mut processed = 0usize;
        let mut failed = Vec::new();

        for item in records {
            let limit_reached = settings.limit.is_some_and(|limit| processed >= limit);
            let record = match item {
                Ok(record) => record,
                Err(_) if limit_reached => {
                    tracing::info!(limit = processed, "Limit reached, stopping");
                    break;
                }
                Err(error) => {
                    seen += 1;
                    processed += 1;
                    let id = failed_source_label(&error);
                    tracing::error!(record_id = %id, error = %error, "Skipping unreadable record");
                    metrics.record_failed();
                    failed.push(failure(id, &RecordError::Source(error)));
                    continue;
                }
            };

            let existing = index.latest(layout, &record);
            let skip = match settings.mode {
                BatchMode::UpdateMetadata => existing.is_none(),
                BatchMode::Extract { skip_existing } => skip_existing && existing.is_some(),
            };
            if skip {
                seen += 1;
                metrics.record_skipped();
                tracing::info!(record_id = %record.id, "Skipping record");
                continue;
            }

            if limit_reached {
                tracing::info!(limit = processed, "Limit reached, stopping");
                break;
            }
            seen += 1;
            processed += 1;
            tracing::info!(record_id = %record.id, number = processed, "Processing record");

            let outcome = match (settings.mode, existing) {
                (BatchMode::UpdateMetadata, Some(path)) => self.update(&record, path),
                _ => self.extract(&record, settings, &metrics).await,
            };

            match outcome {
                RecordOutcome::Persisted(_) => metrics.record_persisted(),
                RecordOutcome::Updated(_) => metrics.record_updated(),
                RecordOutcome::Failed(error) => {
                    tracing::error!(
                        record_id = %record.id,
                        stage = %error.stage(),
                        error = %error,
                        "Record failed"
                    );
                    metrics.record_failed();
                    failed.push(failure(record.id.clone(), &error));
                }
            }
        }

        let summary = BatchSummary {
            seen,
            metrics: metrics.snapshot(),
            failed,
        };
        self.log_summary(&summary);
        Ok(summary)
    }

    async fn extract(
        &self,
        record: &SourceRecord,
        settings: &BatchSettings,
        metrics: &BatchMetrics,
    ) -> RecordOutcome {
        match self.try_extract(record, settings, metrics).await {
            Ok(path) => RecordOutcome::Persisted(path),
            Err(error) => RecordOutcome::Failed(error),
        }
    }

    async fn try_extract(
        &self,
        record: &SourceRecord,
        settings: &BatchSettings,
        metrics: &BatchMetrics,
    ) -> Result<PathBuf, RecordError> {
        let started = OffsetDateTime::now_utc();
        let clock = Instant::now();

        let optimized = optimizer::optimize(&record.text, settings.raw_xml).render();
        tracing::debug!(
            record_id = %record.id,
            raw_chars = record.text.chars().count(),
            prompt_chars = optimized.chars().count(),
            "Prepared record text"
        );
        let request = self.prompt.request(&optimized, settings.granularity);

        let object = self
            .client
            .invoke_validated(&request, metrics, |raw| self.contract.accept(raw))
            .await?;

        if self.contract.variant.counts_triples() {
            let expected = settings.granularity.expected_triples();
            let count = object
                .get("triples")
                .and_then(serde_json::Value::as_array)
                .map_or(0, Vec::len);
            if !expected.contains(count) {
                tracing::warn!(
                    record_id = %record.id,
                    count,
                    expected = %expected,
                    "Triple count outside expected range"
                );
            }
        }

        let facts = RunFacts {
            record,
            granularity: settings.granularity,
            started,
            elapsed: clock.elapsed(),
        };
        let document = metadata::attach(self.contract.variant, object, &facts);
        let path = self
            .writer
            .write(record, &document, started)
            .map_err(RecordError::Persist)?;

        if settings.render_graphs {
            if let Some(hook) = &self.hook {
                hook.on_persisted(&path).await;
            }
        }
        tracing::info!(
            record_id = %record.id,
            seconds = facts.elapsed.as_secs_f64(),
            "Record persisted"
        );
        Ok(path)
    }

    fn update(&self, record: &SourceRecord, path: &Path) -> RecordOutcome {
        match persist::update_metadata(path, self.contract.variant, record) {
            Ok(()) => RecordOutcome::Updated(path.to_path_buf()),
            Err(error) => RecordOutcome::Failed(RecordError::Update(error)),
        }
    }

    fn log_summary(&self, summary: &BatchSummary) {
        let metrics = &summary.metrics;
        tracing::info!(
            seen = summary.seen,
            persisted = metrics.persisted,
            updated = metrics.updated,
            skipped = metrics.skipped,
            failed = metrics.failed,
            model_calls = metrics.model_calls,
            "Batch finished"
        );
        if !summary.failed.is_empty() {
            let ids: Vec<&str> = summary.failed.iter().map(|record| record.id.as_str()).collect();
            tracing::error!(
                count = ids.len(),
                max_attempts = self.client.retry_policy().max_attempts(),
                ids = %ids.join(", "),
                "Failed records"
            );
        }
    }
}

fn failure(id: String, error: &RecordError) -> FailedRecord {
    FailedRecord {
        id,
        stage: error.stage(),
        reason: error.to_string(),
    }
}

fn failed_source_label(error: &SourceError) -> String {
    match error {
        SourceError::Read { path, .. } | SourceError::Duplicate(path) => path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string()),
        other => other.to_string(),
    }
}
