use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use corpus_triples::{
    config,
    logging,
    model::ModelClient,
    processing::{
        BatchMode, BatchProcessor, BatchSettings, CommandHook, Granularity, OutputContract,
        OutputLayout, OutputWriter, PromptTemplate,
    },
    source::{DatabaseSource, FileSource, RecordSource},
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceKind {
    File,
    Db,
}

#[derive(Parser)]
#[command(
    name = "corpus-triples",
    about = "Extract structured triples from letter corpora via a remote language model"
)]
struct Cli {
    /// Where records come from.
    #[arg(long, value_enum, default_value = "file")]
    source: SourceKind,
    /// Process a single file (relative to INPUT_DIR) or database record id.
    #[arg(long)]
    file: Option<String>,
    /// Abstraction level 1-5; defaults to DEFAULT_GRANULARITY.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
    granularity: Option<u8>,
    /// Skip records whose output already exists.
    #[arg(long)]
    skip_existing: bool,
    /// Stop after this many processed (non-skipped) records.
    #[arg(long)]
    limit: Option<usize>,
    /// Do not run GRAPH_RENDER_COMMAND for persisted outputs.
    #[arg(long)]
    no_graph: bool,
    /// Send XML sources unchanged instead of reducing TEI.
    #[arg(long)]
    raw_xml: bool,
    /// Only refresh original texts in existing outputs; no model calls.
    #[arg(long)]
    update_metadata: bool,
    /// Load environment from this file instead of `.env`.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.env_file.as_deref()).context("Failed to load configuration")?;
    logging::init_tracing(&config.log_file);
    tracing::debug!(
        provider = ?config.model.provider,
        model = %config.model.model,
        url = %config.model.full_url(),
        schema = ?config.schema_variant,
        max_retries = config.model.max_retries,
        "Loaded configuration"
    );

    let prompt = PromptTemplate::load(
        &config.prompt_file,
        config.schema_variant,
        &config.entity_types,
    )?;

    let source: Box<dyn RecordSource> = match cli.source {
        SourceKind::File => Box::new(FileSource::open(&config.input_dir)?),
        SourceKind::Db => {
            let Some(path) = &config.database.path else {
                bail!("DATABASE_PATH must be set when --source db is used");
            };
            Box::new(DatabaseSource::open(
                path,
                config.database.query.clone(),
                config.database.language_columns.clone(),
            )?)
        }
    };
    let layout = match cli.source {
        SourceKind::File => OutputLayout::Mirrored(config.output_dir.clone()),
        SourceKind::Db => OutputLayout::Flat(config.database.output_dir.clone()),
    };

    let granularity = match cli.granularity {
        Some(level) => Granularity::new(level).context("granularity must be between 1 and 5")?,
        None => config.default_granularity,
    };
    let mode = if cli.update_metadata {
        BatchMode::UpdateMetadata
    } else {
        BatchMode::Extract {
            skip_existing: cli.skip_existing,
        }
    };

    let client = ModelClient::from_config(&config.model)?;
    let contract = OutputContract::new(
        config.schema_variant,
        config.required_keys.clone(),
        config.validate_references,
    );
    let mut processor =
        BatchProcessor::new(source, client, prompt, contract, OutputWriter::new(layout));
    if let Some(hook) = config.graph_render_command.as_deref().and_then(CommandHook::parse) {
        processor = processor.with_hook(Box::new(hook));
    }

    let settings = BatchSettings {
        mode,
        target: cli.file,
        limit: cli.limit,
        granularity,
        raw_xml: cli.raw_xml,
        render_graphs: !cli.no_graph,
    };
    tracing::info!(
        source = ?cli.source,
        granularity = granularity.level(),
        mode = ?settings.mode,
        limit = ?settings.limit,
        "Starting batch"
    );

    let summary = processor.run(&settings).await?;
    if !summary.failed.is_empty() {
        tracing::warn!(failed = summary.failed.len(), "Batch completed with failures");
    }
    Ok(())
}
