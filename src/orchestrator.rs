//! Per-dataset transform runs and their sequencing

use crate::{
    archive::Archive,
    catalog::{Catalog, DatasetSpec},
    config::Config,
    error::{TransformError, TransformResult},
    fetch::Source,
    normalize,
    parser::ChunkedParser,
    progress::{ProgressReport, ProgressTracker},
    writer::{ColumnarWriter, WriteOutcome},
};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::io::AsyncRead;

/// Transform one staged archive into its columnar output
///
/// Any output from a previous run is deleted first. On failure, whatever was
/// written so far is discarded, so that either a complete output or no
/// output exists once this returns.
pub async fn transform_dataset(
    config: &Config,
    spec: &DatasetSpec,
    archive_path: &Path,
    report: &ProgressReport,
) -> TransformResult<WriteOutcome> {
    // Open the input
    let mut archive = Archive::open(archive_path).await?;
    let (member, input) = archive.member(&config.member).await?;
    log::info!("Transforming {} (member {})", spec.archive, member.name);
    let parser = ChunkedParser::new(input, archive_path, spec.arity(), config.input);

    // Prepare the output
    let output_path = config.output_dir.join(&*spec.output_name());
    let writer = ColumnarWriter::create(&output_path, spec.columns.clone(), config).await?;

    // Stream chunks from input to output
    let bytes = report.bytes(&*spec.archive, member.uncompressed_size);
    persist(config, spec, parser, writer, &bytes).await
}

/// Write every chunk of the input, then finalize the output, or discard it if
/// anything failed
async fn persist<R: AsyncRead + Unpin + Send>(
    config: &Config,
    spec: &DatasetSpec,
    parser: ChunkedParser<R>,
    mut writer: ColumnarWriter,
    bytes: &ProgressTracker,
) -> TransformResult<WriteOutcome> {
    match pump(config, spec, parser, &mut writer, bytes).await {
        Ok(()) => writer.finish().await,
        Err(e) => {
            writer.abort().await;
            Err(e)
        }
    }
}

/// Move every chunk of the input through normalization and into the output
async fn pump<R: AsyncRead + Unpin + Send>(
    config: &Config,
    spec: &DatasetSpec,
    parser: ChunkedParser<R>,
    writer: &mut ColumnarWriter,
    bytes: &ProgressTracker,
) -> TransformResult<()> {
    let mut chunks = std::pin::pin!(parser.into_stream());
    let mut num_chunks = 0;
    while let Some((chunk, bytes_read)) = chunks.try_next().await? {
        log::trace!(
            "Read {} records of {} starting at row {}",
            chunk.len(),
            spec.archive,
            chunk.first_row()
        );
        writer.write_chunk(normalize::normalize_chunk(chunk)).await?;
        bytes.advance_to(bytes_read);
        num_chunks += 1;
        if num_chunks % config.progress_every.get() == 0 {
            log::info!(
                "{}: {} rows persisted",
                spec.archive,
                writer.rows_written()
            );
        }
    }
    Ok(())
}

/// Run the transform for every dataset of a catalogue
///
/// Datasets are independent: a failure is logged and recorded in the report,
/// then processing moves on to the next dataset. Up to `config.jobs` datasets
/// are processed concurrently, each writing its own output file. They are
/// polled from the calling task, so their I/O overlaps but their Parquet
/// encoding does not run in parallel.
pub async fn run_all(
    config: Arc<Config>,
    catalog: &Catalog,
    source: &impl Source,
    report: &ProgressReport,
) -> BatchReport {
    let datasets = report.datasets(catalog.len());
    let results = stream::iter(catalog.iter())
        .map(|spec| {
            let config = &config;
            let datasets = &datasets;
            async move {
                let outcome = run_one(config, spec, source, report).await;
                datasets.advance(1);
                DatasetReport {
                    archive: spec.archive.clone(),
                    outcome,
                }
            }
        })
        .buffered(config.jobs.get())
        .collect::<Vec<_>>()
        .await;
    BatchReport(results)
}

/// Acquire and transform one dataset, logging the outcome
async fn run_one(
    config: &Config,
    spec: &DatasetSpec,
    source: &impl Source,
    report: &ProgressReport,
) -> DatasetOutcome {
    let archive_path = match source.locate(spec).await {
        Ok(path) => path,
        Err(e) => {
            let hint = if e.is_retrievable() {
                "it may become available later"
            } else {
                "it is not published"
            };
            let e = TransformError::InputUnavailable {
                dataset: spec.archive.clone(),
                reason: e.to_string(),
            };
            log::warn!("Skipping {}, {hint}: {} ({e})", spec.archive, e.kind());
            return DatasetOutcome::Skipped(e);
        }
    };
    match transform_dataset(config, spec, &archive_path, report).await {
        Ok(WriteOutcome::Written { path, rows, chunks }) => {
            log::info!(
                "Finished {}: {rows} rows in {chunks} chunks written to {}",
                spec.archive,
                path.display()
            );
            DatasetOutcome::Written { path, rows, chunks }
        }
        Ok(WriteOutcome::Empty) => {
            log::warn!("{} has no record, no output was produced", spec.archive);
            DatasetOutcome::Empty
        }
        Err(e) => {
            log::error!("Failed to transform {}: {} ({e})", spec.archive, e.kind());
            DatasetOutcome::Failed(e)
        }
    }
}

/// What happened to one dataset
#[derive(Debug)]
pub enum DatasetOutcome {
    /// The output was written
    Written {
        path: PathBuf,
        rows: u64,
        chunks: u64,
    },

    /// The input had no record, so there is no output
    Empty,

    /// The input could not be acquired, the dataset was not processed
    Skipped(TransformError),

    /// The transform failed, there is no output
    Failed(TransformError),
}
//
impl DatasetOutcome {
    /// Truth that the dataset was processed as expected
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Written { .. } | Self::Empty)
    }
}
//
impl fmt::Display for DatasetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Written { path, rows, chunks } => write!(
                f,
                "{rows} rows in {chunks} chunks written to {}",
                path.display()
            ),
            Self::Empty => write!(f, "empty, no output"),
            Self::Skipped(e) => write!(f, "skipped, {}", e.kind()),
            Self::Failed(e) => write!(f, "failed, {}", e.kind()),
        }
    }
}

/// Outcome of one dataset within a batch
#[derive(Debug)]
pub struct DatasetReport {
    /// Archive name of the dataset
    pub archive: Box<str>,

    /// What happened to it
    pub outcome: DatasetOutcome,
}

/// Outcome of a batch of datasets, in catalogue order
#[derive(Debug)]
pub struct BatchReport(Vec<DatasetReport>);
//
impl BatchReport {
    /// Per-dataset outcomes
    pub fn datasets(&self) -> &[DatasetReport] {
        &self.0[..]
    }

    /// Truth that no dataset failed or was skipped
    pub fn success(&self) -> bool {
        self.0.iter().all(|dataset| dataset.outcome.is_success())
    }

    /// Number of datasets that failed or were skipped
    pub fn num_failures(&self) -> usize {
        self.0
            .iter()
            .filter(|dataset| !dataset.outcome.is_success())
            .count()
    }
}
