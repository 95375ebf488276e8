//! Incremental Parquet output of a dataset

use crate::{
    config::Config,
    error::{TransformError, TransformResult},
    parser::Chunk,
    schema::Schema,
};
use arrow::{
    array::{ArrayRef, RecordBatch, StringBuilder},
    datatypes::SchemaRef,
    error::ArrowError,
};
use parquet::{arrow::AsyncArrowWriter, file::properties::WriterProperties};
use std::{
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs::{self, File};

/// Writer of one columnar output file
///
/// The output schema is fixed by the first chunk. Data is written to a
/// temporary file next to the destination, which only replaces the
/// destination once the file is finalized. If the writer is aborted or dropped
/// before that, the temporary file is removed.
pub struct ColumnarWriter {
    /// Final location of the output
    path: PathBuf,

    /// Location of the output while it is being written
    partial_path: PathBuf,

    /// Declared column names
    columns: Arc<[Box<str>]>,

    /// Parquet encoding settings
    properties: WriterProperties,

    /// Open output, once the first chunk has been received
    output: Option<OpenOutput>,

    /// Truth that the temporary file exists on disk
    started: bool,

    /// Number of rows written so far
    rows: u64,

    /// Number of chunks written so far
    chunks: u64,

    /// Truth that the output was finalized or discarded
    closed: bool,
}
//
impl ColumnarWriter {
    /// Prepare to write a dataset with the declared columns at `path`
    ///
    /// Any output left at `path` by a previous run is deleted right away, so
    /// that a dataset run always starts from scratch.
    pub async fn create(
        path: &Path,
        columns: Arc<[Box<str>]>,
        config: &Config,
    ) -> TransformResult<Self> {
        let partial_path = partial_path(path);
        for stale in [path, partial_path.as_path()] {
            match fs::remove_file(stale).await {
                Ok(()) => log::info!("Deleted stale output {}", stale.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(TransformError::output(stale, e)),
            }
        }
        let properties = WriterProperties::builder()
            .set_compression(config.compression.into())
            .set_max_row_group_size(config.input.chunk_size.get())
            .build();
        Ok(Self {
            path: path.to_owned(),
            partial_path,
            columns,
            properties,
            output: None,
            started: false,
            rows: 0,
            chunks: 0,
            closed: false,
        })
    }

    /// Append a chunk of records to the output
    ///
    /// The output file is created when the first chunk arrives. Every chunk is
    /// written as its own row group, so no previously written data stays in
    /// memory.
    pub async fn write_chunk(&mut self, chunk: Chunk) -> TransformResult<()> {
        if self.output.is_none() {
            self.output = Some(self.open().await?);
        }
        let output = self.output.as_mut().expect("the output should have been opened above");
        let num_rows = chunk.len() as u64;
        let batch = output.to_record_batch(&chunk)?;
        let partial_path = &self.partial_path;
        let context = |e: parquet::errors::ParquetError| TransformError::output(partial_path, e);
        output.writer.write(&batch).await.map_err(context)?;
        output.writer.flush().await.map_err(context)?;
        self.rows += num_rows;
        self.chunks += 1;
        Ok(())
    }

    /// Number of rows written so far
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Finalize the output
    ///
    /// If no chunk was ever written, no output file is created.
    pub async fn finish(mut self) -> TransformResult<WriteOutcome> {
        let Some(output) = self.output.take() else {
            if self.started {
                // The output file was created but its encoder could not be
                // set up, dropping self discards it
                return Err(TransformError::output(
                    &self.partial_path,
                    "the output was never successfully opened",
                ));
            }
            self.closed = true;
            return Ok(WriteOutcome::Empty);
        };
        output
            .writer
            .close()
            .await
            .map_err(|e| TransformError::output(&self.partial_path, e))?;
        fs::rename(&self.partial_path, &self.path)
            .await
            .map_err(|e| TransformError::output(&self.path, e))?;
        self.closed = true;
        Ok(WriteOutcome::Written {
            path: self.path.clone(),
            rows: self.rows,
            chunks: self.chunks,
        })
    }

    /// Discard the output after a failure
    pub async fn abort(mut self) {
        self.closed = true;
        self.output = None;
        if self.started {
            if let Err(e) = fs::remove_file(&self.partial_path).await {
                log::error!(
                    "Failed to remove partial output {}: {e}",
                    self.partial_path.display()
                );
            }
        }
    }

    /// Create the output file and set up the Parquet encoder
    async fn open(&mut self) -> TransformResult<OpenOutput> {
        let schema = Schema::text(&self.columns);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransformError::output(parent, e))?;
        }
        let file = File::create(&self.partial_path)
            .await
            .map_err(|e| TransformError::output(&self.partial_path, e))?;
        self.started = true;
        let arrow_schema = schema.to_arrow();
        let writer =
            AsyncArrowWriter::try_new(file, arrow_schema.clone(), Some(self.properties.clone()))
                .map_err(|e| TransformError::output(&self.partial_path, e))?;
        log::debug!("Started writing {}", self.partial_path.display());
        Ok(OpenOutput {
            width: schema.width(),
            arrow_schema,
            writer,
        })
    }
}
//
impl Drop for ColumnarWriter {
    fn drop(&mut self) {
        self.output = None;
        if !self.closed && self.started {
            if let Err(e) = std::fs::remove_file(&self.partial_path) {
                log::error!(
                    "Failed to remove partial output {}: {e}",
                    self.partial_path.display()
                );
            }
        }
    }
}

/// Result of a successful dataset write
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WriteOutcome {
    /// The output file was finalized
    Written {
        /// Location of the output
        path: PathBuf,

        /// Number of rows
        rows: u64,

        /// Number of chunks (and thus row groups)
        chunks: u64,
    },

    /// The input had no record, no output was produced
    Empty,
}

/// Output file being written
struct OpenOutput {
    /// Number of declared columns
    width: usize,

    /// Arrow schema of the output
    arrow_schema: SchemaRef,

    /// Parquet encoder
    writer: AsyncArrowWriter<File>,
}
//
impl OpenOutput {
    /// Convert a chunk to Arrow's columnar layout
    fn to_record_batch(&self, chunk: &Chunk) -> TransformResult<RecordBatch> {
        let width = self.width;
        let first_row = chunk.first_row();
        let records = chunk.records();
        let mut columns = (0..width)
            .map(|_| StringBuilder::with_capacity(records.len(), 0))
            .collect::<Vec<_>>();
        for (offset, record) in records.iter().enumerate() {
            if record.len() != width {
                return Err(TransformError::SchemaMismatch {
                    row: first_row + offset as u64,
                    expected: width,
                    found: record.len(),
                });
            }
            for (column, cell) in columns.iter_mut().zip(record.iter()) {
                column.append_value(cell);
            }
        }
        let columns = (columns.into_iter())
            .map(|mut column| Arc::new(column.finish()) as ArrayRef)
            .collect::<Vec<_>>();
        RecordBatch::try_new(self.arrow_schema.clone(), columns).map_err(|e: ArrowError| {
            TransformError::Parse {
                reason: format!("assembling rows {first_row}.. into a columnar batch: {e}"),
            }
        })
    }
}

/// Location of an output file while it's being written
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Test helpers for inspecting outputs
#[cfg(test)]
pub(crate) mod testing {
    use arrow::array::{Array, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::path::Path;

    /// Read a Parquet file back as rows of text
    pub fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let file = std::fs::File::open(path).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch.unwrap();
            let columns = (batch.columns().iter())
                .map(|column| column.as_any().downcast_ref::<StringArray>().unwrap())
                .collect::<Vec<_>>();
            for row in 0..batch.num_rows() {
                rows.push(
                    columns
                        .iter()
                        .map(|column| {
                            assert!(!column.is_null(row));
                            column.value(row).to_owned()
                        })
                        .collect(),
                );
            }
        }
        rows
    }

    /// Column names of a Parquet file
    pub fn column_names(path: &Path) -> Vec<String> {
        let file = std::fs::File::open(path).unwrap();
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        (builder.schema().fields().iter())
            .map(|field| field.name().clone())
            .collect()
    }

    /// Number of row groups of a Parquet file
    pub fn num_row_groups(path: &Path) -> usize {
        let file = std::fs::File::open(path).unwrap();
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        builder.metadata().num_row_groups()
    }
}
