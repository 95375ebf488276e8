//! This program converts the bulk datasets of the Brazilian federal revenue
//! service's CNPJ open data release, which are published as ZIP-compressed
//! semicolon-delimited text files, into Parquet files. You can find the
//! release at <https://arquivos.receitafederal.gov.br/dados/cnpj/>.

mod archive;
mod catalog;
mod config;
mod error;
mod fetch;
mod normalize;
mod orchestrator;
mod parser;
mod progress;
mod schema;
mod writer;

use crate::{
    catalog::Catalog,
    config::{Config, OutputCompression, TextEncoding},
    fetch::{Fetcher, Staged, DEFAULT_BASE_URL},
    progress::ProgressReport,
};
use clap::Parser;
use log::LevelFilter;
use std::{
    num::NonZeroUsize,
    path::PathBuf,
    process::ExitCode,
};

/// Convert CNPJ open data archives into Parquet files
///
/// Every dataset is read from a ZIP archive in the staging directory (which
/// is downloaded first unless it is already there), cleaned up, and written
/// as one Parquet file in the output directory. Missing values (empty cells,
/// whitespace and "nan") are written as the text "Não informado".
#[derive(Parser, Debug)]
#[command(version, author)]
struct Args {
    /// Archive names of the datasets to be processed, e.g. "Empresas0.zip"
    ///
    /// All datasets from the catalogue are processed if not specified.
    #[arg(short, long, value_delimiter = ',')]
    datasets: Vec<Box<str>>,

    /// JSON catalogue of dataset layouts, mapping archive names to their
    /// column names
    ///
    /// The built-in layout of the CNPJ release is used if not specified.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Directory where compressed archives are downloaded
    #[arg(long, default_value = "data/bronze")]
    staging_dir: PathBuf,

    /// Directory where Parquet files are written
    #[arg(short, long, default_value = "data/silver")]
    output_dir: PathBuf,

    /// Number of records per chunk
    ///
    /// Records are read, cleaned up and written in chunks of this size, and
    /// every chunk becomes one Parquet row group. Memory usage is proportional
    /// to this size, regardless of how large the dataset is.
    #[arg(long, default_value = "100000")]
    chunk_size: NonZeroUsize,

    /// Field delimiter of the source files
    #[arg(long, default_value = ";", value_parser = parse_delimiter)]
    delimiter: u8,

    /// Text encoding of the source files
    #[arg(long, value_enum, default_value_t)]
    encoding: TextEncoding,

    /// Position of the data member within each archive
    ///
    /// Archives of the CNPJ release contain a single member.
    #[arg(long, default_value_t = 0, conflicts_with = "member_name")]
    member_index: usize,

    /// Name of the data member within each archive
    #[arg(long)]
    member_name: Option<Box<str>>,

    /// Compression codec of the Parquet files
    #[arg(long, value_enum, default_value_t)]
    compression: OutputCompression,

    /// Number of datasets to process concurrently
    ///
    /// Concurrent datasets share one task: their downloads and file I/O
    /// overlap, but Parquet encoding of different datasets does not run in
    /// parallel. Cell cleanup of every chunk is parallel regardless.
    #[arg(short, long, default_value = "1")]
    jobs: NonZeroUsize,

    /// Log a progress message every time this many chunks were written
    #[arg(long, default_value = "10")]
    progress_every: NonZeroUsize,

    /// Only use archives which are already staged, never download anything
    #[arg(long)]
    offline: bool,

    /// Monthly release to download from, in YYYY-MM format
    ///
    /// Defaults to the current month.
    #[arg(short, long)]
    period: Option<Box<str>>,

    /// Base URL of the monthly releases
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: Box<str>,
}
//
impl Args {
    /// Decode and validate CLI arguments
    pub fn parse_and_check() -> Result<Self> {
        // Decode CLI arguments
        let args = Args::parse();

        // Check CLI arguments for basic sanity
        if let Some(period) = &args.period {
            anyhow::ensure!(
                chrono::NaiveDate::parse_from_str(&format!("{period}-01"), "%Y-%m-%d").is_ok(),
                "release period {period:?} is not in YYYY-MM format"
            );
        }
        Ok(args)
    }

    /// Monthly release to download from
    pub fn period(&self) -> Box<str> {
        self.period
            .clone()
            .unwrap_or_else(|| chrono::Local::now().format("%Y-%m").to_string().into())
    }

    /// Datasets to be processed
    pub fn catalog(&self) -> Result<Catalog> {
        let catalog = match &self.catalog {
            Some(path) => Catalog::from_json(path)?,
            None => Catalog::cnpj(),
        };
        if self.datasets.is_empty() {
            Ok(catalog)
        } else {
            catalog.select(&self.datasets)
        }
    }
}
//
#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Set up logging
    setup_logging().map_err(|e| anyhow::format_err!("{e}"))?;

    // Decode CLI arguments
    let args = Args::parse_and_check()?;
    let catalog = args.catalog()?;
    let config = Config::new(&args);

    // Set up progress reporting
    let report = ProgressReport::new();

    // Transform every dataset, downloading archives as needed
    let batch = if args.offline {
        let source = Staged::new(&config.staging_dir);
        orchestrator::run_all(config.clone(), &catalog, &source, &report).await
    } else {
        let source = Fetcher::new(
            reqwest::Client::new(),
            &args.base_url,
            &args.period(),
            &config.staging_dir,
            report.clone(),
        );
        orchestrator::run_all(config.clone(), &catalog, &source, &report).await
    };

    // Report overall status to the caller
    for dataset in batch.datasets() {
        println!("{}: {}", dataset.archive, dataset.outcome);
    }
    if batch.success() {
        log::info!("All {} datasets were processed", batch.datasets().len());
        Ok(ExitCode::SUCCESS)
    } else {
        log::error!(
            "{} out of {} datasets could not be processed",
            batch.num_failures(),
            batch.datasets().len()
        );
        Ok(ExitCode::FAILURE)
    }
}

/// Use anyhow for Result type erasure
pub use anyhow::Result;

/// Parse a single-byte field delimiter
fn parse_delimiter(s: &str) -> Result<u8> {
    match s.as_bytes() {
        [byte] => Ok(*byte),
        _ => anyhow::bail!("the delimiter must be a single ASCII character"),
    }
}

/// Set up logging
fn setup_logging() -> syslog::Result<()> {
    syslog::init(
        syslog::Facility::LOG_USER,
        if cfg!(feature = "log-trace") {
            LevelFilter::Trace
        } else if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_parsing() {
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert_eq!(parse_delimiter("\t").unwrap(), b'\t');
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter(";;").is_err());
        assert!(parse_delimiter("é").is_err());
    }

    #[test]
    fn cli_arguments_become_config() {
        let args = Args::try_parse_from([
            "cnpj-silver",
            "--datasets",
            "Cnaes.zip,Paises.zip",
            "--chunk-size",
            "500",
            "--encoding",
            "utf8",
            "--member-name",
            "DATA.CSV",
            "--jobs",
            "2",
            "--period",
            "2024-05",
        ])
        .unwrap();
        let config = Config::new(&args);
        assert_eq!(config.input.chunk_size.get(), 500);
        assert_eq!(config.input.delimiter, b';');
        assert_eq!(config.input.encoding, TextEncoding::Utf8);
        assert_eq!(
            config.member,
            config::MemberSelection::Name("DATA.CSV".into())
        );
        assert_eq!(config.jobs.get(), 2);
        assert_eq!(config.staging_dir, PathBuf::from("data/bronze"));
        assert_eq!(&*args.period(), "2024-05");
        let catalog = args.catalog().unwrap();
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn member_selectors_are_exclusive() {
        let result = Args::try_parse_from([
            "cnpj-silver",
            "--member-index",
            "1",
            "--member-name",
            "DATA.CSV",
        ]);
        assert!(result.is_err());
    }
}
