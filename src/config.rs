//! Processing pipeline configuration

use crate::Args;
use clap::ValueEnum;
use parquet::basic::{Compression, ZstdLevel};
use std::{
    fmt,
    num::NonZeroUsize,
    path::PathBuf,
    sync::Arc,
};

/// Final process configuration
///
/// This is the result of digesting [`Args`]. Please refer to [`Args`] to know
/// more about individual fields.
#[allow(missing_docs)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Directory where compressed archives are staged
    pub staging_dir: PathBuf,

    /// Directory where columnar outputs are written
    pub output_dir: PathBuf,

    /// Subset of the configuration that affects how input text is read
    pub input: InputConfig,

    /// Which archive member holds the data
    pub member: MemberSelection,

    // Other fields have the same meaning as in Args
    pub compression: OutputCompression,
    pub jobs: NonZeroUsize,
    pub progress_every: NonZeroUsize,
}
//
impl Config {
    /// Determine process configuration from CLI arguments
    pub(crate) fn new(args: &Args) -> Arc<Self> {
        let member = match &args.member_name {
            Some(name) => MemberSelection::Name(name.clone()),
            None => MemberSelection::Index(args.member_index),
        };
        Arc::new(Self {
            input: InputConfig {
                delimiter: args.delimiter,
                encoding: args.encoding,
                chunk_size: args.chunk_size,
            },
            member,
            compression: args.compression,
            jobs: args.jobs,
            progress_every: args.progress_every,
            ..Self::with_dirs(&args.staging_dir, &args.output_dir)
        })
    }

    /// Configuration with default settings, reading from `staging_dir` and
    /// writing into `output_dir`
    pub fn with_dirs(staging_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            output_dir: output_dir.into(),
            input: InputConfig::default(),
            member: MemberSelection::default(),
            compression: OutputCompression::default(),
            jobs: NonZeroUsize::MIN,
            progress_every: NonZeroUsize::new(10).expect("10 is not zero"),
        }
    }
}

/// Subset of the configuration that affects how delimited text is decoded
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct InputConfig {
    /// Field delimiter
    pub delimiter: u8,

    /// Text encoding of the source files
    pub encoding: TextEncoding,

    /// Maximal number of records per chunk
    pub chunk_size: NonZeroUsize,
}
//
impl Default for InputConfig {
    fn default() -> Self {
        Self {
            delimiter: b';',
            encoding: TextEncoding::Latin1,
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).expect("chunk size is not zero"),
        }
    }
}

/// Default number of records per chunk
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Text encoding of source files
///
/// Encodings are never detected, they are a fixed property of the data
/// source.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, ValueEnum)]
pub enum TextEncoding {
    /// ISO-8859-1, where every byte is the code point of the same value
    #[default]
    Latin1,

    /// UTF-8, invalid sequences are rejected
    Utf8,
}
//
impl TextEncoding {
    /// Decode the raw bytes of one field
    pub fn decode(self, bytes: &[u8]) -> Result<Box<str>, std::str::Utf8Error> {
        match self {
            Self::Latin1 => Ok(bytes.iter().copied().map(char::from).collect::<String>().into()),
            Self::Utf8 => std::str::from_utf8(bytes).map(Into::into),
        }
    }
}

/// Policy for picking the archive member that holds the data
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum MemberSelection {
    /// Member at this position in container order
    Index(usize),

    /// Member with this exact file name
    Name(Box<str>),
}
//
impl Default for MemberSelection {
    fn default() -> Self {
        Self::Index(0)
    }
}
//
impl fmt::Display for MemberSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(idx) => write!(f, "index {idx}"),
            Self::Name(name) => write!(f, "name {name:?}"),
        }
    }
}

/// Compression codec of the columnar output
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, ValueEnum)]
pub enum OutputCompression {
    /// No compression
    None,

    /// Snappy, fast with a modest ratio
    #[default]
    Snappy,

    /// Zstandard at its default level
    Zstd,
}
//
impl From<OutputCompression> for Compression {
    fn from(value: OutputCompression) -> Self {
        match value {
            OutputCompression::None => Compression::UNCOMPRESSED,
            OutputCompression::Snappy => Compression::SNAPPY,
            OutputCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
        }
    }
}
