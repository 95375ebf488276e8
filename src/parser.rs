//! Decoding of delimited text into bounded chunks of records

use crate::{
    config::InputConfig,
    error::{TransformError, TransformResult},
};
use csv_async::{AsyncReader, AsyncReaderBuilder, ByteRecord, ErrorKind};
use futures::Stream;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;

/// One row of the dataset, with one cell per declared column
pub type Record = Box<[Box<str>]>;

/// Bounded batch of consecutive records
///
/// Chunk boundaries carry no meaning, they only exist to bound memory usage.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Chunk {
    /// Index of the first record of this chunk within the input
    first_row: u64,

    /// Records, in input order
    records: Vec<Record>,
}
//
impl Chunk {
    /// Assemble a chunk from records starting at some input row
    pub fn new(first_row: u64, records: Vec<Record>) -> Self {
        Self { first_row, records }
    }

    /// Index of the first record of this chunk within the input
    pub fn first_row(&self) -> u64 {
        self.first_row
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Records of this chunk
    pub fn records(&self) -> &[Record] {
        &self.records[..]
    }

    /// Extract the records
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Pull-based reader of fixed-arity records from delimited text
///
/// Every physical line is one record, there is no header line. Records are
/// handed out in chunks of exactly `chunk_size` records except for the last
/// one, and only one chunk is materialized at a time. Once the input is
/// exhausted or an error occured, no further chunk is produced.
pub struct ChunkedParser<R> {
    /// Delimited text decoder
    reader: AsyncReader<R>,

    /// Input being decoded, for error reporting
    origin: PathBuf,

    /// Number of fields that every record must have
    arity: usize,

    /// Decoding configuration
    config: InputConfig,

    /// Reusable buffer for undecoded records
    buffer: ByteRecord,

    /// Number of records produced so far
    records_read: u64,

    /// Truth that the parser will not produce any further chunk
    done: bool,
}
//
impl<R: AsyncRead + Unpin + Send> ChunkedParser<R> {
    /// Prepare to decode records from some input stream
    pub fn new(input: R, origin: &Path, arity: usize, config: InputConfig) -> Self {
        let reader = AsyncReaderBuilder::new()
            .delimiter(config.delimiter)
            .has_headers(false)
            .flexible(true)
            .create_reader(input);
        Self {
            reader,
            origin: origin.to_owned(),
            arity,
            config,
            buffer: ByteRecord::new(),
            records_read: 0,
            done: false,
        }
    }

    /// Decode the next chunk of records, if any
    pub async fn next_chunk(&mut self) -> TransformResult<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }
        let result = self.fill_chunk().await;
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    /// Turn this parser into a stream of chunks
    ///
    /// Every chunk comes with the number of input bytes that were consumed
    /// once it was decoded.
    pub fn into_stream(self) -> impl Stream<Item = TransformResult<(Chunk, u64)>> {
        futures::stream::try_unfold(self, |mut parser| async move {
            let chunk = parser.next_chunk().await?;
            Ok::<_, TransformError>(chunk.map(|chunk| ((chunk, parser.bytes_read()), parser)))
        })
    }

    /// Number of input bytes that were consumed so far
    pub fn bytes_read(&self) -> u64 {
        self.reader.position().byte()
    }

    /// Read records until the chunk is full or the input is exhausted
    async fn fill_chunk(&mut self) -> TransformResult<Option<Chunk>> {
        let chunk_size = self.config.chunk_size.get();
        let first_row = self.records_read;
        let mut records = Vec::with_capacity(chunk_size.min(MAX_PREALLOCATED_RECORDS));
        while records.len() < chunk_size {
            let more = match self.reader.read_byte_record(&mut self.buffer).await {
                Ok(more) => more,
                Err(e) => return Err(self.framing_error(e)),
            };
            if !more {
                break;
            }
            records.push(self.decode_record()?);
            self.records_read += 1;
        }
        Ok((!records.is_empty()).then(|| Chunk::new(first_row, records)))
    }

    /// Check and decode the record that was just read
    fn decode_record(&self) -> TransformResult<Record> {
        let row = self.records_read;
        if self.buffer.len() != self.arity {
            return Err(TransformError::SchemaMismatch {
                row,
                expected: self.arity,
                found: self.buffer.len(),
            });
        }
        (self.buffer.iter())
            .map(|field| {
                self.config
                    .encoding
                    .decode(field)
                    .map_err(|e| TransformError::Decode {
                        row,
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    /// Translate a low-level decoding error
    fn framing_error(&self, e: csv_async::Error) -> TransformError {
        match e.kind() {
            ErrorKind::Io(io) => TransformError::CorruptArchive {
                path: self.origin.clone(),
                reason: io.to_string(),
            },
            _ => TransformError::Parse {
                reason: format!("after row {}: {e}", self.records_read),
            },
        }
    }
}

/// Chunks are usually full, but very large chunk sizes should not translate
/// into huge upfront allocations for small inputs
const MAX_PREALLOCATED_RECORDS: usize = 1 << 16;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TextEncoding;
    use futures::TryStreamExt;
    use std::num::NonZeroUsize;

    fn config(chunk_size: usize) -> InputConfig {
        InputConfig {
            chunk_size: NonZeroUsize::new(chunk_size).unwrap(),
            ..InputConfig::default()
        }
    }

    fn parser(text: &'static [u8], arity: usize, chunk_size: usize) -> ChunkedParser<&'static [u8]> {
        ChunkedParser::new(text, Path::new("test.zip"), arity, config(chunk_size))
    }

    fn cells(record: &Record) -> Vec<&str> {
        record.iter().map(|cell| &**cell).collect()
    }

    #[tokio::test]
    async fn first_line_is_data_and_empty_fields_are_kept() {
        let mut parser = parser(b"001;Acme Corp;;\n002;;Ltda;SP\n", 4, 10);
        let chunk = parser.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.first_row(), 0);
        assert_eq!(chunk.len(), 2);
        assert_eq!(cells(&chunk.records()[0]), ["001", "Acme Corp", "", ""]);
        assert_eq!(cells(&chunk.records()[1]), ["002", "", "Ltda", "SP"]);
        assert!(parser.next_chunk().await.unwrap().is_none());
        assert!(parser.next_chunk().await.unwrap().is_none());
        assert_eq!(parser.bytes_read(), 29);
    }

    #[tokio::test]
    async fn chunks_are_full_except_the_last() {
        let (chunks, positions): (Vec<_>, Vec<_>) = parser(b"1;a\n2;b\n3;c\n4;d\n5;e\n", 2, 2)
            .into_stream()
            .try_collect::<Vec<_>>()
            .await
            .unwrap()
            .into_iter()
            .unzip();
        assert_eq!(positions, [8, 16, 20]);
        let sizes = chunks.iter().map(Chunk::len).collect::<Vec<_>>();
        assert_eq!(sizes, [2, 2, 1]);
        let firsts = chunks.iter().map(Chunk::first_row).collect::<Vec<_>>();
        assert_eq!(firsts, [0, 2, 4]);
        assert_eq!(cells(&chunks[2].records()[0]), ["5", "e"]);
    }

    #[tokio::test]
    async fn missing_trailing_newline() {
        let mut parser = parser(b"1;a\n2;b", 2, 100);
        let chunk = parser.next_chunk().await.unwrap().unwrap();
        assert_eq!(chunk.len(), 2);
        assert_eq!(cells(&chunk.records()[1]), ["2", "b"]);
    }

    #[tokio::test]
    async fn empty_input_has_no_chunk() {
        let mut parser = parser(b"", 3, 100);
        assert!(parser.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_arity_is_fatal() {
        let mut parser = parser(b"1;a\n2;b\n3;c;extra\n4;d\n", 2, 2);
        assert_eq!(parser.next_chunk().await.unwrap().unwrap().len(), 2);
        match parser.next_chunk().await {
            Err(TransformError::SchemaMismatch {
                row,
                expected,
                found,
            }) => {
                assert_eq!((row, expected, found), (2, 2, 3));
            }
            other => panic!("expected a schema mismatch, got {other:?}"),
        }
        assert!(parser.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quoted_fields_may_contain_delimiters() {
        let mut parser = parser(b"\"1\";\"Rua A; 12\"\n", 2, 10);
        let chunk = parser.next_chunk().await.unwrap().unwrap();
        assert_eq!(cells(&chunk.records()[0]), ["1", "Rua A; 12"]);
    }

    #[tokio::test]
    async fn latin1_is_decoded() {
        let mut parser = parser(b"1;S\xc3O PAULO\n", 2, 10);
        let chunk = parser.next_chunk().await.unwrap().unwrap();
        assert_eq!(cells(&chunk.records()[0]), ["1", "S\u{c3}O PAULO"]);
    }

    #[tokio::test]
    async fn invalid_utf8_is_rejected() {
        let input: &'static [u8] = b"1;ok\n2;S\xc3O\n";
        let input_config = InputConfig {
            encoding: TextEncoding::Utf8,
            ..config(10)
        };
        let mut parser = ChunkedParser::new(input, Path::new("t.zip"), 2, input_config);
        assert!(matches!(
            parser.next_chunk().await,
            Err(TransformError::Decode { row: 1, .. })
        ));
    }
}
