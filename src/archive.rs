//! Access to the data member of a compressed archive

use crate::{
    config::MemberSelection,
    error::{TransformError, TransformResult},
};
use async_zip::tokio::read::seek::ZipFileReader;
use std::path::{Path, PathBuf};
use tokio::{
    fs::File,
    io::{AsyncRead, BufReader},
};
use tokio_util::compat::FuturesAsyncReadCompatExt;

/// Opened ZIP container
///
/// Only the central directory is read on opening, member data is decompressed
/// lazily as it is pulled from the stream returned by [`Archive::member()`].
pub struct Archive {
    /// Location of the container, for error reporting
    path: PathBuf,

    /// Underlying ZIP reader
    zip: ZipFileReader<BufReader<File>>,
}
//
impl Archive {
    /// Open a ZIP container
    pub async fn open(path: &Path) -> TransformResult<Self> {
        let corrupt = |reason: String| TransformError::CorruptArchive {
            path: path.to_owned(),
            reason,
        };
        let file = File::open(path).await.map_err(|e| corrupt(e.to_string()))?;
        let zip = ZipFileReader::with_tokio(BufReader::new(file))
            .await
            .map_err(|e| corrupt(e.to_string()))?;
        Ok(Self {
            path: path.to_owned(),
            zip,
        })
    }

    /// Truth that a file is a readable ZIP container
    pub async fn is_valid(path: &Path) -> bool {
        Self::open(path).await.is_ok()
    }

    /// Names of the members, in container order
    pub fn member_names(&self) -> Vec<Box<str>> {
        (self.zip.file().entries().iter())
            .map(|entry| entry.filename().as_str().unwrap_or("<non-UTF-8 name>").into())
            .collect()
    }

    /// Start reading the member selected by some policy
    ///
    /// If the archive has several members and they are selected by index,
    /// the requested one is used and a warning is logged.
    pub async fn member(
        &mut self,
        selection: &MemberSelection,
    ) -> TransformResult<(MemberInfo, impl AsyncRead + Unpin + Send + '_)> {
        let names = self.member_names();
        if names.is_empty() {
            return Err(TransformError::EmptyArchive {
                path: self.path.clone(),
            });
        }
        let index = match selection {
            MemberSelection::Index(idx) => {
                if names.len() > 1 {
                    log::warn!(
                        "{} has {} members, only using the one at {selection} ({:?})",
                        self.path.display(),
                        names.len(),
                        names.get(*idx),
                    );
                }
                (*idx < names.len()).then_some(*idx)
            }
            MemberSelection::Name(wanted) => names.iter().position(|name| name == wanted),
        }
        .ok_or_else(|| TransformError::MemberNotFound {
            path: self.path.clone(),
            selection: selection.to_string(),
        })?;

        let info = MemberInfo {
            name: names[index].clone(),
            uncompressed_size: self.zip.file().entries()[index].uncompressed_size(),
        };
        log::debug!("Reading member {info:?} of {}", self.path.display());
        let path = self.path.clone();
        let reader = self
            .zip
            .reader_without_entry(index)
            .await
            .map_err(|e| TransformError::CorruptArchive {
                path,
                reason: e.to_string(),
            })?;
        Ok((info, reader.compat()))
    }
}

/// Metadata about the archive member being read
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemberInfo {
    /// File name within the archive
    pub name: Box<str>,

    /// Size of the member once decompressed
    pub uncompressed_size: u64,
}

/// Test helpers for building archives on disk
#[cfg(test)]
pub(crate) mod testing {
    use std::{io::Write, path::Path};
    use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

    /// Write a deflated ZIP archive with the given (name, contents) members
    pub fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, contents) in members {
            zip.start_file(*name, options).unwrap();
            zip.write_all(contents).unwrap();
        }
        zip.finish().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::write_zip, *};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn read_member(path: &Path, selection: MemberSelection) -> TransformResult<String> {
        let mut archive = Archive::open(path).await?;
        let (_info, mut reader) = archive.member(&selection).await?;
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        Ok(out)
    }

    #[tokio::test]
    async fn reads_first_member_by_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.zip");
        write_zip(&path, &[("A.CSV", b"1;2\n".as_slice()), ("B.CSV", b"3;4\n".as_slice())]);
        let text = read_member(&path, MemberSelection::default()).await.unwrap();
        assert_eq!(text, "1;2\n");
    }

    #[tokio::test]
    async fn selects_member_by_name_or_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.zip");
        write_zip(&path, &[("A.CSV", b"1;2\n".as_slice()), ("B.CSV", b"3;4\n".as_slice())]);
        let by_name = read_member(&path, MemberSelection::Name("B.CSV".into()))
            .await
            .unwrap();
        assert_eq!(by_name, "3;4\n");
        let by_index = read_member(&path, MemberSelection::Index(1)).await.unwrap();
        assert_eq!(by_index, "3;4\n");
        let missing = read_member(&path, MemberSelection::Name("C.CSV".into())).await;
        assert!(matches!(missing, Err(TransformError::MemberNotFound { .. })));
        let missing = read_member(&path, MemberSelection::Index(2)).await;
        assert!(matches!(missing, Err(TransformError::MemberNotFound { .. })));
    }

    #[tokio::test]
    async fn reports_member_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.zip");
        write_zip(&path, &[("DATA.CSV", b"abc;def\n".as_slice())]);
        let mut archive = Archive::open(&path).await.unwrap();
        assert_eq!(archive.member_names(), vec![Box::<str>::from("DATA.CSV")]);
        let (info, _reader) = archive.member(&MemberSelection::default()).await.unwrap();
        assert_eq!(&*info.name, "DATA.CSV");
        assert_eq!(info.uncompressed_size, 8);
    }

    #[tokio::test]
    async fn empty_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.zip");
        write_zip(&path, &[]);
        let result = read_member(&path, MemberSelection::default()).await;
        assert!(matches!(result, Err(TransformError::EmptyArchive { .. })));
    }

    #[tokio::test]
    async fn corrupt_or_missing_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bogus.zip");
        std::fs::write(&path, b"definitely not a zip file").unwrap();
        assert!(matches!(
            Archive::open(&path).await,
            Err(TransformError::CorruptArchive { .. })
        ));
        assert!(!Archive::is_valid(&path).await);
        assert!(matches!(
            Archive::open(&dir.path().join("missing.zip")).await,
            Err(TransformError::CorruptArchive { .. })
        ));
    }
}
