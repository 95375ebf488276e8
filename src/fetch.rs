//! Acquisition of compressed archives into the staging directory

use crate::{
    archive::Archive,
    catalog::DatasetSpec,
    progress::ProgressReport,
};
use futures::stream::StreamExt;
use reqwest::StatusCode;
use std::{
    future::Future,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio_util::io::StreamReader;

/// Default location of the monthly CNPJ open data releases
pub const DEFAULT_BASE_URL: &str =
    "https://arquivos.receitafederal.gov.br/dados/cnpj/dados_abertos_cnpj";

/// Reasons why an archive could not be made available
#[derive(Debug, Error)]
pub enum FetchError {
    /// The archive does not exist at its source, retrying will not help
    #[error("{location} does not exist")]
    NotFound { location: Box<str> },

    /// The archive could not be obtained this time
    #[error("failed to fetch {location}: {reason}")]
    Transient { location: Box<str>, reason: String },
}
//
impl FetchError {
    /// Truth that trying again later could succeed
    pub fn is_retrievable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Provider of dataset archives
pub trait Source {
    /// Make sure that a valid archive for `spec` is staged, return its path
    fn locate(&self, spec: &DatasetSpec) -> impl Future<Output = Result<PathBuf, FetchError>> + Send;
}

/// Source that only uses archives which are already staged
#[derive(Clone, Debug)]
pub struct Staged {
    /// Directory where archives are staged
    staging_dir: PathBuf,
}
//
impl Staged {
    /// Use archives from some staging directory
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }
}
//
impl Source for Staged {
    async fn locate(&self, spec: &DatasetSpec) -> Result<PathBuf, FetchError> {
        let path = self.staging_dir.join(&*spec.archive);
        if Archive::is_valid(&path).await {
            Ok(path)
        } else {
            Err(FetchError::NotFound {
                location: path.display().to_string().into(),
            })
        }
    }
}

/// Source that downloads archives from the remote release directory when
/// they are not staged yet
#[derive(Clone, Debug)]
pub struct Fetcher {
    /// HTTP client
    client: reqwest::Client,

    /// Release directory URL, without trailing slash
    release_url: Box<str>,

    /// Archives that are already staged are not downloaded again
    staged: Staged,

    /// Download progress display
    report: ProgressReport,
}
//
impl Fetcher {
    /// Download archives from `<base_url>/<period>/` into `staging_dir`
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        period: &str,
        staging_dir: impl Into<PathBuf>,
        report: ProgressReport,
    ) -> Self {
        Self {
            client,
            release_url: format!("{}/{period}", base_url.trim_end_matches('/')).into(),
            staged: Staged::new(staging_dir),
            report,
        }
    }

    /// URL of a dataset's archive
    pub fn url(&self, spec: &DatasetSpec) -> Box<str> {
        format!("{}/{}", self.release_url, spec.archive).into()
    }

    /// Download an archive to `path`
    async fn download(&self, url: &str, path: &Path) -> Result<(), FetchError> {
        let transient = |reason: String| FetchError::Transient {
            location: url.into(),
            reason,
        };

        // Start the download
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transient(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                location: url.into(),
            });
        }
        let response = response
            .error_for_status()
            .map_err(|e| transient(e.to_string()))?;
        log::info!("Downloading {url}");
        let bytes = self
            .report
            .bytes(url, response.content_length().unwrap_or(0));

        // Stream the body into a temporary file
        let partial = path.with_extension("zip.partial");
        let result: io::Result<()> = async {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).await?;
            }
            let mut file = File::create(&partial).await?;
            let body = StreamReader::new(response.bytes_stream().map(|res| {
                res
                    // Track how many bytes have been downloaded so far
                    .inspect(|block| {
                        bytes.advance(block.len() as u64);
                    })
                    // Translate reqwest errors into I/O errors
                    .map_err(|e| io::Error::new(ErrorKind::Other, Box::new(e)))
            }));
            let mut body = std::pin::pin!(body);
            tokio::io::copy(&mut body, &mut file).await?;
            file.sync_all().await
        }
        .await;
        drop(bytes);
        if let Err(e) = result {
            discard_partial(&partial).await;
            return Err(transient(e.to_string()));
        }

        // Only keep the download if it is a readable archive
        if !Archive::is_valid(&partial).await {
            discard_partial(&partial).await;
            return Err(transient("downloaded file is not a valid archive".into()));
        }
        fs::rename(&partial, path)
            .await
            .map_err(|e| transient(e.to_string()))
    }
}
//
impl Source for Fetcher {
    async fn locate(&self, spec: &DatasetSpec) -> Result<PathBuf, FetchError> {
        let path = self.staged.staging_dir.join(&*spec.archive);
        if Archive::is_valid(&path).await {
            log::info!("{} is already staged, not downloading it again", spec.archive);
            return Ok(path);
        }
        self.download(&self.url(spec), &path).await?;
        Ok(path)
    }
}

/// Remove an unusable download, logging any failure to do so
///
/// Returns truth that no file is left at `partial`.
async fn discard_partial(partial: &Path) -> bool {
    match fs::remove_file(partial).await {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            log::error!("Failed to remove partial download {}: {e}", partial.display());
            false
        }
    }
}
