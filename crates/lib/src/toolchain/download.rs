use std::io::{self, Write};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DownloadError {
  #[error("failed to build HTTP client: {0}")]
  Client(#[source] reqwest::Error),

  #[error("request to {url} failed: {source}")]
  Http {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("{url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("downloaded file is empty")]
  Empty,

  #[error("size mismatch: expected {expected} bytes, got {actual}")]
  SizeMismatch { expected: u64, actual: u64 },

  #[error("checksum mismatch: expected {expected}, got {actual}")]
  ChecksumMismatch { expected: String, actual: String },

  #[error(transparent)]
  Io(#[from] io::Error),
}

/// Fetches a URL into a writer. Implementations must be shareable across
/// worker threads.
pub trait Downloader: Send + Sync {
  /// Streams the body of `url` into `sink`, returning the number of bytes written.
  fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, DownloadError>;
}

/// [`Downloader`] over blocking HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpDownloader {
  client: reqwest::blocking::Client,
}

impl HttpDownloader {
  pub fn new() -> Result<Self, DownloadError> {
    let client = reqwest::blocking::Client::builder()
      .user_agent(concat!("partkit/", env!("CARGO_PKG_VERSION")))
      .connect_timeout(Duration::from_secs(30))
      .timeout(Duration::from_secs(600))
      .build()
      .map_err(DownloadError::Client)?;
    Ok(Self { client })
  }
}

impl Downloader for HttpDownloader {
  fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, DownloadError> {
    debug!(url, "requesting");
    let mut response = self.client.get(url).send().map_err(|source| DownloadError::Http {
      url: url.to_string(),
      source,
    })?;

    let status = response.status();
    if !status.is_success() {
      return Err(DownloadError::Status {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }

    Ok(io::copy(&mut response, sink)?)
  }
}
