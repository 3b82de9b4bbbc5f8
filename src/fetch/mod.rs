// src/fetch/mod.rs

//! HTTP fetching
//!
//! A wrapper around reqwest's blocking client with retry support for
//! transient failures, conditional requests for repodata refresh, and
//! atomic file downloads (temp file + rename, so a torn download never
//! lands at the destination path).
//!
//! Retry policy: transport errors and 5xx responses are retried with a
//! linear backoff up to the configured budget; 4xx responses fail
//! immediately and are never retried.

mod scheduler;

pub use scheduler::{BatchMode, DownloadOutcome, DownloadRequest, DownloadScheduler, OutcomeStatus};

use crate::context::Context;
use crate::error::{Error, Result};
use crate::progress::TransferReporter;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry delay unit in milliseconds; attempt N sleeps N units
const RETRY_DELAY_MS: u64 = 1000;

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Validators stored alongside a cache file for conditional refetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheValidators {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Outcome of a conditional fetch
#[derive(Debug)]
pub enum ConditionalFetch {
    /// Server confirmed the cached payload is still current
    NotModified,
    /// Fresh payload with the validators to store for next time
    Fetched {
        body: Vec<u8>,
        validators: CacheValidators,
    },
}

/// HTTP client wrapper with retry support
pub struct HttpClient {
    client: Client,
    retries: u32,
}

impl HttpClient {
    /// Create a new client
    ///
    /// With `ssl_verify` off, certificate validation is disabled; that is
    /// an explicit operator decision, so it is logged as a warning.
    pub fn new(ssl_verify: bool, retries: u32) -> Result<Self> {
        if !ssl_verify {
            warn!("SSL certificate verification is disabled");
        }
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(!ssl_verify)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, retries })
    }

    /// Create a client configured from a context
    pub fn from_context(ctx: &Context) -> Result<Self> {
        Self::new(ctx.ssl_verify, ctx.fetch_retries)
    }

    /// Issue a GET with the retry policy applied
    fn get_with_retry(&self, url: &str, validators: Option<&CacheValidators>) -> Result<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut request = self.client.get(url);
            if let Some(v) = validators {
                if let Some(ref etag) = v.etag {
                    request = request.header(IF_NONE_MATCH, etag);
                }
                if let Some(ref modified) = v.last_modified {
                    request = request.header(IF_MODIFIED_SINCE, modified);
                }
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || status == StatusCode::NOT_MODIFIED {
                        return Ok(response);
                    }
                    if status.is_client_error() {
                        // 4xx is authoritative; retrying cannot help
                        return Err(Error::Fetch {
                            url: url.to_string(),
                            reason: format!("HTTP {status}"),
                        });
                    }
                    if attempt > self.retries {
                        return Err(Error::Fetch {
                            url: url.to_string(),
                            reason: format!("HTTP {status} after {attempt} attempts"),
                        });
                    }
                    warn!("fetch attempt {} got HTTP {}, retrying: {}", attempt, status, url);
                }
                Err(e) => {
                    if attempt > self.retries {
                        return Err(Error::Fetch {
                            url: url.to_string(),
                            reason: format!("{e} after {attempt} attempts"),
                        });
                    }
                    warn!("fetch attempt {} failed: {}, retrying: {}", attempt, e, url);
                }
            }

            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
        }
    }

    /// Fetch a resource, honoring stored validators
    ///
    /// Sends If-None-Match / If-Modified-Since when validators are given;
    /// a 304 response maps to [`ConditionalFetch::NotModified`]. A full
    /// response returns the body together with the validators to persist.
    pub fn fetch_conditional(
        &self,
        url: &str,
        validators: Option<&CacheValidators>,
    ) -> Result<ConditionalFetch> {
        let mut response = self.get_with_retry(url, validators)?;

        if response.status() == StatusCode::NOT_MODIFIED {
            debug!("not modified: {}", url);
            return Ok(ConditionalFetch::NotModified);
        }

        let header_str = |name| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let etag = header_str(ETAG);
        let last_modified = header_str(LAST_MODIFIED);

        let mut body = Vec::new();
        response.read_to_end(&mut body).map_err(|e| Error::Fetch {
            url: url.to_string(),
            reason: format!("failed to read response body: {e}"),
        })?;

        info!("fetched {} ({} bytes)", url, body.len());
        Ok(ConditionalFetch::Fetched {
            body,
            validators: CacheValidators {
                url: url.to_string(),
                etag,
                last_modified,
                fetched_at: Utc::now(),
            },
        })
    }

    /// Download a URL to a file, atomically
    pub fn download_file(&self, url: &str, dest: &Path) -> Result<()> {
        self.download_file_with_reporter(url, dest, url, &crate::progress::SilentReporter)
    }

    /// Download a URL to a file, reporting progress under `label`
    ///
    /// Streams into a temp file in the destination directory and renames
    /// into place on success. Emits `on_start`/`on_advance` only; the
    /// caller owns the completion events, so post-download verification can
    /// still fail the transfer.
    pub fn download_file_with_reporter(
        &self,
        url: &str,
        dest: &Path,
        label: &str,
        reporter: &dyn TransferReporter,
    ) -> Result<()> {
        let parent = dest.parent().ok_or_else(|| {
            Error::Config(format!("download destination has no parent: {}", dest.display()))
        })?;
        fs::create_dir_all(parent)?;

        let mut response = self.get_with_retry(url, None)?;
        let total = response.content_length();
        reporter.on_start(label, total);

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        let mut downloaded: u64 = 0;
        let mut buffer = [0u8; STREAM_BUFFER_SIZE];
        loop {
            let n = response.read(&mut buffer).map_err(|e| Error::Fetch {
                url: url.to_string(),
                reason: format!("failed to read response: {e}"),
            })?;
            if n == 0 {
                break;
            }
            temp.write_all(&buffer[..n])?;
            downloaded += n as u64;
            reporter.on_advance(label, downloaded);
        }
        temp.flush()?;

        temp.persist(dest).map_err(|e| e.error)?;
        debug!("downloaded {} to {} ({} bytes)", url, dest.display(), downloaded);
        Ok(())
    }
}
