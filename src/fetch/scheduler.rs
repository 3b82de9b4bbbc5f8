// src/fetch/scheduler.rs

//! Bounded-concurrency batch downloads
//!
//! The scheduler drives a set of download targets through a fixed-size
//! worker pool. Each target independently applies the client's retry
//! policy and is verified against its expected hash after landing; a hash
//! mismatch deletes the file and fails the target without any retry.
//!
//! `FailFast` mode stops dispatching new targets after the first hard
//! failure and reports that failure; `BestEffort` runs everything and
//! returns per-target outcomes.

use crate::error::{Error, Result};
use crate::hash;
use crate::progress::TransferReporter;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use super::HttpClient;

/// One download target
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub dest: PathBuf,
    /// Display name for progress and logs
    pub label: String,
    /// Expected SHA-256 digest, hex encoded
    pub sha256: Option<String>,
    /// Expected MD5, hex encoded; checked only when sha256 is absent
    pub md5: Option<String>,
    /// Expected size in bytes
    pub size: Option<u64>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, dest: PathBuf) -> Self {
        let url = url.into();
        let label = url.rsplit('/').next().unwrap_or(&url).to_string();
        Self {
            url,
            dest,
            label,
            sha256: None,
            md5: None,
            size: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        self.md5 = Some(md5.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    fn expected_hash(&self) -> Option<(&'static str, &str)> {
        if let Some(ref h) = self.sha256 {
            Some(("sha256", h.as_str()))
        } else {
            self.md5.as_deref().map(|h| ("md5", h))
        }
    }
}

/// Batch failure policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Abort the remaining batch on the first hard failure
    FailFast,
    /// Run every target and report per-target outcomes
    BestEffort,
}

/// Result of one target in a batch
#[derive(Debug)]
pub struct DownloadOutcome {
    pub label: String,
    pub url: String,
    pub status: OutcomeStatus,
}

/// Per-target completion status
#[derive(Debug)]
pub enum OutcomeStatus {
    /// Downloaded (or already present) and verified
    Done(PathBuf),
    Failed(Error),
    /// Not attempted because an earlier target hard-failed in FailFast mode
    Skipped,
}

impl DownloadOutcome {
    pub fn is_done(&self) -> bool {
        matches!(self.status, OutcomeStatus::Done(_))
    }
}

/// Bounded-concurrency download driver
pub struct DownloadScheduler {
    workers: usize,
}

impl DownloadScheduler {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Run a batch of downloads
    ///
    /// Returns the per-target outcomes in request order. In `FailFast`
    /// mode the first hard failure is returned as the batch error instead
    /// (in-flight targets finish; queued targets are skipped).
    pub fn run(
        &self,
        client: &HttpClient,
        requests: Vec<DownloadRequest>,
        mode: BatchMode,
        reporter: &dyn TransferReporter,
    ) -> Result<Vec<DownloadOutcome>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers.min(requests.len()))
            .build()
            .map_err(|e| Error::Config(format!("failed to create download worker pool: {e}")))?;

        let abort = AtomicBool::new(false);
        let outcomes: Vec<DownloadOutcome> = pool.install(|| {
            use rayon::prelude::*;

            requests
                .into_par_iter()
                .map(|request| {
                    if mode == BatchMode::FailFast && abort.load(Ordering::SeqCst) {
                        return DownloadOutcome {
                            label: request.label.clone(),
                            url: request.url,
                            status: OutcomeStatus::Skipped,
                        };
                    }

                    let label = request.label.clone();
                    let url = request.url.clone();
                    let status = match fetch_one(client, &request, reporter) {
                        Ok(path) => {
                            reporter.on_done(&label);
                            OutcomeStatus::Done(path)
                        }
                        Err(e) => {
                            warn!("download of {} failed: {}", label, e);
                            reporter.on_failed(&label, &e.to_string());
                            abort.store(true, Ordering::SeqCst);
                            OutcomeStatus::Failed(e)
                        }
                    };
                    DownloadOutcome { label, url, status }
                })
                .collect()
        });

        if mode == BatchMode::FailFast {
            let mut done = Vec::with_capacity(outcomes.len());
            for outcome in outcomes {
                match outcome.status {
                    OutcomeStatus::Failed(e) => return Err(e),
                    _ => done.push(outcome),
                }
            }
            return Ok(done);
        }

        Ok(outcomes)
    }
}

/// Download and verify a single target
///
/// A destination file that already exists and passes verification is
/// reused without touching the network.
fn fetch_one(
    client: &HttpClient,
    request: &DownloadRequest,
    reporter: &dyn TransferReporter,
) -> Result<PathBuf> {
    if request.dest.is_file() && verify_request(request).is_ok() {
        debug!("reusing existing download: {}", request.dest.display());
        return Ok(request.dest.clone());
    }

    client.download_file_with_reporter(&request.url, &request.dest, &request.label, reporter)?;

    if let Err(e) = verify_request(request) {
        // Remove the bad artifact so a later run cannot pick it up
        let _ = fs::remove_file(&request.dest);
        return Err(e);
    }

    Ok(request.dest.clone())
}

fn verify_request(request: &DownloadRequest) -> Result<()> {
    if let Some(expected) = request.size {
        let actual = fs::metadata(&request.dest)?.len();
        if actual != expected {
            return Err(Error::Integrity {
                path: request.dest.clone(),
                expected: format!("{expected} bytes"),
                actual: format!("{actual} bytes"),
            });
        }
    }

    if let Some((algorithm, expected)) = request.expected_hash() {
        hash::verify_file(&request.dest, algorithm, expected)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;
    use tempfile::TempDir;

    fn client() -> HttpClient {
        HttpClient::new(true, 0).unwrap()
    }

    #[test]
    fn test_batch_best_effort_partial() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/good.bin")
            .with_status(200)
            .with_body(b"data")
            .create();
        server.mock("GET", "/bad.bin").with_status(404).create();

        let tmp = TempDir::new().unwrap();
        let requests = vec![
            DownloadRequest::new(format!("{}/good.bin", server.url()), tmp.path().join("good.bin")),
            DownloadRequest::new(format!("{}/bad.bin", server.url()), tmp.path().join("bad.bin")),
        ];

        let outcomes = DownloadScheduler::new(2)
            .run(&client(), requests, BatchMode::BestEffort, &SilentReporter)
            .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_done());
        assert!(matches!(outcomes[1].status, OutcomeStatus::Failed(_)));
    }

    #[test]
    fn test_batch_fail_fast_returns_error() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/bad.bin").with_status(404).create();

        let tmp = TempDir::new().unwrap();
        let requests = vec![DownloadRequest::new(
            format!("{}/bad.bin", server.url()),
            tmp.path().join("bad.bin"),
        )];

        let err = DownloadScheduler::new(1)
            .run(&client(), requests, BatchMode::FailFast, &SilentReporter)
            .unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }

    #[test]
    fn test_hash_mismatch_removes_file() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/pkg.bin")
            .with_status(200)
            .with_body(b"content")
            .create();

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("pkg.bin");
        let requests = vec![
            DownloadRequest::new(format!("{}/pkg.bin", server.url()), dest.clone())
                .with_sha256("00".repeat(32)),
        ];

        let outcomes = DownloadScheduler::new(1)
            .run(&client(), requests, BatchMode::BestEffort, &SilentReporter)
            .unwrap();

        assert!(matches!(
            outcomes[0].status,
            OutcomeStatus::Failed(Error::Integrity { .. })
        ));
        assert!(!dest.exists());
    }

    #[test]
    fn test_existing_verified_file_reused() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/pkg.bin")
            .with_status(200)
            .expect(0)
            .create();

        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("pkg.bin");
        std::fs::write(&dest, b"abc").unwrap();

        let requests = vec![
            DownloadRequest::new(format!("{}/pkg.bin", server.url()), dest.clone()).with_sha256(
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
            ),
        ];

        let outcomes = DownloadScheduler::new(1)
            .run(&client(), requests, BatchMode::BestEffort, &SilentReporter)
            .unwrap();

        mock.assert();
        assert!(outcomes[0].is_done());
    }

    #[test]
    fn test_size_check() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/pkg.bin")
            .with_status(200)
            .with_body(b"1234")
            .create();

        let tmp = TempDir::new().unwrap();
        let requests = vec![
            DownloadRequest::new(format!("{}/pkg.bin", server.url()), tmp.path().join("pkg.bin"))
                .with_size(99),
        ];

        let outcomes = DownloadScheduler::new(1)
            .run(&client(), requests, BatchMode::BestEffort, &SilentReporter)
            .unwrap();
        assert!(matches!(
            outcomes[0].status,
            OutcomeStatus::Failed(Error::Integrity { .. })
        ));
    }
}
