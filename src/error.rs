// src/error.rs

//! Crate-wide error type and result alias
//!
//! Errors are grouped the way the boundary layer needs to act on them:
//! configuration problems are fatal before any I/O, fetch problems may fall
//! back to cached data, integrity failures are never retried, solver
//! conflicts abort without touching disk, and execution failures report
//! exactly which steps committed. The core never exits the process; exit
//! code mapping is the caller's job.

use std::path::PathBuf;
use thiserror::Error;

use crate::solver::Conflict;

/// All errors produced by this crate
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid root/target environment, bad channel list, etc.
    /// Raised before any filesystem or network I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network failure after the retry budget is exhausted, or a client
    /// error response that is never retried.
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Hash mismatch on a downloaded artifact. Never retried silently.
    #[error("integrity check failed for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The solver cannot satisfy the requested jobs.
    #[error("cannot satisfy requested changes: {0}")]
    Conflict(Conflict),

    /// A link/unlink step failed mid-transaction. Lists the steps that had
    /// already committed; those remain applied.
    #[error("transaction step '{step}' failed: {reason} ({committed} step(s) already committed)")]
    Execution {
        step: String,
        reason: String,
        committed: usize,
    },

    /// Offline mode is active and no usable cache entry exists.
    #[error("offline mode: no cached metadata for {0}")]
    Offline(String),

    /// Malformed version string.
    #[error("invalid version '{input}': {reason}")]
    InvalidVersion { input: String, reason: String },

    /// Malformed match specification.
    #[error("invalid match spec '{input}': {reason}")]
    InvalidMatchSpec { input: String, reason: String },

    /// Malformed repodata or prefix metadata.
    #[error("parse error: {0}")]
    Parse(String),

    /// Archive could not be unpacked.
    #[error("failed to extract {path}: {reason}")]
    Extract { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors that occur before the transaction is confirmed and
    /// therefore guarantee that nothing was written to the environment.
    pub fn is_pre_execution(&self) -> bool {
        !matches!(self, Self::Execution { .. })
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;
