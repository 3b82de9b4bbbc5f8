// src/transaction/mod.rs

//! Transaction engine
//!
//! A transaction takes a plan through a small state machine:
//!
//! ```text
//! PLANNED -> CONFIRMED -> EXECUTING -> COMPLETED
//!    |            \
//!    +- dry run    +- declined -> ABORTED (zero side effects)
//! ```
//!
//! Execution first ensures every Link step's archive is fetched, verified
//! and extracted (failing before anything touches the environment), then
//! runs the steps in plan order. A Link hardlinks (or copies) the extracted
//! tree into the prefix and commits the package's metadata record; an
//! Unlink removes the recorded files and then the metadata entry. A step
//! failure aborts the remaining plan and reports exactly which steps had
//! already committed; committed steps stay applied.

mod plan;

pub use plan::{PlanSummary, TransactionPlan, TransactionStep};

use crate::cache::PackageCache;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::fetch::{BatchMode, DownloadRequest, DownloadScheduler, HttpClient};
use crate::pool::Pool;
use crate::prefix::{PrefixData, PrefixRecord};
use crate::progress::TransferReporter;
use crate::record::PackageRecord;
use crate::solver::ResolvedSet;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Package-internal metadata directory that is never linked into a prefix
const PKG_INFO_DIR: &str = "info";

/// Transaction state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Plan computed; nothing touched
    Planned,
    /// Confirmation given; execution may start
    Confirmed,
    /// Steps are running
    Executing,
    /// Every step succeeded
    Completed,
    /// Declined before execution, or failed during it
    Aborted,
}

/// Yes/no confirmation hook supplied by the presentation layer
pub trait Prompter {
    fn confirm(&self, plan: &TransactionPlan) -> bool;
}

/// Accept every plan (the `always_yes` behavior, also handy in tests)
pub struct AcceptAll;

impl Prompter for AcceptAll {
    fn confirm(&self, _plan: &TransactionPlan) -> bool {
        true
    }
}

/// Decline every plan
pub struct DeclineAll;

impl Prompter for DeclineAll {
    fn confirm(&self, _plan: &TransactionPlan) -> bool {
        false
    }
}

/// What a finished (or aborted) execution did
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// Transaction identity, for logs and error correlation
    pub transaction_id: String,
    /// Descriptions of the steps that committed, in execution order
    pub committed: Vec<String>,
}

/// A planned set of changes to one environment
#[derive(Debug)]
pub struct Transaction {
    id: String,
    plan: TransactionPlan,
    state: TransactionState,
}

impl Transaction {
    /// Diff the resolved set against the installed snapshot (pure, no I/O)
    pub fn plan_from(pool: &Pool, resolved: &ResolvedSet, prefix: &PrefixData) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            plan: TransactionPlan::from_diff(pool, resolved, prefix),
            state: TransactionState::Planned,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn plan(&self) -> &TransactionPlan {
        &self.plan
    }

    /// Resolve the confirmation gate
    ///
    /// Returns true when execution may proceed. In dry-run mode the
    /// transaction stays `Planned` and never executes; an empty plan
    /// confirms trivially; `always_yes` skips the prompt. A decline
    /// aborts with zero side effects.
    pub fn confirm(&mut self, ctx: &Context, prompter: &dyn Prompter) -> Result<bool> {
        if self.state != TransactionState::Planned {
            return Err(Error::Config(format!(
                "cannot confirm a transaction in state {:?}",
                self.state
            )));
        }

        if ctx.dry_run {
            info!("dry run: stopping after planning");
            return Ok(false);
        }

        let accepted = self.plan.is_empty() || ctx.always_yes || prompter.confirm(&self.plan);
        if accepted {
            self.state = TransactionState::Confirmed;
        } else {
            info!("transaction declined; nothing was changed");
            self.state = TransactionState::Aborted;
        }
        Ok(accepted)
    }

    /// Run the plan against the target environment
    ///
    /// `prefix_data` must be the snapshot the plan was computed against;
    /// it is rewritten entry by entry as steps commit.
    pub fn execute(
        &mut self,
        ctx: &Context,
        cache: &PackageCache,
        client: &HttpClient,
        prefix_data: &mut PrefixData,
        reporter: &dyn TransferReporter,
    ) -> Result<ExecutionReport> {
        if self.state != TransactionState::Confirmed {
            return Err(Error::Config(format!(
                "cannot execute a transaction in state {:?}",
                self.state
            )));
        }
        self.state = TransactionState::Executing;

        if let Err(e) = self.prefetch(ctx, cache, client, reporter) {
            self.state = TransactionState::Aborted;
            return Err(e);
        }

        let steps: Vec<TransactionStep> = self.plan.steps().to_vec();
        let mut committed: Vec<String> = Vec::with_capacity(steps.len());
        for step in &steps {
            let result = match step {
                TransactionStep::Unlink(record) => unlink_package(prefix_data, record),
                TransactionStep::Link(record) => link_package(cache, client, prefix_data, record),
            };

            if let Err(e) = result {
                self.state = TransactionState::Aborted;
                warn!(
                    "transaction {} aborted at '{}' with {} step(s) committed",
                    self.id,
                    step.description(),
                    committed.len()
                );
                return Err(Error::Execution {
                    step: step.description(),
                    reason: e.to_string(),
                    committed: committed.len(),
                });
            }
            committed.push(step.description());
        }

        self.state = TransactionState::Completed;
        info!("transaction {} completed ({} step(s))", self.id, committed.len());
        Ok(ExecutionReport {
            transaction_id: self.id.clone(),
            committed,
        })
    }

    /// Fetch and verify every missing Link archive before any step runs
    ///
    /// Uses the bounded scheduler in fail-fast mode: a fetch or integrity
    /// failure surfaces here, before the environment is touched.
    fn prefetch(
        &self,
        ctx: &Context,
        cache: &PackageCache,
        client: &HttpClient,
        reporter: &dyn TransferReporter,
    ) -> Result<()> {
        let mut requests = Vec::new();
        for record in self.plan.link_records() {
            if cache.find_extracted(record).is_some() || cache.find_archive(record).is_some() {
                continue;
            }
            if record.url.is_empty() {
                return Err(Error::Fetch {
                    url: record.identity(),
                    reason: "record has no download URL".to_string(),
                });
            }

            let mut request = DownloadRequest::new(record.url.clone(), cache.archive_dest(record))
                .with_label(record.identity());
            if let Some(ref sha256) = record.sha256 {
                request = request.with_sha256(sha256.clone());
            } else if let Some(ref md5) = record.md5 {
                request = request.with_md5(md5.clone());
            }
            if let Some(size) = record.size {
                request = request.with_size(size);
            }
            requests.push(request);
        }

        if requests.is_empty() {
            return Ok(());
        }

        debug!("prefetching {} archive(s)", requests.len());
        let scheduler = DownloadScheduler::new(ctx.download_workers);
        scheduler.run(client, requests, BatchMode::FailFast, reporter)?;
        Ok(())
    }
}

/// Join a package-relative path onto the prefix, rejecting escapes
fn safe_join(prefix: &Path, relative: &Path) -> Result<PathBuf> {
    for component in relative.components() {
        match component {
            Component::Normal(_) => {}
            _ => {
                return Err(Error::Extract {
                    path: relative.to_path_buf(),
                    reason: "path would escape the target prefix".to_string(),
                });
            }
        }
    }
    Ok(prefix.join(relative))
}

/// Materialize one record into the prefix and commit its metadata
///
/// Files are hardlinked from the extracted package tree, falling back to a
/// copy across filesystems. The metadata record is written last; its
/// atomic rename is the step's commit point.
fn link_package(
    cache: &PackageCache,
    client: &HttpClient,
    prefix_data: &mut PrefixData,
    record: &PackageRecord,
) -> Result<()> {
    let source = cache.ensure_extracted(record, client)?;
    let prefix = prefix_data.prefix().to_path_buf();

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in walkdir::WalkDir::new(&source).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Extract {
            path: source.clone(),
            reason: format!("failed to walk extracted tree: {e}"),
        })?;
        let relative = entry
            .path()
            .strip_prefix(&source)
            .map_err(|e| Error::Extract {
                path: entry.path().to_path_buf(),
                reason: format!("not inside the extracted tree: {e}"),
            })?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        // The package's own metadata area stays in the cache
        if relative.components().next()
            == Some(Component::Normal(PKG_INFO_DIR.as_ref()))
        {
            continue;
        }

        let target = safe_join(&prefix, relative)?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if target.exists() || target.symlink_metadata().is_ok() {
            fs::remove_file(&target)?;
        }

        if file_type.is_symlink() {
            let link_target = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link_target, &target)?;
            #[cfg(not(unix))]
            fs::write(&target, link_target.to_string_lossy().as_bytes())?;
        } else if fs::hard_link(entry.path(), &target).is_err() {
            // Cross-filesystem: fall back to a plain copy
            fs::copy(entry.path(), &target)?;
        }

        files.push(relative.to_path_buf());
    }

    debug!("linked {} file(s) for {}", files.len(), record.identity());
    let mut prefix_record = PrefixRecord::new(record.clone(), files);
    prefix_record.extracted_package_dir = Some(source);
    prefix_data.insert(prefix_record)
}

/// Remove one installed package's files, then its metadata entry
///
/// Re-running after a partial failure is safe: already-removed files are
/// skipped. Emptied parent directories are pruned, deepest first.
fn unlink_package(prefix_data: &mut PrefixData, record: &PrefixRecord) -> Result<()> {
    let prefix = prefix_data.prefix().to_path_buf();

    let mut parents: BTreeSet<PathBuf> = BTreeSet::new();
    for relative in &record.files {
        let target = safe_join(&prefix, relative)?;
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("file already missing while unlinking: {}", target.display());
            }
            Err(e) => return Err(e.into()),
        }

        let mut dir = relative.parent();
        while let Some(d) = dir {
            if !d.as_os_str().is_empty() {
                parents.insert(d.to_path_buf());
            }
            dir = d.parent();
        }
    }

    // Deepest directories first; non-empty ones are left alone
    for relative in parents.iter().rev() {
        let dir = prefix.join(relative);
        if dir.is_dir() && fs::read_dir(&dir)?.next().is_none() {
            fs::remove_dir(&dir)?;
        }
    }

    debug!("unlinked {}", record.record.identity());
    prefix_data.remove(&record.record.name)?;
    Ok(())
}
