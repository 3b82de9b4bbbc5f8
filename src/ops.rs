// src/ops.rs

//! End-to-end driver for one invocation
//!
//! Wires the components together in the order the design requires: load
//! all channel metadata (bounded concurrency, all-or-fail), snapshot the
//! target prefix, assemble the pool, solve, plan, confirm, execute. The
//! caller supplies the confirmation hook and progress sink; everything
//! else comes from the [`Context`].

use crate::cache::PackageCache;
use crate::context::Context;
use crate::error::Result;
use crate::fetch::HttpClient;
use crate::index;
use crate::pool::Pool;
use crate::prefix::PrefixData;
use crate::progress::TransferReporter;
use crate::solver::{self, Job, SolveOptions};
use crate::transaction::{ExecutionReport, Prompter, Transaction, TransactionState};
use tracing::{debug, info};

/// What one invocation did
#[derive(Debug)]
pub struct ApplyOutcome {
    /// The plan as shown to the user (honors the `json` flag)
    pub rendering: String,
    /// Final transaction state: `Planned` for dry runs, `Aborted` on
    /// decline, `Completed` on success
    pub state: TransactionState,
    /// Execution details; absent when nothing was executed
    pub report: Option<ExecutionReport>,
}

impl ApplyOutcome {
    pub fn executed(&self) -> bool {
        self.report.is_some()
    }
}

/// Resolve and apply the requested jobs against the context's target
/// prefix
///
/// A missing target prefix is treated as an empty environment and created
/// on demand by the first Link step. Errors before confirmation leave the
/// disk untouched.
pub fn apply(
    ctx: &Context,
    jobs: &[Job],
    prompter: &dyn Prompter,
    reporter: &dyn TransferReporter,
) -> Result<ApplyOutcome> {
    ctx.validate(true)?;

    let client = HttpClient::from_context(ctx)?;
    let indexes = index::load_all(ctx, &client)?;
    debug!("loaded {} subdir index(es)", indexes.len());

    let mut prefix_data = if ctx.target_prefix.is_dir() {
        PrefixData::load(&ctx.target_prefix)?
    } else {
        PrefixData::empty(&ctx.target_prefix)
    };

    let pool = Pool::from_indexes(indexes, prefix_data.package_records());
    let resolved = solver::solve(
        &pool,
        jobs,
        SolveOptions {
            allow_downgrade: ctx.allow_downgrade,
        },
    )?;

    let mut transaction = Transaction::plan_from(&pool, &resolved, &prefix_data);
    let rendering = transaction.plan().render(ctx.json);

    if !transaction.confirm(ctx, prompter)? {
        return Ok(ApplyOutcome {
            rendering,
            state: transaction.state(),
            report: None,
        });
    }

    let cache = PackageCache::from_context(ctx)?;
    let report = transaction.execute(ctx, &cache, &client, &mut prefix_data, reporter)?;
    info!(
        "applied {} change(s) to {}",
        report.committed.len(),
        ctx.target_prefix.display()
    );

    Ok(ApplyOutcome {
        rendering,
        state: transaction.state(),
        report: Some(report),
    })
}
