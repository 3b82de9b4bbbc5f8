// src/lib.rs

//! Pangolin package manager core
//!
//! Channel-based environment and package management: multi-channel
//! metadata with conditional caching, SAT-based dependency resolution,
//! and link/unlink transactions against a target prefix.
//!
//! # Architecture
//!
//! - Explicit configuration: one [`Context`] per invocation, no globals
//! - Arena pool: records owned by value, cross-references are indices
//! - Plan before touching disk: transactions diff, confirm, then execute
//! - Atomic commits: cache publication and prefix metadata writes are
//!   rename-into-place
//!
//! The command-line surface, shell activation and output formatting live
//! outside this crate; [`ops::apply`] is the boundary they drive.

pub mod cache;
pub mod channel;
pub mod context;
mod error;
pub mod fetch;
pub mod hash;
pub mod index;
pub mod matchspec;
pub mod ops;
pub mod pool;
pub mod prefix;
pub mod progress;
pub mod record;
pub mod solver;
pub mod transaction;
pub mod version;

pub use cache::PackageCache;
pub use channel::{Channel, Platform};
pub use context::Context;
pub use error::{Error, Result};
pub use matchspec::MatchSpec;
pub use ops::{ApplyOutcome, apply};
pub use pool::{Pool, Priority, RecordId, RepoId};
pub use prefix::{PrefixData, PrefixRecord};
pub use record::PackageRecord;
pub use solver::{Conflict, Job, ResolvedSet, SolveOptions, solve};
pub use transaction::{
    AcceptAll, DeclineAll, ExecutionReport, Prompter, Transaction, TransactionPlan,
    TransactionState, TransactionStep,
};
pub use version::{Version, VersionSpec};
