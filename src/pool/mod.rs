// src/pool/mod.rs

//! In-memory aggregation of records for one resolution run
//!
//! The [`Pool`] is an arena: it owns every [`PackageRecord`] by value and
//! all cross-references are plain indices ([`RecordId`], [`RepoId`]). A
//! [`Repo`] is a prioritized slice of the arena from one provenance — a
//! channel+platform subdir or the installed environment. Pools are built
//! per invocation and discarded after the transaction is planned; nothing
//! here is persisted.

use crate::index::SubdirIndex;
use crate::record::PackageRecord;
use std::collections::HashMap;

/// Name of the synthetic repo holding the installed snapshot
pub const INSTALLED_REPO: &str = "installed";

/// Index of a record in the pool arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub usize);

/// Index of a repo in the pool arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId(pub usize);

/// Repo ordering rank; lower compares as preferred
///
/// `rank` is the channel's position in the configured channel list,
/// `subrank` the platform's position within the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority {
    pub rank: u32,
    pub subrank: u32,
}

impl Priority {
    /// Priority of the installed repo: never preferred over a channel
    pub fn installed() -> Self {
        Self {
            rank: u32::MAX,
            subrank: 0,
        }
    }
}

/// A named, prioritized collection of records from one provenance
#[derive(Debug)]
pub struct Repo {
    pub name: String,
    pub priority: Priority,
    /// True for the installed-environment snapshot repo
    pub installed: bool,
    records: Vec<RecordId>,
}

impl Repo {
    pub fn records(&self) -> &[RecordId] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Owns all repos and records for one resolution run
#[derive(Debug, Default)]
pub struct Pool {
    records: Vec<PackageRecord>,
    record_repo: Vec<RepoId>,
    repos: Vec<Repo>,
    by_name: HashMap<String, Vec<RecordId>>,
    installed_repo: Option<RepoId>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a repo and take ownership of its records
    pub fn add_repo(
        &mut self,
        name: impl Into<String>,
        priority: Priority,
        records: Vec<PackageRecord>,
    ) -> RepoId {
        self.insert_repo(name.into(), priority, false, records)
    }

    /// Add the installed-environment snapshot as a repo
    ///
    /// There is at most one; records from it are preferred by the solver's
    /// stability tie-break, not by repo priority.
    pub fn add_installed_repo(&mut self, records: Vec<PackageRecord>) -> RepoId {
        let id = self.insert_repo(
            INSTALLED_REPO.to_string(),
            Priority::installed(),
            true,
            records,
        );
        self.installed_repo = Some(id);
        id
    }

    fn insert_repo(
        &mut self,
        name: String,
        priority: Priority,
        installed: bool,
        records: Vec<PackageRecord>,
    ) -> RepoId {
        let repo_id = RepoId(self.repos.len());
        let mut ids = Vec::with_capacity(records.len());
        let mut touched = Vec::new();

        for record in records {
            let record_id = RecordId(self.records.len());
            let key = record.name.clone();
            self.records.push(record);
            self.record_repo.push(repo_id);
            self.by_name.entry(key.clone()).or_default().push(record_id);
            touched.push(key);
            ids.push(record_id);
        }

        self.repos.push(Repo {
            name,
            priority,
            installed,
            records: ids,
        });

        // Keep candidate lists ordered by repo priority, then arena order,
        // regardless of repo insertion order
        let repos = &self.repos;
        let record_repo = &self.record_repo;
        for key in touched {
            if let Some(candidates) = self.by_name.get_mut(&key) {
                candidates.sort_by_key(|&id| (repos[record_repo[id.0].0].priority, id));
            }
        }

        repo_id
    }

    pub fn record(&self, id: RecordId) -> &PackageRecord {
        &self.records[id.0]
    }

    pub fn repo(&self, id: RepoId) -> &Repo {
        &self.repos[id.0]
    }

    pub fn repo_of(&self, id: RecordId) -> RepoId {
        self.record_repo[id.0]
    }

    pub fn priority_of(&self, id: RecordId) -> Priority {
        self.repos[self.repo_of(id).0].priority
    }

    /// True when the record comes from the installed snapshot
    pub fn is_installed(&self, id: RecordId) -> bool {
        self.repos[self.repo_of(id).0].installed
    }

    /// Candidate records for a package name, best priority first
    pub fn candidates(&self, name: &str) -> &[RecordId] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The installed record for a name, if any
    pub fn installed_record(&self, name: &str) -> Option<RecordId> {
        self.candidates(name)
            .iter()
            .copied()
            .find(|&id| self.is_installed(id))
    }

    /// All records of the installed snapshot repo
    pub fn installed_records(&self) -> Vec<RecordId> {
        match self.installed_repo {
            Some(repo) => self.repos[repo.0].records.clone(),
            None => Vec::new(),
        }
    }

    /// All package names known to the pool, sorted
    pub fn package_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn repo_count(&self) -> usize {
        self.repos.len()
    }

    /// Assemble a pool from loaded subdir indexes plus the installed
    /// snapshot records
    ///
    /// Repos get priorities from the order the indexes appear in: the
    /// first channel seen gets the best rank, platforms within a channel
    /// are subranked in order.
    pub fn from_indexes(
        indexes: impl IntoIterator<Item = SubdirIndex>,
        installed: Vec<PackageRecord>,
    ) -> Self {
        let mut pool = Self::new();

        let mut channel_ranks: HashMap<String, u32> = HashMap::new();
        let mut channel_counts: HashMap<String, u32> = HashMap::new();
        for index in indexes {
            let channel_name = index.channel().name.clone();
            let next_rank = channel_ranks.len() as u32;
            let rank = *channel_ranks.entry(channel_name.clone()).or_insert(next_rank);
            let subrank_slot = channel_counts.entry(channel_name).or_insert(0);
            let priority = Priority {
                rank,
                subrank: *subrank_slot,
            };
            *subrank_slot += 1;

            pool.add_repo(index.subdir_id(), priority, index.into_records());
        }

        pool.add_installed_repo(installed);
        pool
    }
}
