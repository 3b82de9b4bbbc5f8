// src/solver/mod.rs

//! Dependency resolution
//!
//! Requested jobs are turned into a boolean satisfiability problem over
//! candidate selection and handed to a SAT solver: each package name's
//! candidates are mutually exclusive choices, each dependency spec demands
//! that a satisfying candidate be chosen too, and installed packages enter
//! as soft requirements so an already-satisfied environment stays put.
//!
//! Candidate preference, in order: installed record, channel priority,
//! newer version, newer build. Downgrades below the installed version are
//! refused unless allowed globally or per job. Failures come back as a
//! typed [`Conflict`] carrying the minimal incompatible-constraint
//! explanation; nothing here ever touches the filesystem.

mod provider;

use crate::error::{Error, Result};
use crate::matchspec::MatchSpec;
use crate::pool::{Pool, RecordId};
use crate::record::PackageRecord;
use provider::{CandidateProvider, SolvePolicy};
use resolvo::{Problem, Solver, UnsolvableOrCancelled};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

/// A single requested change
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Install (or keep) something satisfying the spec
    Install(MatchSpec),
    /// Remove the named package; dependents fall away with it
    Remove(String),
    /// Refresh the named package to the newest acceptable version
    Update(String),
}

/// A requested operation with its modifiers
#[derive(Debug, Clone)]
pub struct Job {
    pub kind: JobKind,
    /// Permit a solution that selects a version below the installed one
    pub allow_downgrade: bool,
    /// Lock the target name to the installed record
    pub exact_pin: bool,
}

impl Job {
    pub fn install(spec: MatchSpec) -> Self {
        Self {
            kind: JobKind::Install(spec),
            allow_downgrade: false,
            exact_pin: false,
        }
    }

    pub fn remove(name: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Remove(name.into().to_ascii_lowercase()),
            allow_downgrade: false,
            exact_pin: false,
        }
    }

    pub fn update(name: impl Into<String>) -> Self {
        Self {
            kind: JobKind::Update(name.into().to_ascii_lowercase()),
            allow_downgrade: false,
            exact_pin: false,
        }
    }

    pub fn with_allow_downgrade(mut self) -> Self {
        self.allow_downgrade = true;
        self
    }

    pub fn with_exact_pin(mut self) -> Self {
        self.exact_pin = true;
        self
    }

    /// The package name this job targets
    pub fn target_name(&self) -> &str {
        match &self.kind {
            JobKind::Install(spec) => &spec.name,
            JobKind::Remove(name) | JobKind::Update(name) => name,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            JobKind::Install(spec) => write!(f, "install {spec}"),
            JobKind::Remove(name) => write!(f, "remove {name}"),
            JobKind::Update(name) => write!(f, "update {name}"),
        }
    }
}

/// Why a solve request cannot be satisfied
#[derive(Debug, Clone)]
pub enum Conflict {
    /// Two jobs in one request target the same name
    DuplicateJobs { name: String, jobs: Vec<String> },
    /// The constraint set is jointly unsatisfiable
    Unsolvable { explanation: String },
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::DuplicateJobs { name, jobs } => {
                write!(
                    f,
                    "multiple jobs target '{}' and are mutually exclusive: {}",
                    name,
                    jobs.join(", ")
                )
            }
            Conflict::Unsolvable { explanation } => write!(f, "{explanation}"),
        }
    }
}

/// The solver's output: one chosen record per package name
#[derive(Debug, Clone, Default)]
pub struct ResolvedSet {
    records: BTreeMap<String, RecordId>,
}

impl ResolvedSet {
    pub fn get(&self, name: &str) -> Option<RecordId> {
        self.records.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// (name, record) pairs in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, RecordId)> {
        self.records.iter().map(|(name, &id)| (name.as_str(), id))
    }

    /// The chosen records, in name order
    pub fn records<'p>(&self, pool: &'p Pool) -> Vec<&'p PackageRecord> {
        self.records.values().map(|&id| pool.record(id)).collect()
    }
}

/// Global solve options (the per-job modifiers still apply on top)
#[derive(Debug, Clone, Copy, Default)]
pub struct SolveOptions {
    /// Allow downgrades for every name, not just per-job targets
    pub allow_downgrade: bool,
}

/// Resolve the requested jobs against the pool
///
/// Deterministic: identical pool contents and jobs yield an identical
/// resolved set.
pub fn solve(pool: &Pool, jobs: &[Job], options: SolveOptions) -> Result<ResolvedSet> {
    check_duplicate_jobs(jobs)?;

    let mut policy = SolvePolicy::new(options.allow_downgrade);
    for job in jobs {
        if job.allow_downgrade {
            policy.allow_downgrade_for(job.target_name());
        }
        if job.exact_pin {
            policy.pin(job.target_name());
        }
        if let JobKind::Update(name) = &job.kind {
            policy.mark_update(name);
        }
    }

    let provider = CandidateProvider::new(pool, policy);

    let mut requirements = Vec::new();
    let mut constraints = Vec::new();
    // Names whose installed record must not be softly kept: removals (the
    // whole point) and updates (keeping the old version would satisfy the
    // job without moving anything)
    let mut no_soft_keep: HashSet<&str> = HashSet::new();
    for job in jobs {
        match &job.kind {
            JobKind::Install(spec) => {
                requirements.push(provider.requirement_for_spec(spec).into());
            }
            JobKind::Update(name) => {
                let spec = MatchSpec::parse(name)?;
                requirements.push(provider.requirement_for_spec(&spec).into());
                no_soft_keep.insert(name.as_str());
            }
            JobKind::Remove(name) => {
                constraints.push(provider.forbid_requirement(name));
                no_soft_keep.insert(name.as_str());
            }
        }
    }

    // Installed packages are kept when possible, never forced
    let soft_requirements: Vec<_> = pool
        .installed_records()
        .into_iter()
        .filter(|&id| !no_soft_keep.contains(pool.record(id).name.as_str()))
        .filter_map(|id| provider.solvable_of(id))
        .collect();

    debug!(
        "solving {} job(s) against {} record(s) in {} repo(s)",
        jobs.len(),
        pool.record_count(),
        pool.repo_count()
    );

    let problem = Problem::new()
        .requirements(requirements)
        .constraints(constraints)
        .soft_requirements(soft_requirements);

    let mut solver = Solver::new(provider);
    match solver.solve(problem) {
        Ok(solvables) => {
            let provider = solver.provider();
            let mut records = BTreeMap::new();
            for solvable in solvables {
                let record_id = provider.record_of(solvable);
                let record = pool.record(record_id);
                records.insert(record.name.clone(), record_id);
            }
            info!("resolved {} package(s)", records.len());
            Ok(ResolvedSet { records })
        }
        Err(UnsolvableOrCancelled::Unsolvable(conflict)) => {
            let explanation = conflict.display_user_friendly(&solver).to_string();
            Err(Error::Conflict(Conflict::Unsolvable { explanation }))
        }
        Err(UnsolvableOrCancelled::Cancelled(_)) => Err(Error::Conflict(Conflict::Unsolvable {
            explanation: "solve was cancelled".to_string(),
        })),
    }
}

/// A job's target name must be unique within one request
fn check_duplicate_jobs(jobs: &[Job]) -> Result<()> {
    let mut by_name: HashMap<&str, Vec<String>> = HashMap::new();
    for job in jobs {
        by_name.entry(job.target_name()).or_default().push(job.to_string());
    }

    let mut duplicated: Vec<(&str, Vec<String>)> = by_name
        .into_iter()
        .filter(|(_, jobs)| jobs.len() > 1)
        .collect();
    duplicated.sort_by_key(|(name, _)| *name);

    if let Some((name, jobs)) = duplicated.into_iter().next() {
        return Err(Error::Conflict(Conflict::DuplicateJobs {
            name: name.to_string(),
            jobs,
        }));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Priority;
    use crate::version::Version;

    fn record(name: &str, version: &str, build: &str, depends: &[&str]) -> PackageRecord {
        PackageRecord {
            name: name.to_string(),
            version: Version::parse(version).unwrap(),
            build_string: build.to_string(),
            build_number: 0,
            depends: depends.iter().map(|s| s.to_string()).collect(),
            constrains: Vec::new(),
            size: None,
            sha256: None,
            md5: None,
            subdir: "linux-64".to_string(),
            filename: String::new(),
            channel: "main".to_string(),
            url: String::new(),
        }
    }

    fn channel_pool(records: Vec<PackageRecord>, installed: Vec<PackageRecord>) -> Pool {
        let mut pool = Pool::new();
        pool.add_repo("main/linux-64", Priority { rank: 0, subrank: 0 }, records);
        pool.add_installed_repo(installed);
        pool
    }

    fn install(spec: &str) -> Job {
        Job::install(MatchSpec::parse(spec).unwrap())
    }

    #[test]
    fn test_simple_install_with_dependency() {
        let pool = channel_pool(
            vec![
                record("foo", "2.0", "0", &["bar >=1.5"]),
                record("foo", "1.0", "0", &[]),
                record("bar", "1.5", "0", &[]),
                record("bar", "1.0", "0", &[]),
            ],
            Vec::new(),
        );

        let solution = solve(&pool, &[install("foo>=2.0")], SolveOptions::default()).unwrap();
        assert_eq!(solution.len(), 2);
        assert_eq!(
            pool.record(solution.get("foo").unwrap()).version,
            Version::parse("2.0").unwrap()
        );
        assert_eq!(
            pool.record(solution.get("bar").unwrap()).version,
            Version::parse("1.5").unwrap()
        );
    }

    #[test]
    fn test_resolved_set_closure_property() {
        let pool = channel_pool(
            vec![
                record("app", "1.0", "0", &["libx", "liby >=2"]),
                record("libx", "3.0", "0", &["liby >=1"]),
                record("liby", "2.5", "0", &[]),
                record("liby", "1.0", "0", &[]),
            ],
            Vec::new(),
        );

        let solution = solve(&pool, &[install("app")], SolveOptions::default()).unwrap();

        // Every chosen record's constraints are satisfied within the set
        for record in solution.records(&pool) {
            for dep in &record.depends {
                let spec = MatchSpec::parse(dep).unwrap();
                let chosen = solution.get(&spec.name).expect("dependency resolved");
                assert!(spec.matches(pool.record(chosen)), "{dep} satisfied");
            }
        }
    }

    #[test]
    fn test_prefers_newest_version() {
        let pool = channel_pool(
            vec![
                record("foo", "1.0", "0", &[]),
                record("foo", "3.0", "0", &[]),
                record("foo", "2.0", "0", &[]),
            ],
            Vec::new(),
        );

        let solution = solve(&pool, &[install("foo")], SolveOptions::default()).unwrap();
        assert_eq!(
            pool.record(solution.get("foo").unwrap()).version,
            Version::parse("3.0").unwrap()
        );
    }

    #[test]
    fn test_prefers_higher_build_number() {
        let mut newer_build = record("foo", "1.0", "1", &[]);
        newer_build.build_number = 1;
        let pool = channel_pool(vec![record("foo", "1.0", "0", &[]), newer_build], Vec::new());

        let solution = solve(&pool, &[install("foo")], SolveOptions::default()).unwrap();
        assert_eq!(pool.record(solution.get("foo").unwrap()).build_string, "1");
    }

    #[test]
    fn test_prefers_earlier_channel() {
        let mut pool = Pool::new();
        pool.add_repo(
            "first/linux-64",
            Priority { rank: 0, subrank: 0 },
            vec![record("foo", "1.0", "first", &[])],
        );
        pool.add_repo(
            "second/linux-64",
            Priority { rank: 1, subrank: 0 },
            // Same version in the later channel must not win
            vec![record("foo", "1.0", "second", &[])],
        );
        pool.add_installed_repo(Vec::new());

        let solution = solve(&pool, &[install("foo==1.0")], SolveOptions::default()).unwrap();
        assert_eq!(pool.record(solution.get("foo").unwrap()).build_string, "first");
    }

    #[test]
    fn test_installed_preferred_for_stability() {
        let pool = channel_pool(
            vec![
                record("app", "1.0", "0", &["lib"]),
                record("lib", "2.0", "0", &[]),
                record("lib", "1.0", "0", &[]),
            ],
            vec![record("lib", "1.0", "0", &[])],
        );

        let solution = solve(&pool, &[install("app")], SolveOptions::default()).unwrap();
        // The installed lib-1.0 satisfies app's dependency; no churn
        assert_eq!(
            pool.record(solution.get("lib").unwrap()).version,
            Version::parse("1.0").unwrap()
        );
    }

    #[test]
    fn test_installed_packages_kept() {
        let pool = channel_pool(
            vec![record("foo", "1.0", "0", &[]), record("keepme", "2.0", "0", &[])],
            vec![record("keepme", "2.0", "0", &[])],
        );

        let solution = solve(&pool, &[install("foo")], SolveOptions::default()).unwrap();
        assert!(solution.contains("keepme"));
        assert!(solution.contains("foo"));
    }

    #[test]
    fn test_downgrade_refused_by_default() {
        let pool = channel_pool(
            vec![record("foo", "1.0", "0", &[]), record("foo", "2.0", "0", &[])],
            vec![record("foo", "2.0", "0", &[])],
        );

        let err = solve(&pool, &[install("foo==1.0")], SolveOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Conflict(Conflict::Unsolvable { .. })));
    }

    #[test]
    fn test_downgrade_allowed_by_job_modifier() {
        let pool = channel_pool(
            vec![record("foo", "1.0", "0", &[]), record("foo", "2.0", "0", &[])],
            vec![record("foo", "2.0", "0", &[])],
        );

        let job = install("foo==1.0").with_allow_downgrade();
        let solution = solve(&pool, &[job], SolveOptions::default()).unwrap();
        assert_eq!(
            pool.record(solution.get("foo").unwrap()).version,
            Version::parse("1.0").unwrap()
        );
    }

    #[test]
    fn test_downgrade_allowed_globally() {
        let pool = channel_pool(
            vec![record("foo", "1.0", "0", &[]), record("foo", "2.0", "0", &[])],
            vec![record("foo", "2.0", "0", &[])],
        );

        let options = SolveOptions {
            allow_downgrade: true,
        };
        let solution = solve(&pool, &[install("foo==1.0")], options).unwrap();
        assert_eq!(
            pool.record(solution.get("foo").unwrap()).version,
            Version::parse("1.0").unwrap()
        );
    }

    #[test]
    fn test_update_moves_to_newest() {
        let pool = channel_pool(
            vec![record("foo", "1.0", "0", &[]), record("foo", "2.0", "0", &[])],
            vec![record("foo", "1.0", "0", &[])],
        );

        let solution = solve(&pool, &[Job::update("foo")], SolveOptions::default()).unwrap();
        assert_eq!(
            pool.record(solution.get("foo").unwrap()).version,
            Version::parse("2.0").unwrap()
        );
    }

    #[test]
    fn test_remove_drops_package_and_dependents() {
        let pool = channel_pool(
            vec![record("lib", "1.0", "0", &[]), record("app", "1.0", "0", &["lib"])],
            vec![record("lib", "1.0", "0", &[]), record("app", "1.0", "0", &["lib"])],
        );

        let solution = solve(&pool, &[Job::remove("lib")], SolveOptions::default()).unwrap();
        assert!(!solution.contains("lib"));
        assert!(!solution.contains("app"));
    }

    #[test]
    fn test_duplicate_jobs_conflict() {
        let pool = channel_pool(
            vec![record("foo", "1.0", "0", &[]), record("foo", "2.0", "0", &[])],
            Vec::new(),
        );

        let err = solve(
            &pool,
            &[install("foo==1.0"), install("foo==2.0")],
            SolveOptions::default(),
        )
        .unwrap_err();

        match err {
            Error::Conflict(Conflict::DuplicateJobs { name, jobs }) => {
                assert_eq!(name, "foo");
                assert_eq!(jobs.len(), 2);
            }
            other => panic!("expected duplicate-job conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_unsolvable_has_explanation() {
        let pool = channel_pool(vec![record("foo", "1.0", "0", &["missing >=1"])], Vec::new());

        let err = solve(&pool, &[install("foo")], SolveOptions::default()).unwrap_err();
        match err {
            Error::Conflict(Conflict::Unsolvable { explanation }) => {
                assert!(!explanation.is_empty());
            }
            other => panic!("expected unsolvable conflict, got {other:?}"),
        }
    }

    #[test]
    fn test_solve_is_deterministic() {
        let records = vec![
            record("app", "1.0", "0", &["libx", "liby"]),
            record("libx", "1.0", "0", &[]),
            record("libx", "2.0", "0", &[]),
            record("liby", "1.0", "0", &[]),
            record("liby", "2.0", "0", &[]),
        ];

        let pool1 = channel_pool(records.clone(), Vec::new());
        let pool2 = channel_pool(records, Vec::new());

        let a = solve(&pool1, &[install("app")], SolveOptions::default()).unwrap();
        let b = solve(&pool2, &[install("app")], SolveOptions::default()).unwrap();

        let names_a: Vec<_> = a.records(&pool1).iter().map(|r| r.to_string()).collect();
        let names_b: Vec<_> = b.records(&pool2).iter().map(|r| r.to_string()).collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn test_constrains_are_honored() {
        let mut pinned = record("app", "1.0", "0", &[]);
        pinned.constrains = vec!["lib <2.0".to_string()];
        let pool = channel_pool(
            vec![
                pinned,
                record("lib", "1.5", "0", &[]),
                record("lib", "2.5", "0", &[]),
                record("tool", "1.0", "0", &["lib"]),
            ],
            Vec::new(),
        );

        let solution = solve(
            &pool,
            &[install("app"), install("tool")],
            SolveOptions::default(),
        )
        .unwrap();
        // app's runtime constraint caps lib below 2.0
        assert_eq!(
            pool.record(solution.get("lib").unwrap()).version,
            Version::parse("1.5").unwrap()
        );
    }
}
