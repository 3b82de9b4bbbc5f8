// src/solver/provider.rs

//! Bridge between the record pool and the SAT solver
//!
//! Every pool record becomes a solvable; dependency and job specs become
//! interned version sets whose membership is decided by `MatchSpec`
//! matching. Candidate preference (installed, channel priority, version,
//! build) is expressed through `sort_candidates`, downgrade protection and
//! pins through the candidate lists themselves.

use crate::matchspec::MatchSpec;
use crate::pool::{Pool, RecordId};
use crate::version::Version;
use resolvo::utils::Pool as InternPool;
use resolvo::{
    Candidates, Condition, ConditionId, Dependencies, DependencyProvider, Interner,
    KnownDependencies, NameId, SolvableId, SolverCache, StringId, VersionSetId, VersionSetUnionId,
};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Solve-wide candidate policy: downgrade permissions, pins, updates
#[derive(Debug, Default)]
pub(crate) struct SolvePolicy {
    allow_downgrade_all: bool,
    allow_downgrade_names: HashSet<String>,
    pinned_names: HashSet<String>,
    update_names: HashSet<String>,
}

impl SolvePolicy {
    pub fn new(allow_downgrade_all: bool) -> Self {
        Self {
            allow_downgrade_all,
            ..Self::default()
        }
    }

    pub fn allow_downgrade_for(&mut self, name: &str) {
        self.allow_downgrade_names.insert(name.to_string());
    }

    pub fn pin(&mut self, name: &str) {
        self.pinned_names.insert(name.to_string());
    }

    pub fn mark_update(&mut self, name: &str) {
        self.update_names.insert(name.to_string());
    }

    fn downgrade_allowed(&self, name: &str) -> bool {
        self.allow_downgrade_all || self.allow_downgrade_names.contains(name)
    }

    fn is_update(&self, name: &str) -> bool {
        self.update_names.contains(name)
    }

    fn is_pinned(&self, name: &str) -> bool {
        self.pinned_names.contains(name)
    }
}

/// Solvable payload: a pool record plus its rendered label
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct Candidate {
    pub record: RecordId,
    label: String,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Interned version set: a spec's match predicate, or nothing at all
/// (the removal constraint)
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum SpecSet {
    Matches(MatchSpec),
    Nothing(String),
}

impl fmt::Display for SpecSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecSet::Matches(spec) => write!(f, "{spec}"),
            SpecSet::Nothing(name) => write!(f, "{name} (removed)"),
        }
    }
}

impl resolvo::utils::VersionSet for SpecSet {
    type V = Candidate;
}

/// Dependency provider over one [`Pool`]
pub(crate) struct CandidateProvider<'p> {
    pool: &'p Pool,
    policy: SolvePolicy,
    intern: InternPool<SpecSet, String>,
    candidates_by_name: HashMap<NameId, Vec<SolvableId>>,
    solvables_by_record: HashMap<RecordId, SolvableId>,
}

impl<'p> CandidateProvider<'p> {
    /// Intern every pool record up front so solvable ids are stable and
    /// deterministic for a given pool
    pub fn new(pool: &'p Pool, policy: SolvePolicy) -> Self {
        let intern = InternPool::default();
        let mut candidates_by_name = HashMap::new();
        let mut solvables_by_record = HashMap::new();

        for name in pool.package_names() {
            let name_id = intern.intern_package_name(name.to_string());
            let mut solvables = Vec::new();
            for &record_id in pool.candidates(name) {
                let solvable = intern.intern_solvable(
                    name_id,
                    Candidate {
                        record: record_id,
                        label: pool.record(record_id).to_string(),
                    },
                );
                solvables_by_record.insert(record_id, solvable);
                solvables.push(solvable);
            }
            candidates_by_name.insert(name_id, solvables);
        }

        Self {
            pool,
            policy,
            intern,
            candidates_by_name,
            solvables_by_record,
        }
    }

    /// Version set for an install/update requirement or dependency
    pub fn requirement_for_spec(&self, spec: &MatchSpec) -> VersionSetId {
        let name_id = self.intern.intern_package_name(spec.name.clone());
        self.intern
            .intern_version_set(name_id, SpecSet::Matches(spec.clone()))
    }

    /// Never-satisfiable version set used as a removal constraint
    pub fn forbid_requirement(&self, name: &str) -> VersionSetId {
        let name_id = self.intern.intern_package_name(name.to_string());
        self.intern
            .intern_version_set(name_id, SpecSet::Nothing(name.to_string()))
    }

    /// Solvable for a pool record, if it was interned
    pub fn solvable_of(&self, record: RecordId) -> Option<SolvableId> {
        self.solvables_by_record.get(&record).copied()
    }

    /// Pool record behind a solvable
    pub fn record_of(&self, solvable: SolvableId) -> RecordId {
        self.intern.resolve_solvable(solvable).record.record
    }

    fn record_version(&self, solvable: SolvableId) -> &Version {
        &self.pool.record(self.record_of(solvable)).version
    }

    fn installed_version(&self, name: &str) -> Option<&Version> {
        self.pool
            .installed_record(name)
            .map(|id| &self.pool.record(id).version)
    }
}

impl Interner for CandidateProvider<'_> {
    fn display_solvable(&self, solvable: SolvableId) -> impl fmt::Display + '_ {
        self.intern.resolve_solvable(solvable).record.label.clone()
    }

    fn display_merged_solvables(&self, solvables: &[SolvableId]) -> impl fmt::Display + '_ {
        solvables
            .iter()
            .map(|&s| self.intern.resolve_solvable(s).record.label.clone())
            .collect::<Vec<_>>()
            .join(" | ")
    }

    fn display_name(&self, name: NameId) -> impl fmt::Display + '_ {
        self.intern.resolve_package_name(name).clone()
    }

    fn display_version_set(&self, version_set: VersionSetId) -> impl fmt::Display + '_ {
        self.intern.resolve_version_set(version_set).to_string()
    }

    fn display_string(&self, string_id: StringId) -> impl fmt::Display + '_ {
        self.intern.resolve_string(string_id).to_string()
    }

    fn version_set_name(&self, version_set: VersionSetId) -> NameId {
        self.intern.resolve_version_set_package_name(version_set)
    }

    fn solvable_name(&self, solvable: SolvableId) -> NameId {
        self.intern.resolve_solvable(solvable).name
    }

    fn version_sets_in_union(
        &self,
        version_set_union: VersionSetUnionId,
    ) -> impl Iterator<Item = VersionSetId> {
        self.intern.resolve_version_set_union(version_set_union)
    }

    fn resolve_condition(&self, condition: ConditionId) -> Condition {
        self.intern.resolve_condition(condition).clone()
    }
}

impl DependencyProvider for CandidateProvider<'_> {
    async fn filter_candidates(
        &self,
        candidates: &[SolvableId],
        version_set: VersionSetId,
        inverse: bool,
    ) -> Vec<SolvableId> {
        let set = self.intern.resolve_version_set(version_set);
        candidates
            .iter()
            .copied()
            .filter(|&solvable| {
                let matched = match set {
                    SpecSet::Matches(spec) => {
                        spec.matches(self.pool.record(self.record_of(solvable)))
                    }
                    SpecSet::Nothing(_) => false,
                };
                matched != inverse
            })
            .collect()
    }

    async fn get_candidates(&self, name: NameId) -> Option<Candidates> {
        let solvables = self.candidates_by_name.get(&name)?;
        let name_str = self.intern.resolve_package_name(name).clone();

        let installed = self
            .pool
            .installed_record(&name_str)
            .and_then(|id| self.solvable_of(id));

        // Downgrade protection: drop candidates older than the installed
        // version unless downgrades were allowed for this name
        let mut candidates = Vec::with_capacity(solvables.len());
        let mut excluded = Vec::new();
        let floor = if self.policy.downgrade_allowed(&name_str) {
            None
        } else {
            self.installed_version(&name_str).cloned()
        };

        for &solvable in solvables {
            if let Some(ref floor) = floor
                && self.record_version(solvable) < floor
            {
                let reason = self.intern.intern_string(format!(
                    "would downgrade {name_str} below the installed {floor}"
                ));
                excluded.push((solvable, reason));
                continue;
            }
            candidates.push(solvable);
        }

        // An exact pin locks the name to the installed record; a plain
        // install favors it as the stability tie-break
        let locked = if self.policy.is_pinned(&name_str) {
            installed
        } else {
            None
        };
        let favored = if self.policy.is_update(&name_str) {
            None
        } else {
            installed.filter(|s| candidates.contains(s))
        };

        Some(Candidates {
            candidates,
            favored,
            locked,
            excluded,
            ..Candidates::default()
        })
    }

    async fn sort_candidates(&self, _solver: &SolverCache<Self>, solvables: &mut [SolvableId]) {
        solvables.sort_by(|&a, &b| {
            let rec_a = self.pool.record(self.record_of(a));
            let rec_b = self.pool.record(self.record_of(b));

            // 1. Installed records first (stability), unless the name is
            //    being updated
            if !self.policy.is_update(&rec_a.name) {
                let installed_a = self.pool.is_installed(self.record_of(a));
                let installed_b = self.pool.is_installed(self.record_of(b));
                match installed_b.cmp(&installed_a) {
                    Ordering::Equal => {}
                    ord => return ord,
                }
            }

            // 2. Better (lower) repo priority
            let prio_a = self.pool.priority_of(self.record_of(a));
            let prio_b = self.pool.priority_of(self.record_of(b));
            match prio_a.cmp(&prio_b) {
                Ordering::Equal => {}
                ord => return ord,
            }

            // 3. Newer version
            match rec_b.version.cmp(&rec_a.version) {
                Ordering::Equal => {}
                ord => return ord,
            }

            // 4. Newer build
            match rec_b.build_number.cmp(&rec_a.build_number) {
                Ordering::Equal => {}
                ord => return ord,
            }
            match rec_b.build_string.cmp(&rec_a.build_string) {
                Ordering::Equal => {}
                ord => return ord,
            }

            // Stable fallback so equal candidates keep arena order
            self.record_of(a).cmp(&self.record_of(b))
        });
    }

    async fn get_dependencies(&self, solvable: SolvableId) -> Dependencies {
        let record = self.pool.record(self.record_of(solvable));

        let mut requirements = Vec::with_capacity(record.depends.len());
        for dep in &record.depends {
            match MatchSpec::parse(dep) {
                Ok(spec) => requirements.push(self.requirement_for_spec(&spec).into()),
                Err(e) => {
                    let reason = self
                        .intern
                        .intern_string(format!("invalid dependency '{dep}': {e}"));
                    return Dependencies::Unknown(reason);
                }
            }
        }

        let mut constrains = Vec::with_capacity(record.constrains.len());
        for constraint in &record.constrains {
            match MatchSpec::parse(constraint) {
                Ok(spec) => constrains.push(self.requirement_for_spec(&spec)),
                Err(e) => {
                    let reason = self
                        .intern
                        .intern_string(format!("invalid constraint '{constraint}': {e}"));
                    return Dependencies::Unknown(reason);
                }
            }
        }

        Dependencies::Known(KnownDependencies {
            requirements,
            constrains,
        })
    }
}
