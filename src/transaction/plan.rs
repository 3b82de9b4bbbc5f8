// src/transaction/plan.rs

//! Transaction planning
//!
//! A plan is the pure diff between a resolved set and the installed
//! snapshot: packages only in the snapshot are unlinked, packages only in
//! the resolved set are linked, and a changed record is an unlink of the
//! old followed by a link of the new. No I/O happens here.
//!
//! Step order: unlinks first, dependents before their dependencies; then
//! links, dependencies before their dependents. Cycles (which real
//! channels do contain) are broken deterministically by name.

use crate::matchspec::MatchSpec;
use crate::pool::Pool;
use crate::prefix::{PrefixData, PrefixRecord};
use crate::record::PackageRecord;
use crate::solver::ResolvedSet;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// One ordered operation of a transaction
#[derive(Debug, Clone)]
pub enum TransactionStep {
    /// Remove an installed package's files and metadata entry
    Unlink(Box<PrefixRecord>),
    /// Materialize a resolved record into the environment
    Link(Box<PackageRecord>),
}

impl TransactionStep {
    /// Short step identity for reports and errors
    pub fn description(&self) -> String {
        match self {
            TransactionStep::Unlink(record) => format!("unlink {}", record.record.identity()),
            TransactionStep::Link(record) => format!("link {}", record.identity()),
        }
    }
}

impl fmt::Display for TransactionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Counts for the plan summary line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub link: usize,
    pub unlink: usize,
}

/// Ordered sequence of link/unlink steps
#[derive(Debug, Clone, Default)]
pub struct TransactionPlan {
    steps: Vec<TransactionStep>,
}

impl TransactionPlan {
    /// Diff a resolved set against the installed snapshot
    pub fn from_diff(pool: &Pool, resolved: &ResolvedSet, prefix: &PrefixData) -> Self {
        let mut to_unlink: Vec<PrefixRecord> = Vec::new();
        let mut to_link: Vec<PackageRecord> = Vec::new();

        for (name, record_id) in resolved.iter() {
            let record = pool.record(record_id);
            match prefix.get(name) {
                Some(installed) if installed.record.same_content(record) => {}
                Some(installed) => {
                    to_unlink.push(installed.clone());
                    to_link.push(record.clone());
                }
                None => to_link.push(record.clone()),
            }
        }

        for installed in prefix.records() {
            if !resolved.contains(&installed.record.name) {
                to_unlink.push(installed.clone());
            }
        }

        // Unlink dependents before the packages they depend on
        let unlink_refs: Vec<&PackageRecord> = to_unlink.iter().map(|r| &r.record).collect();
        let mut unlink_order = dependency_order(&unlink_refs);
        unlink_order.reverse();

        // Link dependencies before their dependents
        let link_refs: Vec<&PackageRecord> = to_link.iter().collect();
        let link_order = dependency_order(&link_refs);

        let mut steps = Vec::with_capacity(to_unlink.len() + to_link.len());
        for index in unlink_order {
            steps.push(TransactionStep::Unlink(Box::new(to_unlink[index].clone())));
        }
        for index in link_order {
            steps.push(TransactionStep::Link(Box::new(to_link[index].clone())));
        }

        debug!(
            "planned {} unlink and {} link step(s)",
            to_unlink.len(),
            to_link.len()
        );
        Self { steps }
    }

    pub fn steps(&self) -> &[TransactionStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// An empty plan means the request was already satisfied
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Records that will be linked, in step order
    pub fn link_records(&self) -> Vec<&PackageRecord> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                TransactionStep::Link(record) => Some(record.as_ref()),
                TransactionStep::Unlink(_) => None,
            })
            .collect()
    }

    /// Installed records that will be unlinked, in step order
    pub fn unlink_records(&self) -> Vec<&PrefixRecord> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                TransactionStep::Unlink(record) => Some(record.as_ref()),
                TransactionStep::Link(_) => None,
            })
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            link: self.link_records().len(),
            unlink: self.unlink_records().len(),
        }
    }

    /// Render the plan for the user, before confirmation
    pub fn render(&self, json: bool) -> String {
        if json {
            #[derive(Serialize)]
            struct Report<'a> {
                summary: PlanSummary,
                unlink: Vec<&'a PackageRecord>,
                link: Vec<&'a PackageRecord>,
            }
            let report = Report {
                summary: self.summary(),
                unlink: self.unlink_records().iter().map(|r| &r.record).collect(),
                link: self.link_records(),
            };
            return serde_json::to_string_pretty(&report).unwrap_or_default();
        }

        if self.is_empty() {
            return "Nothing to do; all requested packages are already satisfied.\n".to_string();
        }

        let mut out = String::from("Transaction\n\n");
        let unlinks = self.unlink_records();
        if !unlinks.is_empty() {
            out.push_str("  Unlink:\n");
            for record in &unlinks {
                out.push_str(&format!(
                    "    - {} {} {} ({})\n",
                    record.record.name,
                    record.record.version,
                    record.record.build_string,
                    record.record.channel
                ));
            }
        }
        let links = self.link_records();
        if !links.is_empty() {
            out.push_str("  Link:\n");
            for record in &links {
                out.push_str(&format!(
                    "    + {} {} {} ({})\n",
                    record.name, record.version, record.build_string, record.channel
                ));
            }
        }
        let summary = self.summary();
        out.push_str(&format!(
            "\n  {} to link, {} to unlink\n",
            summary.link, summary.unlink
        ));
        out
    }
}

/// Order records so dependencies come before their dependents
///
/// Only dependency edges within the given set matter. Ready records are
/// picked in name order and cycles are broken by taking the smallest
/// remaining name, so the result is deterministic.
fn dependency_order(records: &[&PackageRecord]) -> Vec<usize> {
    let by_name: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(index, record)| (record.name.as_str(), index))
        .collect();

    // dependency -> dependents edges, indegree = unsatisfied deps
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    let mut indegree = vec![0usize; records.len()];
    for (index, record) in records.iter().enumerate() {
        let mut deps_in_set = HashSet::new();
        for dep in &record.depends {
            let Ok(spec) = MatchSpec::parse(dep) else {
                continue;
            };
            if let Some(&dep_index) = by_name.get(spec.name.as_str())
                && dep_index != index
                && deps_in_set.insert(dep_index)
            {
                dependents[dep_index].push(index);
                indegree[index] += 1;
            }
        }
    }

    let mut ready: BTreeMap<&str, usize> = records
        .iter()
        .enumerate()
        .filter(|&(index, _)| indegree[index] == 0)
        .map(|(index, record)| (record.name.as_str(), index))
        .collect();
    let mut remaining: BTreeMap<&str, usize> = records
        .iter()
        .enumerate()
        .filter(|&(index, _)| indegree[index] > 0)
        .map(|(index, record)| (record.name.as_str(), index))
        .collect();

    let mut order = Vec::with_capacity(records.len());
    while order.len() < records.len() {
        let index = match ready.pop_first() {
            Some((_, index)) => index,
            None => {
                // Dependency cycle: break it at the smallest name
                let (name, index) = remaining
                    .pop_first()
                    .expect("remaining records exist while order is incomplete");
                debug!("breaking dependency cycle at {}", name);
                index
            }
        };

        order.push(index);
        for &dependent in &dependents[index] {
            if indegree[dependent] == 0 {
                continue;
            }
            indegree[dependent] -= 1;
            if indegree[dependent] == 0 {
                let name = records[dependent].name.as_str();
                if remaining.remove(name).is_some() {
                    ready.insert(name, dependent);
                }
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn test_dependency_order_deps_first() {
        let app = record("app", "1.0", "0", &["libx", "liby"]);
        let libx = record("libx", "1.0", "0", &["liby"]);
        let liby = record("liby", "1.0", "0", &[]);
        let records = vec![&app, &libx, &liby];

        let order = dependency_order(&records);
        let names: Vec<&str> = order.iter().map(|&i| records[i].name.as_str()).collect();
        assert_eq!(names, vec!["liby", "libx", "app"]);
    }

    #[test]
    fn test_dependency_order_ignores_external_deps() {
        let app = record("app", "1.0", "0", &["outside-the-set"]);
        let records = vec![&app];
        assert_eq!(dependency_order(&records), vec![0]);
    }

    #[test]
    fn test_dependency_order_breaks_cycles() {
        let a = record("a", "1.0", "0", &["b"]);
        let b = record("b", "1.0", "0", &["a"]);
        let records = vec![&a, &b];

        let order = dependency_order(&records);
        assert_eq!(order.len(), 2);
        // Smallest name starts the broken cycle
        assert_eq!(records[order[0]].name, "a");
    }

    #[test]
    fn test_dependency_order_is_name_deterministic() {
        let z = record("zpkg", "1.0", "0", &[]);
        let a = record("apkg", "1.0", "0", &[]);
        let m = record("mpkg", "1.0", "0", &[]);
        let records = vec![&z, &a, &m];

        let order = dependency_order(&records);
        let names: Vec<&str> = order.iter().map(|&i| records[i].name.as_str()).collect();
        assert_eq!(names, vec!["apkg", "mpkg", "zpkg"]);
    }

    #[test]
    fn test_render_empty_plan() {
        let plan = TransactionPlan::default();
        assert!(plan.is_empty());
        assert!(plan.render(false).contains("Nothing to do"));
    }

    #[test]
    fn test_render_json_shape() {
        let plan = TransactionPlan {
            steps: vec![TransactionStep::Link(Box::new(record("foo", "2.0", "0", &[])))],
        };

        let rendered = plan.render(true);
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["summary"]["link"], 1);
        assert_eq!(value["link"][0]["name"], "foo");
        assert_eq!(value["unlink"].as_array().unwrap().len(), 0);
    }
}
