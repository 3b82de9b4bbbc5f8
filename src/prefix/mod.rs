// src/prefix/mod.rs

//! Installed-environment snapshot
//!
//! Each installed package is recorded as one JSON file in the prefix's
//! `pkg-meta/` directory: the package record plus the relative paths its
//! Link step placed, which is exactly what an Unlink needs to reverse it.
//! The snapshot is read once at solve time and rewritten incrementally as
//! the transaction executes; every write is a temp file renamed into place,
//! so the rename is the step's commit point and a crash never leaves a
//! half-written entry behind.

use crate::error::{Error, Result};
use crate::record::PackageRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Subdirectory of the prefix holding one metadata file per package
pub const META_DIR: &str = "pkg-meta";

/// Metadata entry for one installed package
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefixRecord {
    #[serde(flatten)]
    pub record: PackageRecord,
    /// Paths linked into the prefix, relative to the prefix root
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Package cache directory the files were linked from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_package_dir: Option<PathBuf>,
    pub link_date: DateTime<Utc>,
}

impl PrefixRecord {
    pub fn new(record: PackageRecord, files: Vec<PathBuf>) -> Self {
        Self {
            record,
            files,
            extracted_package_dir: None,
            link_date: Utc::now(),
        }
    }

    fn file_name(&self) -> String {
        format!("{}.json", self.record.identity())
    }
}

/// On-disk record of what is installed in a target environment
#[derive(Debug)]
pub struct PrefixData {
    prefix: PathBuf,
    records: BTreeMap<String, PrefixRecord>,
}

impl PrefixData {
    /// Load the snapshot of an existing prefix
    ///
    /// The prefix directory must exist; a missing metadata directory just
    /// means nothing is installed yet.
    pub fn load(prefix: &Path) -> Result<Self> {
        if !prefix.is_dir() {
            return Err(Error::Config(format!(
                "target prefix does not exist: {}",
                prefix.display()
            )));
        }

        let meta_dir = prefix.join(META_DIR);
        let mut records = BTreeMap::new();
        if meta_dir.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(&meta_dir)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            entries.sort();

            for path in entries {
                let data = fs::read(&path)?;
                let record: PrefixRecord = serde_json::from_slice(&data).map_err(|e| {
                    Error::Parse(format!("malformed prefix record {}: {}", path.display(), e))
                })?;
                if let Some(old) = records.insert(record.record.name.clone(), record) {
                    warn!(
                        "duplicate prefix records for {}, keeping the later file",
                        old.record.name
                    );
                }
            }
        }

        debug!(
            "loaded {} installed package(s) from {}",
            records.len(),
            prefix.display()
        );
        Ok(Self {
            prefix: prefix.to_path_buf(),
            records,
        })
    }

    /// Create the prefix directory tree (including the metadata dir) if
    /// needed, then load it
    pub fn init(prefix: &Path) -> Result<Self> {
        fs::create_dir_all(prefix.join(META_DIR))?;
        Self::load(prefix)
    }

    /// Snapshot of a prefix that does not exist yet (environment creation);
    /// nothing is written until a record is inserted
    pub fn empty(prefix: &Path) -> Self {
        Self {
            prefix: prefix.to_path_buf(),
            records: BTreeMap::new(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    fn meta_dir(&self) -> PathBuf {
        self.prefix.join(META_DIR)
    }

    /// Installed records in name order
    pub fn records(&self) -> impl Iterator<Item = &PrefixRecord> {
        self.records.values()
    }

    pub fn get(&self, name: &str) -> Option<&PrefixRecord> {
        self.records.get(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clone the package records, for registering the snapshot in a Pool
    pub fn package_records(&self) -> Vec<PackageRecord> {
        self.records.values().map(|r| r.record.clone()).collect()
    }

    /// Commit a package's metadata entry
    ///
    /// The JSON is written to a temp file and renamed into the metadata
    /// directory; the rename is the point at which the package counts as
    /// installed. An existing entry for the same name is replaced.
    pub fn insert(&mut self, record: PrefixRecord) -> Result<()> {
        let meta_dir = self.meta_dir();
        fs::create_dir_all(&meta_dir)?;

        // A same-name entry under a different identity leaves a stale file
        if let Some(old) = self.records.get(&record.record.name)
            && old.record.identity() != record.record.identity()
        {
            let old_path = meta_dir.join(old.file_name());
            if old_path.is_file() {
                fs::remove_file(&old_path)?;
            }
        }

        let path = meta_dir.join(record.file_name());
        let mut temp = tempfile::NamedTempFile::new_in(&meta_dir)?;
        temp.write_all(serde_json::to_string_pretty(&record)?.as_bytes())?;
        temp.flush()?;
        temp.persist(&path).map_err(|e| e.error)?;

        debug!("recorded {} in {}", record.record.identity(), path.display());
        self.records.insert(record.record.name.clone(), record);
        Ok(())
    }

    /// Drop a package's metadata entry
    pub fn remove(&mut self, name: &str) -> Result<Option<PrefixRecord>> {
        let Some(record) = self.records.remove(name) else {
            return Ok(None);
        };

        let path = self.meta_dir().join(record.file_name());
        if path.is_file() {
            fs::remove_file(&path)?;
        }
        debug!("removed prefix record for {}", name);
        Ok(Some(record))
    }
}
