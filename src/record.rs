// src/record.rs

//! Package record and repodata document types
//!
//! A [`PackageRecord`] is the immutable description of one concrete package
//! as listed in a channel's repodata document. Records carry no behavior;
//! provenance fields (channel, url) are filled in by the subdir index when
//! the document is parsed.

use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Immutable description of one concrete package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: Version,
    /// Build string, the secondary tie-break after version
    #[serde(default)]
    pub build_string: String,
    #[serde(default)]
    pub build_number: u64,
    /// Dependency constraints as match-spec strings
    #[serde(default)]
    pub depends: Vec<String>,
    /// Constraints on other packages that apply only if those are installed
    #[serde(default)]
    pub constrains: Vec<String>,
    /// Archive size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    /// Platform subdirectory this record was listed under
    #[serde(default)]
    pub subdir: String,
    /// Archive filename within the subdirectory
    #[serde(default, rename = "fn")]
    pub filename: String,
    /// Provenance channel name, filled at index time
    #[serde(default)]
    pub channel: String,
    /// Full download URL, filled at index time
    #[serde(default)]
    pub url: String,
}

impl PackageRecord {
    /// Cache identity: unique per (name, version, build)
    pub fn identity(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.build_string)
    }

    /// True when two records describe the same package content
    pub fn same_content(&self, other: &PackageRecord) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.build_string == other.build_string
    }

    /// Best available content hash, preferring sha256 over md5
    pub fn content_hash(&self) -> Option<(&'static str, &str)> {
        if let Some(ref h) = self.sha256 {
            Some(("sha256", h.as_str()))
        } else {
            self.md5.as_deref().map(|h| ("md5", h))
        }
    }
}

impl fmt::Display for PackageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}={}", self.name, self.version, self.build_string)
    }
}

/// Channel/platform information block of a repodata document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepodataInfo {
    #[serde(default)]
    pub subdir: String,
}

/// One channel+platform repodata document
///
/// Deserialized verbatim from the cache file or the network payload; the
/// `packages` map is keyed by archive filename.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Repodata {
    #[serde(default)]
    pub info: RepodataInfo,
    #[serde(default)]
    pub packages: HashMap<String, PackageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repodata_version: Option<u32>,
}
