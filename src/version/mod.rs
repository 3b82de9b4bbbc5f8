// src/version/mod.rs

//! Version handling and constraint satisfaction for package dependencies
//!
//! Versions follow the channel ecosystem's grammar: an optional `epoch!`
//! prefix followed by segments separated by `.`, `-` or `_`, where each
//! segment is an alternating run of numbers and letters. Ordering compares
//! the epoch first, then segments atom by atom with implicit zero padding,
//! so `1.0 == 1.0.0`. Alphabetic atoms sort before numeric ones, which makes
//! `1.0a1` a pre-release of `1.0`; the special atoms `dev` and `post` sort
//! below and above everything else in their position.

use crate::error::{Error, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// One comparable unit inside a version segment
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Atom {
    /// `dev` marker, sorts before everything
    Dev,
    /// Alphabetic run, sorts before numbers (`1.0a < 1.0`)
    Alpha(String),
    /// Numeric run
    Num(u64),
    /// `post` marker, sorts after everything
    Post,
}

impl Atom {
    fn rank(&self) -> u8 {
        match self {
            Atom::Dev => 0,
            Atom::Alpha(_) => 1,
            Atom::Num(_) => 2,
            Atom::Post => 3,
        }
    }
}

impl Ord for Atom {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Atom::Alpha(a), Atom::Alpha(b)) => a.cmp(b),
            (Atom::Num(a), Atom::Num(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Atom {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed package version
///
/// Keeps the source string for display and serialization; comparisons use
/// the parsed form only.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    epoch: u64,
    segments: Vec<Vec<Atom>>,
}

impl Version {
    /// Parse a version string
    ///
    /// Examples:
    /// - "1.2.3" → epoch=0, segments [[1], [2], [3]]
    /// - "2!1.0" → epoch=2, segments [[1], [0]]
    /// - "1.0a1" → segments [[1], [0, "a", 1]]
    /// - "1.0.post1" → segments [[1], [0], [post, 1]]
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(Error::InvalidVersion {
                input: s.to_string(),
                reason: "empty version string".to_string(),
            });
        }

        let lower = raw.to_ascii_lowercase();
        let (epoch, rest) = match lower.split_once('!') {
            Some((e, r)) => {
                let epoch = e.parse::<u64>().map_err(|_| Error::InvalidVersion {
                    input: s.to_string(),
                    reason: format!("invalid epoch '{e}'"),
                })?;
                (epoch, r)
            }
            None => (0, lower.as_str()),
        };

        if rest.is_empty() {
            return Err(Error::InvalidVersion {
                input: s.to_string(),
                reason: "missing version after epoch".to_string(),
            });
        }

        let mut segments = Vec::new();
        for component in rest.split(['.', '-', '_']) {
            if component.is_empty() {
                return Err(Error::InvalidVersion {
                    input: s.to_string(),
                    reason: "empty version segment".to_string(),
                });
            }
            segments.push(parse_segment(component, s)?);
        }

        Ok(Self {
            raw: raw.to_string(),
            epoch,
            segments,
        })
    }

    /// The version's epoch (0 unless an `epoch!` prefix was given)
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The source string this version was parsed from
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True if `self` lies within the component prefix described by
    /// `prefix`, e.g. `1.0.1` and `1.0a` both start with `1.0`.
    pub fn starts_with(&self, prefix: &Version) -> bool {
        if self.epoch != prefix.epoch {
            return false;
        }
        let empty: Vec<Atom> = Vec::new();
        for (i, want) in prefix.segments.iter().enumerate() {
            let have = self.segments.get(i).unwrap_or(&empty);
            if cmp_segments(have, want) != Ordering::Equal {
                return false;
            }
        }
        true
    }

    fn cmp_parsed(&self, other: &Version) -> Ordering {
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            ord => return ord,
        }

        let len = self.segments.len().max(other.segments.len());
        let zero = vec![Atom::Num(0)];
        for i in 0..len {
            let a = self.segments.get(i).unwrap_or(&zero);
            let b = other.segments.get(i).unwrap_or(&zero);
            match cmp_segments(a, b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    /// Segments with trailing implicit zeros removed; the canonical form
    /// hashing and equality are defined over.
    fn normalized(&self) -> (u64, Vec<Vec<Atom>>) {
        let mut segments: Vec<Vec<Atom>> = self
            .segments
            .iter()
            .map(|seg| {
                let mut seg = seg.clone();
                while seg.last() == Some(&Atom::Num(0)) {
                    seg.pop();
                }
                seg
            })
            .collect();
        while segments.last().is_some_and(|s| s.is_empty()) {
            segments.pop();
        }
        (self.epoch, segments)
    }
}

/// Split a segment into numeric and alphabetic runs
fn parse_segment(component: &str, input: &str) -> Result<Vec<Atom>> {
    let mut atoms = Vec::new();
    let mut chars = component.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut run = String::new();
            while let Some(&d) = chars.peek() {
                if !d.is_ascii_digit() {
                    break;
                }
                run.push(d);
                chars.next();
            }
            let n = run.parse::<u64>().map_err(|_| Error::InvalidVersion {
                input: input.to_string(),
                reason: format!("numeric component '{run}' out of range"),
            })?;
            atoms.push(Atom::Num(n));
        } else if c.is_ascii_alphabetic() {
            let mut run = String::new();
            while let Some(&a) = chars.peek() {
                if !a.is_ascii_alphabetic() {
                    break;
                }
                run.push(a);
                chars.next();
            }
            atoms.push(match run.as_str() {
                "dev" => Atom::Dev,
                "post" => Atom::Post,
                _ => Atom::Alpha(run),
            });
        } else {
            return Err(Error::InvalidVersion {
                input: input.to_string(),
                reason: format!("unexpected character '{c}'"),
            });
        }
    }
    Ok(atoms)
}

fn cmp_segments(a: &[Atom], b: &[Atom]) -> Ordering {
    let len = a.len().max(b.len());
    let zero = Atom::Num(0);
    for i in 0..len {
        let x = a.get(i).unwrap_or(&zero);
        let y = b.get(i).unwrap_or(&zero);
        match x.cmp(y) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    Ordering::Equal
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_parsed(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_parsed(other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(D::Error::custom)
    }
}

/// Version constraint operators
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VersionSpec {
    /// Any version is acceptable
    Any,
    /// Exact version match (`==1.2.3` or a bare `1.2.3`)
    Equal(Version),
    /// Not equal
    NotEqual(Version),
    /// Greater than
    Greater(Version),
    /// Greater than or equal
    GreaterEq(Version),
    /// Less than
    Less(Version),
    /// Less than or equal
    LessEq(Version),
    /// Component prefix match (`1.0.*`, or the fuzzy form `=1.0`)
    StartsWith(Version),
    /// Negated prefix match (`!=1.0.*`)
    NotStartsWith(Version),
    /// Both constraints must hold (`>=1.0,<2.0`)
    And(Box<VersionSpec>, Box<VersionSpec>),
    /// Either constraint may hold (`1.0|2.0`)
    Or(Box<VersionSpec>, Box<VersionSpec>),
}

impl VersionSpec {
    /// Parse a version constraint expression
    ///
    /// `|` binds loosest, then `,`; a unit is an operator-prefixed version
    /// or a glob. An empty string or `*` accepts anything.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(VersionSpec::Any);
        }

        if let Some((left, right)) = s.split_once('|') {
            let l = Self::parse(left)?;
            let r = Self::parse(right)?;
            return Ok(VersionSpec::Or(Box::new(l), Box::new(r)));
        }
        if let Some((left, right)) = s.split_once(',') {
            let l = Self::parse(left)?;
            let r = Self::parse(right)?;
            return Ok(VersionSpec::And(Box::new(l), Box::new(r)));
        }

        Self::parse_unit(s)
    }

    fn parse_unit(s: &str) -> Result<Self> {
        if let Some(rest) = s.strip_prefix("==") {
            let rest = rest.trim();
            match strip_glob(rest) {
                Some(prefix) => Ok(VersionSpec::StartsWith(Version::parse(prefix)?)),
                None => Ok(VersionSpec::Equal(Version::parse(rest)?)),
            }
        } else if let Some(rest) = s.strip_prefix("!=") {
            let rest = rest.trim();
            match strip_glob(rest) {
                Some(prefix) => Ok(VersionSpec::NotStartsWith(Version::parse(prefix)?)),
                None => Ok(VersionSpec::NotEqual(Version::parse(rest)?)),
            }
        } else if let Some(rest) = s.strip_prefix(">=") {
            Ok(VersionSpec::GreaterEq(Version::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix("<=") {
            Ok(VersionSpec::LessEq(Version::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix('>') {
            Ok(VersionSpec::Greater(Version::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix('<') {
            Ok(VersionSpec::Less(Version::parse(rest.trim())?))
        } else if let Some(rest) = s.strip_prefix('=') {
            // Single '=' is the fuzzy form: =1.0 matches 1.0.*
            let rest = rest.trim();
            let prefix = strip_glob(rest).unwrap_or(rest);
            if prefix.is_empty() {
                return Err(Error::InvalidMatchSpec {
                    input: s.to_string(),
                    reason: "missing version after '='".to_string(),
                });
            }
            Ok(VersionSpec::StartsWith(Version::parse(prefix)?))
        } else {
            match strip_glob(s) {
                Some(prefix) => Ok(VersionSpec::StartsWith(Version::parse(prefix)?)),
                None => Ok(VersionSpec::Equal(Version::parse(s)?)),
            }
        }
    }

    /// Check whether a version satisfies this constraint
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            VersionSpec::Any => true,
            VersionSpec::Equal(v) => version == v,
            VersionSpec::NotEqual(v) => version != v,
            VersionSpec::Greater(v) => version > v,
            VersionSpec::GreaterEq(v) => version >= v,
            VersionSpec::Less(v) => version < v,
            VersionSpec::LessEq(v) => version <= v,
            VersionSpec::StartsWith(v) => version.starts_with(v),
            VersionSpec::NotStartsWith(v) => !version.starts_with(v),
            VersionSpec::And(l, r) => l.satisfies(version) && r.satisfies(version),
            VersionSpec::Or(l, r) => l.satisfies(version) || r.satisfies(version),
        }
    }
}

/// Strip a trailing glob (`.*` or `*`), returning the prefix to match
fn strip_glob(s: &str) -> Option<&str> {
    if let Some(prefix) = s.strip_suffix(".*") {
        Some(prefix)
    } else {
        s.strip_suffix('*')
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Any => write!(f, "*"),
            VersionSpec::Equal(v) => write!(f, "=={v}"),
            VersionSpec::NotEqual(v) => write!(f, "!={v}"),
            VersionSpec::Greater(v) => write!(f, ">{v}"),
            VersionSpec::GreaterEq(v) => write!(f, ">={v}"),
            VersionSpec::Less(v) => write!(f, "<{v}"),
            VersionSpec::LessEq(v) => write!(f, "<={v}"),
            VersionSpec::StartsWith(v) => write!(f, "{v}.*"),
            VersionSpec::NotStartsWith(v) => write!(f, "!={v}.*"),
            VersionSpec::And(l, r) => write!(f, "{l},{r}"),
            VersionSpec::Or(l, r) => write!(f, "{l}|{r}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_version_parse_simple() {
        let ver = v("1.2.3");
        assert_eq!(ver.epoch(), 0);
        assert_eq!(ver.as_str(), "1.2.3");
    }

    #[test]
    fn test_version_parse_epoch() {
        assert_eq!(v("2!1.2.3").epoch(), 2);
        assert!(v("1!1.0") > v("99.0"));
    }

    #[test]
    fn test_version_parse_invalid() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1..2").is_err());
        assert!(Version::parse("x!1.0").is_err());
        assert!(Version::parse("1.0+local").is_err());
    }

    #[test]
    fn test_version_ordering() {
        assert!(v("1.2.3") < v("1.2.4"));
        assert!(v("1.2") < v("1.10"));
        assert!(v("1.0.1") > v("1.0"));
        assert!(v("2.0") > v("1.99.99"));
    }

    #[test]
    fn test_version_implicit_zero_padding() {
        assert_eq!(v("1.0"), v("1.0.0"));
        assert_eq!(v("1"), v("1.0"));
        assert!(v("1.0") < v("1.0.1"));
    }

    #[test]
    fn test_version_prerelease_ordering() {
        assert!(v("1.0a1") < v("1.0"));
        assert!(v("1.0a1") < v("1.0b1"));
        assert!(v("1.0rc1") < v("1.0"));
        assert!(v("1.0dev1") < v("1.0a1"));
        assert!(v("1.0.dev1") < v("1.0"));
        assert!(v("1.0.post1") > v("1.0"));
    }

    #[test]
    fn test_version_separators_equivalent() {
        assert_eq!(v("1.0-1"), v("1.0.1"));
        assert_eq!(v("1.0_1"), v("1.0.1"));
    }

    #[test]
    fn test_version_starts_with() {
        assert!(v("1.0.1").starts_with(&v("1.0")));
        assert!(v("1.0").starts_with(&v("1.0")));
        assert!(v("1.0a").starts_with(&v("1.0")));
        assert!(!v("1.1").starts_with(&v("1.0")));
        assert!(!v("1!1.0").starts_with(&v("1.0")));
    }

    #[test]
    fn test_version_hash_consistent_with_eq() {
        use std::collections::hash_map::DefaultHasher;

        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        v("1.0").hash(&mut h1);
        v("1.0.0").hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn test_spec_any() {
        let spec = VersionSpec::parse("*").unwrap();
        assert!(spec.satisfies(&v("99.99")));
        assert_eq!(VersionSpec::parse("").unwrap(), VersionSpec::Any);
    }

    #[test]
    fn test_spec_operators() {
        let spec = VersionSpec::parse(">=1.2.0").unwrap();
        assert!(spec.satisfies(&v("1.2.0")));
        assert!(spec.satisfies(&v("1.3")));
        assert!(!spec.satisfies(&v("1.1.9")));

        let spec = VersionSpec::parse("<2.0").unwrap();
        assert!(spec.satisfies(&v("1.9.9")));
        assert!(!spec.satisfies(&v("2.0")));

        let spec = VersionSpec::parse("!=1.5").unwrap();
        assert!(spec.satisfies(&v("1.4")));
        assert!(!spec.satisfies(&v("1.5")));
    }

    #[test]
    fn test_spec_bare_version_is_exact() {
        let spec = VersionSpec::parse("1.2.3").unwrap();
        assert!(spec.satisfies(&v("1.2.3")));
        assert!(!spec.satisfies(&v("1.2.3.1")));
    }

    #[test]
    fn test_spec_glob() {
        let spec = VersionSpec::parse("1.0.*").unwrap();
        assert!(spec.satisfies(&v("1.0")));
        assert!(spec.satisfies(&v("1.0.7")));
        assert!(!spec.satisfies(&v("1.1")));

        // Fuzzy single '=' behaves like a prefix match
        let spec = VersionSpec::parse("=1.0").unwrap();
        assert!(spec.satisfies(&v("1.0.7")));
        assert!(!spec.satisfies(&v("1.1")));

        let spec = VersionSpec::parse("!=1.0.*").unwrap();
        assert!(!spec.satisfies(&v("1.0.7")));
        assert!(spec.satisfies(&v("1.1")));
    }

    #[test]
    fn test_spec_and_or() {
        let spec = VersionSpec::parse(">=1.0,<2.0").unwrap();
        assert!(spec.satisfies(&v("1.5")));
        assert!(!spec.satisfies(&v("2.0")));
        assert!(!spec.satisfies(&v("0.9")));

        let spec = VersionSpec::parse("1.0|2.0").unwrap();
        assert!(spec.satisfies(&v("1.0")));
        assert!(spec.satisfies(&v("2.0")));
        assert!(!spec.satisfies(&v("1.5")));
    }

    #[test]
    fn test_spec_display_roundtrip() {
        for input in [">=1.2.0", "<2.0", "==1.5", ">=1.0,<2.0"] {
            let spec = VersionSpec::parse(input).unwrap();
            let reparsed = VersionSpec::parse(&spec.to_string()).unwrap();
            assert_eq!(spec, reparsed);
        }
    }
}
