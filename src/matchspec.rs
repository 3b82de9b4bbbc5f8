// src/matchspec.rs

//! Match specifications: the grammar of requested packages
//!
//! A match spec names a package plus optional version and build predicates:
//! `zlib`, `zlib>=1.2`, `zlib==1.2.13=h0`, `zlib=1.2`, `main::zlib 1.2.*`.
//! Specs come from user requests and from the `depends` entries of records.

use crate::error::{Error, Result};
use crate::record::PackageRecord;
use crate::version::VersionSpec;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Build string predicate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BuildMatch {
    /// Exact build string
    Exact(String),
    /// Trailing-glob prefix match (`h7b6447c*`)
    StartsWith(String),
}

impl BuildMatch {
    fn parse(s: &str) -> Option<Self> {
        if s.is_empty() || s == "*" {
            return None;
        }
        match s.strip_suffix('*') {
            Some(prefix) => Some(BuildMatch::StartsWith(prefix.to_string())),
            None => Some(BuildMatch::Exact(s.to_string())),
        }
    }

    fn matches(&self, build: &str) -> bool {
        match self {
            BuildMatch::Exact(b) => build == b,
            BuildMatch::StartsWith(prefix) => build.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for BuildMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMatch::Exact(b) => write!(f, "{b}"),
            BuildMatch::StartsWith(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// A parsed package match specification
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchSpec {
    /// Restrict matches to one channel (the `channel::` prefix)
    pub channel: Option<String>,
    /// Package name, lowercased
    pub name: String,
    pub version: VersionSpec,
    pub build: Option<BuildMatch>,
}

impl MatchSpec {
    /// Parse a match spec string
    ///
    /// Accepted forms:
    /// - `name`
    /// - `name<op>version` for `==` `!=` `>` `>=` `<` `<=`
    /// - `name==version=build` and the fuzzy chain `name=version[=build]`
    /// - `name version [build]` (space-separated)
    /// - any of the above prefixed with `channel::`
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidMatchSpec {
            input: input.to_string(),
            reason,
        };

        let s = input.trim();
        let (channel, s) = match s.split_once("::") {
            Some((c, rest)) => {
                if c.is_empty() {
                    return Err(invalid("empty channel before '::'".to_string()));
                }
                (Some(c.to_string()), rest)
            }
            None => (None, s),
        };

        let split_at = s.find([' ', '=', '<', '>', '!']);
        let (name_part, rest) = match split_at {
            Some(idx) => (&s[..idx], s[idx..].trim_start()),
            None => (s, ""),
        };

        let name = name_part.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(invalid("missing package name".to_string()));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid(format!("invalid package name '{name}'")));
        }

        if rest.is_empty() {
            return Ok(Self {
                channel,
                name,
                version: VersionSpec::Any,
                build: None,
            });
        }

        let (version, build) = Self::parse_predicates(rest)?;
        Ok(Self {
            channel,
            name,
            version,
            build,
        })
    }

    /// Parse the portion after the name into version and build predicates
    fn parse_predicates(rest: &str) -> Result<(VersionSpec, Option<BuildMatch>)> {
        // Space-separated form: "1.2.* h0*" or ">=1.0"
        if let Some((ver, build)) = rest.split_once(char::is_whitespace) {
            let build = build.trim();
            if build.contains(char::is_whitespace) {
                return Err(Error::InvalidMatchSpec {
                    input: rest.to_string(),
                    reason: "too many space-separated fields".to_string(),
                });
            }
            let version = VersionSpec::parse(ver)?;
            return Ok((version, BuildMatch::parse(build)));
        }

        if let Some(tail) = rest.strip_prefix("==") {
            // "==1.0=h0" carries an explicit build after the version
            if let Some((ver, build)) = tail.split_once('=') {
                let version = VersionSpec::parse(&format!("=={ver}"))?;
                return Ok((version, BuildMatch::parse(build)));
            }
            return Ok((VersionSpec::parse(rest)?, None));
        }

        if rest.starts_with(['>', '<', '!']) {
            return Ok((VersionSpec::parse(rest)?, None));
        }

        if let Some(tail) = rest.strip_prefix('=') {
            // Fuzzy chain: "=1.0" or "=1.0=h0"
            if let Some((ver, build)) = tail.split_once('=') {
                let version = VersionSpec::parse(&format!("={ver}"))?;
                return Ok((version, BuildMatch::parse(build)));
            }
            return Ok((VersionSpec::parse(rest)?, None));
        }

        Ok((VersionSpec::parse(rest)?, None))
    }

    /// Check whether a record satisfies this spec
    pub fn matches(&self, record: &PackageRecord) -> bool {
        if record.name != self.name {
            return false;
        }
        if let Some(ref channel) = self.channel
            && record.channel != *channel
        {
            return false;
        }
        if !self.version.satisfies(&record.version) {
            return false;
        }
        if let Some(ref build) = self.build
            && !build.matches(&record.build_string)
        {
            return false;
        }
        true
    }

    /// True when the spec constrains nothing beyond the name
    pub fn is_name_only(&self) -> bool {
        self.channel.is_none() && self.version == VersionSpec::Any && self.build.is_none()
    }
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref channel) = self.channel {
            write!(f, "{channel}::")?;
        }
        write!(f, "{}", self.name)?;
        if self.version != VersionSpec::Any {
            write!(f, " {}", self.version)?;
        }
        if let Some(ref build) = self.build {
            write!(f, " {build}")?;
        }
        Ok(())
    }
}

impl FromStr for MatchSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MatchSpec::parse(s)
    }
}

impl Serialize for MatchSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MatchSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        MatchSpec::parse(&s).map_err(D::Error::custom)
    }
}
