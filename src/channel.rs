// src/channel.rs

//! Channel and platform identity
//!
//! A channel is a named base URL under which per-platform subdirectories
//! hold repodata and package archives. Shorthand names ("main", "extras")
//! resolve against a configurable alias base URL, mirroring how full URLs
//! are accepted verbatim.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumIter, EnumString};
use url::Url;

/// Default base URL that channel shorthand names resolve against
pub const DEFAULT_CHANNEL_ALIAS: &str = "https://channels.pangolin.dev";

/// A platform subdirectory within a channel
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
pub enum Platform {
    #[strum(serialize = "linux-64")]
    #[serde(rename = "linux-64")]
    Linux64,
    #[strum(serialize = "linux-aarch64")]
    #[serde(rename = "linux-aarch64")]
    LinuxAarch64,
    #[strum(serialize = "osx-64")]
    #[serde(rename = "osx-64")]
    Osx64,
    #[strum(serialize = "osx-arm64")]
    #[serde(rename = "osx-arm64")]
    OsxArm64,
    #[strum(serialize = "win-64")]
    #[serde(rename = "win-64")]
    Win64,
    /// Platform-independent packages, loaded alongside the native platform
    #[strum(serialize = "noarch")]
    #[serde(rename = "noarch")]
    Noarch,
}

impl Platform {
    /// The platform of the running host
    pub fn current() -> Self {
        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        {
            Platform::Linux64
        }
        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        {
            Platform::LinuxAarch64
        }
        #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
        {
            Platform::Osx64
        }
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            Platform::OsxArm64
        }
        #[cfg(target_os = "windows")]
        {
            Platform::Win64
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            Platform::Noarch
        }
    }
}

/// A named, prioritized metadata source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Short display name ("main", "extras", or the last URL component)
    pub name: String,
    /// Base URL; platform subdirectories hang off this
    pub base_url: Url,
}

impl Channel {
    /// Resolve a channel from either a full URL or a shorthand name
    ///
    /// Shorthand names are joined onto `alias`; full URLs are taken as-is
    /// with the last path component as the display name.
    pub fn from_str_with_alias(input: &str, alias: &str) -> Result<Self> {
        let input = input.trim().trim_end_matches('/');
        if input.is_empty() {
            return Err(Error::Config("empty channel name".to_string()));
        }

        if input.contains("://") {
            let base_url = Url::parse(input)
                .map_err(|e| Error::Config(format!("invalid channel URL '{input}': {e}")))?;
            let name = base_url
                .path_segments()
                .and_then(|mut s| s.next_back())
                .filter(|s| !s.is_empty())
                .unwrap_or(input)
                .to_string();
            Ok(Self { name, base_url })
        } else {
            let joined = format!("{}/{}", alias.trim_end_matches('/'), input);
            let base_url = Url::parse(&joined)
                .map_err(|e| Error::Config(format!("invalid channel alias URL '{joined}': {e}")))?;
            Ok(Self {
                name: input.to_string(),
                base_url,
            })
        }
    }

    /// Resolve against the default alias
    pub fn from_name(input: &str) -> Result<Self> {
        Self::from_str_with_alias(input, DEFAULT_CHANNEL_ALIAS)
    }

    /// Base URL of one platform subdirectory of this channel
    pub fn platform_url(&self, platform: Platform) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            platform
        )
    }

    /// URL of the repodata document for one platform subdirectory
    pub fn repodata_url(&self, platform: Platform) -> String {
        format!("{}/repodata.json", self.platform_url(platform))
    }

    /// Identity used for cache naming and logging, e.g. "main/linux-64"
    pub fn subdir_id(&self, platform: Platform) -> String {
        format!("{}/{}", self.name, platform)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
