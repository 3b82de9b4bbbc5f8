// src/context.rs

//! Invocation configuration
//!
//! All ambient settings (channel list, prefixes, cache locations, behavior
//! flags) live in an explicit [`Context`] value passed into the components
//! that need it. There is no process-wide state; independent invocations
//! with different contexts can run concurrently in one process.

use crate::channel::{Channel, Platform};
use crate::error::{Error, Result};
use std::path::PathBuf;

/// Default number of concurrent download workers
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 5;

/// Default retry budget for transient network failures
pub const DEFAULT_FETCH_RETRIES: u32 = 3;

/// Configuration for one invocation
#[derive(Debug, Clone)]
pub struct Context {
    /// Channels in priority order; the first listed wins ties
    pub channels: Vec<Channel>,
    /// Platform subdirectories to load per channel
    pub platforms: Vec<Platform>,
    /// Root installation prefix (holds the shared package cache)
    pub root_prefix: PathBuf,
    /// Environment being operated on
    pub target_prefix: PathBuf,
    /// Repodata cache directory
    pub repodata_cache_dir: PathBuf,
    /// Package caches in priority order; the first is the writable one
    pub package_cache_dirs: Vec<PathBuf>,
    /// Answer yes to all confirmation prompts
    pub always_yes: bool,
    /// Plan only; never confirm or execute
    pub dry_run: bool,
    /// Never touch the network; serve metadata from cache or fail
    pub offline: bool,
    /// Emit machine-readable reports
    pub json: bool,
    /// Verify TLS certificates (disabling is logged loudly)
    pub ssl_verify: bool,
    /// Allow solutions that downgrade installed packages
    pub allow_downgrade: bool,
    /// Concurrent download workers
    pub download_workers: usize,
    /// Retries per download on transient failure
    pub fetch_retries: u32,
}

impl Context {
    /// Create a context rooted at `root_prefix` with defaults derived from
    /// it: package cache in `<root>/pkgs`, repodata cache in
    /// `<root>/pkgs/cache`, and the root itself as target environment.
    pub fn new(root_prefix: PathBuf) -> Self {
        let pkgs = root_prefix.join("pkgs");
        Self {
            channels: Vec::new(),
            platforms: vec![Platform::current(), Platform::Noarch],
            target_prefix: root_prefix.clone(),
            repodata_cache_dir: pkgs.join("cache"),
            package_cache_dirs: vec![pkgs],
            root_prefix,
            always_yes: false,
            dry_run: false,
            offline: false,
            json: false,
            ssl_verify: true,
            allow_downgrade: false,
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            fetch_retries: DEFAULT_FETCH_RETRIES,
        }
    }

    /// Create a context with the user cache directory as fallback root,
    /// for callers that have no configured root prefix.
    pub fn from_user_dirs() -> Result<Self> {
        let root = dirs::cache_dir()
            .map(|d| d.join("pangolin"))
            .ok_or_else(|| Error::Config("no usable cache directory on this system".to_string()))?;
        Ok(Self::new(root))
    }

    /// Set the environment to operate on
    pub fn with_target_prefix(mut self, target: PathBuf) -> Self {
        self.target_prefix = target;
        self
    }

    /// Set the channel list (priority order)
    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = channels;
        self
    }

    /// Validate the configuration before any I/O happens
    ///
    /// `allow_missing_target` permits a target prefix that does not exist
    /// yet (environment creation); the root prefix and channel list are
    /// always required.
    pub fn validate(&self, allow_missing_target: bool) -> Result<()> {
        if self.root_prefix.as_os_str().is_empty() {
            return Err(Error::Config("root prefix is not set".to_string()));
        }
        if self.target_prefix.as_os_str().is_empty() {
            return Err(Error::Config("target prefix is not set".to_string()));
        }
        if !allow_missing_target && !self.target_prefix.is_dir() {
            return Err(Error::Config(format!(
                "target prefix does not exist: {}",
                self.target_prefix.display()
            )));
        }
        if self.channels.is_empty() {
            return Err(Error::Config("no channels configured".to_string()));
        }
        if self.package_cache_dirs.is_empty() {
            return Err(Error::Config("no package cache configured".to_string()));
        }
        if self.download_workers == 0 {
            return Err(Error::Config("download worker count must be > 0".to_string()));
        }
        Ok(())
    }

    /// Channel/platform pairs to load, in priority order
    pub fn subdirs(&self) -> Vec<(Channel, Platform)> {
        let mut out = Vec::new();
        for channel in &self.channels {
            for &platform in &self.platforms {
                out.push((channel.clone(), platform));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_context_defaults() {
        let ctx = Context::new(PathBuf::from("/opt/env"));
        assert_eq!(ctx.target_prefix, PathBuf::from("/opt/env"));
        assert_eq!(ctx.repodata_cache_dir, PathBuf::from("/opt/env/pkgs/cache"));
        assert_eq!(ctx.package_cache_dirs, vec![PathBuf::from("/opt/env/pkgs")]);
        assert!(ctx.ssl_verify);
        assert!(!ctx.offline);
    }

    #[test]
    fn test_validate_requires_channels() {
        let tmp = TempDir::new().unwrap();
        let ctx = Context::new(tmp.path().to_path_buf());
        let err = ctx.validate(false).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_validate_missing_target() {
        let tmp = TempDir::new().unwrap();
        let ctx = Context::new(tmp.path().to_path_buf())
            .with_channels(vec![Channel::from_name("main").unwrap()])
            .with_target_prefix(tmp.path().join("envs/missing"));

        assert!(ctx.validate(false).is_err());
        assert!(ctx.validate(true).is_ok());
    }

    #[test]
    fn test_subdirs_priority_order() {
        let tmp = TempDir::new().unwrap();
        let ctx = Context::new(tmp.path().to_path_buf()).with_channels(vec![
            Channel::from_name("first").unwrap(),
            Channel::from_name("second").unwrap(),
        ]);

        let subdirs = ctx.subdirs();
        assert_eq!(subdirs.len(), 4);
        assert_eq!(subdirs[0].0.name, "first");
        assert_eq!(subdirs[2].0.name, "second");
    }
}
