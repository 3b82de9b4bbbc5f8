// src/index/mod.rs

//! Per-channel-platform metadata acquisition
//!
//! A [`SubdirIndex`] owns the repodata for one channel+platform pair.
//! Loading goes through the local cache: the payload is persisted verbatim
//! under a URL-derived file name, HTTP validators live in a `.state.json`
//! sidecar, and refreshes are conditional requests. A fetch failure falls
//! back to the cache when one exists; offline mode never touches the
//! network at all.
//!
//! Cache writes are atomic (temp file + rename), so a torn write can never
//! corrupt an existing cache entry.

use crate::channel::{Channel, Platform};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::fetch::{CacheValidators, ConditionalFetch, HttpClient};
use crate::hash;
use crate::record::{PackageRecord, Repodata};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Repodata for one channel+platform, loaded and validated
#[derive(Debug)]
pub struct SubdirIndex {
    channel: Channel,
    platform: Platform,
    records: Vec<PackageRecord>,
    /// True when this load brought down a payload newer than the cache
    was_modified: bool,
}

impl SubdirIndex {
    /// Load the repodata for `channel`/`platform`, using the cache under
    /// `ctx.repodata_cache_dir`.
    pub fn load(
        ctx: &Context,
        client: &HttpClient,
        channel: &Channel,
        platform: Platform,
    ) -> Result<Self> {
        let subdir = channel.subdir_id(platform);
        let url = channel.repodata_url(platform);

        fs::create_dir_all(&ctx.repodata_cache_dir)?;
        let cache_path = ctx.repodata_cache_dir.join(cache_file_name(&url));
        let state_path = cache_path.with_extension("state.json");

        if ctx.offline {
            if cache_path.is_file() {
                debug!("offline: loading {} from cache", subdir);
                let records = parse_cache(&cache_path, channel, platform)?;
                return Ok(Self {
                    channel: channel.clone(),
                    platform,
                    records,
                    was_modified: false,
                });
            }
            return Err(Error::Offline(subdir));
        }

        // Only reuse validators recorded for this exact URL
        let validators = read_state(&state_path)
            .filter(|v| v.url == url)
            .filter(|_| cache_path.is_file());

        let was_modified = match client.fetch_conditional(&url, validators.as_ref()) {
            Ok(ConditionalFetch::NotModified) => {
                debug!("{} unchanged since last fetch", subdir);
                false
            }
            Ok(ConditionalFetch::Fetched { body, validators }) => {
                write_atomic(&cache_path, &body)?;
                write_atomic(&state_path, &serde_json::to_vec_pretty(&validators)?)?;
                info!("refreshed repodata for {}", subdir);
                true
            }
            Err(e) => {
                if cache_path.is_file() {
                    warn!("fetch of {} failed ({}), falling back to cached repodata", subdir, e);
                    false
                } else {
                    return Err(e);
                }
            }
        };

        let records = parse_cache(&cache_path, channel, platform)?;
        Ok(Self {
            channel: channel.clone(),
            platform,
            records,
            was_modified,
        })
    }

    /// Channel this index was loaded from
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// "channel/platform" identity for logs and errors
    pub fn subdir_id(&self) -> String {
        self.channel.subdir_id(self.platform)
    }

    /// True when the last load observed a changed payload
    pub fn was_modified(&self) -> bool {
        self.was_modified
    }

    pub fn records(&self) -> &[PackageRecord] {
        &self.records
    }

    /// Consume the index, yielding its records for Pool registration
    pub fn into_records(self) -> Vec<PackageRecord> {
        self.records
    }
}

/// Load every configured channel+platform pair, in parallel
///
/// All loads complete (or the whole call fails) before the result is
/// returned, so a Pool built from it never sees a partially loaded repo.
/// The returned order matches [`Context::subdirs`]: channel priority order,
/// platforms within a channel.
pub fn load_all(ctx: &Context, client: &HttpClient) -> Result<Vec<SubdirIndex>> {
    let subdirs = ctx.subdirs();
    if subdirs.is_empty() {
        return Ok(Vec::new());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.download_workers.min(subdirs.len()).max(1))
        .build()
        .map_err(|e| Error::Config(format!("failed to create metadata worker pool: {e}")))?;

    pool.install(|| {
        use rayon::prelude::*;

        subdirs
            .par_iter()
            .map(|(channel, platform)| SubdirIndex::load(ctx, client, channel, *platform))
            .collect()
    })
}

/// Deterministic cache file name for a repodata URL
fn cache_file_name(url: &str) -> String {
    format!("{}.json", &hash::sha256_bytes(url.as_bytes())[..16])
}

fn read_state(path: &Path) -> Option<CacheValidators> {
    let data = fs::read(path).ok()?;
    match serde_json::from_slice(&data) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("ignoring unreadable cache state {}: {}", path.display(), e);
            None
        }
    }
}

/// Write a file atomically via a sibling temp file
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Config(format!("cache path has no parent: {}", path.display())))?;
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Parse a cached repodata payload into validated, de-duplicated records
///
/// Fills provenance (channel name, subdir, download URL) and drops
/// duplicate (name, version, build) entries, keeping the first in filename
/// order so the result is deterministic.
fn parse_cache(path: &Path, channel: &Channel, platform: Platform) -> Result<Vec<PackageRecord>> {
    let data = fs::read(path)?;
    let repodata: Repodata = serde_json::from_slice(&data).map_err(|e| {
        Error::Parse(format!(
            "malformed repodata for {}: {}",
            channel.subdir_id(platform),
            e
        ))
    })?;

    let mut filenames: Vec<&String> = repodata.packages.keys().collect();
    filenames.sort();

    let base = channel.platform_url(platform);
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(filenames.len());
    for filename in filenames {
        let mut record = repodata.packages[filename].clone();
        if record.name.is_empty() {
            warn!("skipping record with empty name: {}", filename);
            continue;
        }
        record.name = record.name.to_ascii_lowercase();
        record.filename = filename.clone();
        record.channel = channel.name.clone();
        if record.subdir.is_empty() {
            record.subdir = platform.to_string();
        }
        record.url = format!("{base}/{filename}");

        if !seen.insert(record.identity()) {
            debug!("dropping duplicate record {}", record.identity());
            continue;
        }
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const REPODATA: &str = r#"{
        "info": { "subdir": "linux-64" },
        "packages": {
            "zlib-1.2.13-h0.tar.zst": {
                "name": "zlib", "version": "1.2.13", "build_string": "h0"
            },
            "zlib-1.2.13-h0.tar.gz": {
                "name": "zlib", "version": "1.2.13", "build_string": "h0"
            },
            "bar-1.5-0.tar.zst": {
                "name": "bar", "version": "1.5", "build_string": "0"
            }
        }
    }"#;

    fn test_context(root: &Path, channel_url: &str) -> (Context, Channel) {
        let channel = Channel::from_name(channel_url).unwrap();
        let ctx = Context::new(root.to_path_buf()).with_channels(vec![channel.clone()]);
        (ctx, channel)
    }

    #[test]
    fn test_cache_file_name_deterministic() {
        let a = cache_file_name("https://x.test/main/linux-64/repodata.json");
        let b = cache_file_name("https://x.test/main/linux-64/repodata.json");
        let c = cache_file_name("https://x.test/main/noarch/repodata.json");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".json"));
    }

    #[test]
    fn test_load_fetches_and_caches() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/main/linux-64/repodata.json")
            .with_status(200)
            .with_header("etag", "\"r1\"")
            .with_body(REPODATA)
            .create();

        let tmp = TempDir::new().unwrap();
        let (ctx, channel) = test_context(tmp.path(), &format!("{}/main", server.url()));
        let client = HttpClient::from_context(&ctx).unwrap();

        let index = SubdirIndex::load(&ctx, &client, &channel, Platform::Linux64).unwrap();
        assert!(index.was_modified());
        // Duplicate (name, version, build) under a second filename is dropped
        assert_eq!(index.records().len(), 2);

        let zlib = index.records().iter().find(|r| r.name == "zlib").unwrap();
        assert_eq!(zlib.channel, "main");
        assert_eq!(zlib.subdir, "linux-64");
        assert!(zlib.url.ends_with("/linux-64/zlib-1.2.13-h0.tar.gz"));

        // Cache file holds the payload verbatim
        let cache_path = ctx
            .repodata_cache_dir
            .join(cache_file_name(&channel.repodata_url(Platform::Linux64)));
        assert_eq!(fs::read_to_string(&cache_path).unwrap(), REPODATA);
        assert!(cache_path.with_extension("state.json").is_file());
    }

    #[test]
    fn test_not_modified_uses_cache() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/main/linux-64/repodata.json")
            .with_status(200)
            .with_header("etag", "\"r1\"")
            .with_body(REPODATA)
            .create();
        server
            .mock("GET", "/main/linux-64/repodata.json")
            .match_header("if-none-match", "\"r1\"")
            .with_status(304)
            .create();

        let tmp = TempDir::new().unwrap();
        let (ctx, channel) = test_context(tmp.path(), &format!("{}/main", server.url()));
        let client = HttpClient::from_context(&ctx).unwrap();

        let first = SubdirIndex::load(&ctx, &client, &channel, Platform::Linux64).unwrap();
        assert!(first.was_modified());

        let second = SubdirIndex::load(&ctx, &client, &channel, Platform::Linux64).unwrap();
        assert!(!second.was_modified());
        assert_eq!(second.records().len(), first.records().len());
    }

    #[test]
    fn test_offline_round_trip_matches_direct_parse() {
        let tmp = TempDir::new().unwrap();
        let (mut ctx, channel) = test_context(tmp.path(), "https://unreachable.test/main");
        ctx.offline = true;

        // Seed the cache by hand; no network is available in offline mode
        fs::create_dir_all(&ctx.repodata_cache_dir).unwrap();
        let cache_path = ctx
            .repodata_cache_dir
            .join(cache_file_name(&channel.repodata_url(Platform::Linux64)));
        fs::write(&cache_path, REPODATA).unwrap();

        let client = HttpClient::from_context(&ctx).unwrap();
        let index = SubdirIndex::load(&ctx, &client, &channel, Platform::Linux64).unwrap();
        assert!(!index.was_modified());

        let direct = parse_cache(&cache_path, &channel, Platform::Linux64).unwrap();
        assert_eq!(index.records(), &direct[..]);
    }

    #[test]
    fn test_offline_without_cache_fails() {
        let tmp = TempDir::new().unwrap();
        let (mut ctx, channel) = test_context(tmp.path(), "https://unreachable.test/main");
        ctx.offline = true;

        let client = HttpClient::from_context(&ctx).unwrap();
        let err = SubdirIndex::load(&ctx, &client, &channel, Platform::Linux64).unwrap_err();
        assert!(matches!(err, Error::Offline(_)));
    }

    #[test]
    fn test_fetch_failure_falls_back_to_cache() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/main/linux-64/repodata.json")
            .with_status(500)
            .create();

        let tmp = TempDir::new().unwrap();
        let (ctx, channel) = test_context(tmp.path(), &format!("{}/main", server.url()));

        fs::create_dir_all(&ctx.repodata_cache_dir).unwrap();
        let cache_path = ctx
            .repodata_cache_dir
            .join(cache_file_name(&channel.repodata_url(Platform::Linux64)));
        fs::write(&cache_path, REPODATA).unwrap();

        let client = HttpClient::new(true, 0).unwrap();
        let index = SubdirIndex::load(&ctx, &client, &channel, Platform::Linux64).unwrap();
        assert!(!index.was_modified());
        assert_eq!(index.records().len(), 2);
    }

    #[test]
    fn test_fetch_failure_without_cache_surfaces() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/main/linux-64/repodata.json")
            .with_status(500)
            .create();

        let tmp = TempDir::new().unwrap();
        let (ctx, channel) = test_context(tmp.path(), &format!("{}/main", server.url()));

        let client = HttpClient::new(true, 0).unwrap();
        let err = SubdirIndex::load(&ctx, &client, &channel, Platform::Linux64).unwrap_err();
        assert!(matches!(err, Error::Fetch { .. }));
    }
}
