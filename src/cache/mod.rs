// src/cache/mod.rs

//! Shared package cache
//!
//! Extracted packages live in one directory per package identity
//! (`name-version-build`) inside a cache root; raw archives sit in an
//! `archives/` side area keyed by the same identity. Several roots can be
//! configured in priority order: lookups take the first hit, new work goes
//! to the first (writable) root.
//!
//! Extraction is at-most-once per identity. A per-identity file lock
//! serializes concurrent callers, and the extracted tree is staged in a
//! private temp directory and renamed into place, so other processes either
//! see nothing or a fully populated directory.

mod archive;

pub use archive::{ArchiveFormat, extract_archive};

use crate::error::{Error, Result};
use crate::fetch::HttpClient;
use crate::hash;
use crate::record::PackageRecord;
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Side area for raw downloaded archives within a cache root
const ARCHIVE_DIR: &str = "archives";

/// Lock files directory within the writable cache root
const LOCK_DIR: &str = "locks";

/// Prefix for in-progress extraction directories
const STAGING_PREFIX: &str = ".staging-";

/// Multi-root package cache
#[derive(Debug)]
pub struct PackageCache {
    roots: Vec<PathBuf>,
}

impl PackageCache {
    /// Open a cache over `roots` in priority order
    ///
    /// The first root is the writable one and is created (with its side
    /// areas) if missing; later roots are read-only fallbacks.
    pub fn new(roots: Vec<PathBuf>) -> Result<Self> {
        let Some(writable) = roots.first() else {
            return Err(Error::Config("no package cache configured".to_string()));
        };
        fs::create_dir_all(writable.join(ARCHIVE_DIR))?;
        fs::create_dir_all(writable.join(LOCK_DIR))?;
        Ok(Self { roots })
    }

    /// Open the cache configured in a context
    pub fn from_context(ctx: &crate::context::Context) -> Result<Self> {
        Self::new(ctx.package_cache_dirs.clone())
    }

    fn writable_root(&self) -> &Path {
        &self.roots[0]
    }

    /// File name under `archives/` for a record
    fn archive_file_name(record: &PackageRecord) -> String {
        if !record.filename.is_empty() {
            record.filename.clone()
        } else {
            format!("{}.tar", record.identity())
        }
    }

    /// Look up a finished extraction across all roots
    pub fn find_extracted(&self, record: &PackageRecord) -> Option<PathBuf> {
        let identity = record.identity();
        self.roots
            .iter()
            .map(|root| root.join(&identity))
            .find(|dir| dir.is_dir())
    }

    /// Look up a downloaded archive across all roots
    pub fn find_archive(&self, record: &PackageRecord) -> Option<PathBuf> {
        let name = Self::archive_file_name(record);
        self.roots
            .iter()
            .map(|root| root.join(ARCHIVE_DIR).join(&name))
            .find(|file| file.is_file())
    }

    /// Destination for a fresh archive download
    pub fn archive_dest(&self, record: &PackageRecord) -> PathBuf {
        self.writable_root()
            .join(ARCHIVE_DIR)
            .join(Self::archive_file_name(record))
    }

    /// Ensure the package is extracted, returning the extraction directory
    ///
    /// Resolution order: existing extraction in any root, else archive in
    /// any root, else download into the writable root. The archive is hash
    /// verified before extraction; a mismatch is fatal to the caller's step
    /// and is never retried here.
    pub fn ensure_extracted(
        &self,
        record: &PackageRecord,
        client: &HttpClient,
    ) -> Result<PathBuf> {
        if let Some(dir) = self.find_extracted(record) {
            debug!("cache hit for {}", record.identity());
            return Ok(dir);
        }

        let _lock = self.lock_identity(record)?;

        // Another caller may have finished while we waited on the lock
        if let Some(dir) = self.find_extracted(record) {
            debug!("cache hit for {} after waiting on lock", record.identity());
            return Ok(dir);
        }

        let archive = self.ensure_archive(record, client)?;
        self.extract_into_place(record, &archive)
    }

    /// Ensure the package's archive is present and verified
    pub fn ensure_archive(&self, record: &PackageRecord, client: &HttpClient) -> Result<PathBuf> {
        if let Some(existing) = self.find_archive(record) {
            match verify_archive(&existing, record) {
                Ok(()) => {
                    debug!("using cached archive {}", existing.display());
                    return Ok(existing);
                }
                Err(e) => {
                    warn!(
                        "cached archive {} failed verification ({}), refetching",
                        existing.display(),
                        e
                    );
                    let _ = fs::remove_file(&existing);
                }
            }
        }

        if record.url.is_empty() {
            return Err(Error::Fetch {
                url: record.identity(),
                reason: "record has no download URL".to_string(),
            });
        }

        let dest = self.archive_dest(record);
        info!("downloading {}", record.identity());
        client.download_file(&record.url, &dest)?;

        if let Err(e) = verify_archive(&dest, record) {
            let _ = fs::remove_file(&dest);
            return Err(e);
        }
        Ok(dest)
    }

    /// Extract under a staging directory, then publish atomically
    fn extract_into_place(&self, record: &PackageRecord, archive: &Path) -> Result<PathBuf> {
        let final_dir = self.writable_root().join(record.identity());

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(self.writable_root())?;
        let staging_path = staging.into_path();

        if let Err(e) = extract_archive(archive, &staging_path) {
            let _ = fs::remove_dir_all(&staging_path);
            return Err(e);
        }

        match fs::rename(&staging_path, &final_dir) {
            Ok(()) => {
                info!("extracted {} to {}", record.identity(), final_dir.display());
                Ok(final_dir)
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&staging_path);
                // A concurrent process may have published first; that
                // result is just as good
                if final_dir.is_dir() {
                    debug!("extraction of {} lost the publish race", record.identity());
                    Ok(final_dir)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    /// Take the per-identity extraction lock (blocks until acquired)
    fn lock_identity(&self, record: &PackageRecord) -> Result<File> {
        let lock_path = self
            .writable_root()
            .join(LOCK_DIR)
            .join(format!("{}.lock", record.identity()));
        let lock_file = File::create(&lock_path)?;
        lock_file.lock_exclusive()?;
        Ok(lock_file)
    }
}

/// Verify an archive against the record's hash, when the record carries one
fn verify_archive(path: &Path, record: &PackageRecord) -> Result<()> {
    match record.content_hash() {
        Some((algorithm, expected)) => hash::verify_file(path, algorithm, expected),
        None => {
            warn!("record {} carries no content hash", record.identity());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::archive::test_support::write_tar_gz;
    use super::*;
    use crate::version::Version;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(name: &str, version: &str, build: &str) -> PackageRecord {
        PackageRecord {
            name: name.to_string(),
            version: Version::parse(version).unwrap(),
            build_string: build.to_string(),
            build_number: 0,
            depends: Vec::new(),
            constrains: Vec::new(),
            size: None,
            sha256: None,
            md5: None,
            subdir: String::new(),
            filename: String::new(),
            channel: "main".to_string(),
            url: String::new(),
        }
    }

    fn client() -> HttpClient {
        HttpClient::new(true, 0).unwrap()
    }

    /// Seed an archive for `record` into the cache's archive area
    fn seed_archive(cache: &PackageCache, rec: &mut PackageRecord, entries: &[(&str, &[u8])]) {
        rec.filename = format!("{}.tar.gz", rec.identity());
        let dest = cache.archive_dest(rec);
        write_tar_gz(&dest, entries);
        rec.sha256 = Some(hash::sha256_file(&dest).unwrap());
    }

    #[test]
    fn test_ensure_extracted_from_seeded_archive() {
        let tmp = TempDir::new().unwrap();
        let cache = PackageCache::new(vec![tmp.path().to_path_buf()]).unwrap();
        let mut rec = record("zlib", "1.2.13", "h0");
        seed_archive(&cache, &mut rec, &[("lib/libz.so", b"elf".as_slice())]);

        let dir = cache.ensure_extracted(&rec, &client()).unwrap();
        assert_eq!(dir, tmp.path().join("zlib-1.2.13-h0"));
        assert_eq!(fs::read(dir.join("lib/libz.so")).unwrap(), b"elf");

        // Second call is a pure cache hit
        let again = cache.ensure_extracted(&rec, &client()).unwrap();
        assert_eq!(again, dir);
    }

    #[test]
    fn test_corrupt_archive_is_integrity_error() {
        let tmp = TempDir::new().unwrap();
        let cache = PackageCache::new(vec![tmp.path().to_path_buf()]).unwrap();
        let mut rec = record("zlib", "1.2.13", "h0");
        seed_archive(&cache, &mut rec, &[("lib/libz.so", b"elf".as_slice())]);
        // Claim a different hash than the seeded archive's
        rec.sha256 = Some("00".repeat(32));
        rec.url = String::new();

        let err = cache.ensure_extracted(&rec, &client()).unwrap_err();
        // The mismatching archive was deleted and no URL exists to refetch
        assert!(matches!(err, Error::Fetch { .. }));
        assert!(cache.find_archive(&rec).is_none());
    }

    #[test]
    fn test_multi_root_first_hit_wins() {
        let primary = TempDir::new().unwrap();
        let secondary = TempDir::new().unwrap();

        // Extraction already present in the read-only secondary root
        let rec = record("zlib", "1.2.13", "h0");
        let existing = secondary.path().join(rec.identity());
        fs::create_dir_all(existing.join("lib")).unwrap();
        fs::write(existing.join("lib/libz.so"), b"elf").unwrap();

        let cache = PackageCache::new(vec![
            primary.path().to_path_buf(),
            secondary.path().to_path_buf(),
        ])
        .unwrap();

        let dir = cache.ensure_extracted(&rec, &client()).unwrap();
        assert_eq!(dir, existing);
        // Nothing was written into the writable root
        assert!(!primary.path().join(rec.identity()).exists());
    }

    #[test]
    fn test_concurrent_extraction_is_exactly_once() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(PackageCache::new(vec![tmp.path().to_path_buf()]).unwrap());
        let mut rec = record("zlib", "1.2.13", "h0");
        seed_archive(&cache, &mut rec, &[("lib/libz.so", b"elf".as_slice())]);
        let rec = Arc::new(rec);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let rec = Arc::clone(&rec);
            handles.push(std::thread::spawn(move || {
                let client = HttpClient::new(true, 0).unwrap();
                cache.ensure_extracted(&rec, &client)
            }));
        }

        let expected = tmp.path().join(rec.identity());
        for handle in handles {
            let dir = handle.join().unwrap().unwrap();
            assert_eq!(dir, expected);
            assert_eq!(fs::read(dir.join("lib/libz.so")).unwrap(), b"elf");
        }

        // No staging leftovers: only the published dir plus side areas
        let mut entries: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        assert_eq!(entries, vec![
            ARCHIVE_DIR.to_string(),
            LOCK_DIR.to_string(),
            rec.identity(),
        ]);
    }

    #[test]
    fn test_download_into_writable_root() {
        let mut server = mockito::Server::new();
        let tmp = TempDir::new().unwrap();
        let cache = PackageCache::new(vec![tmp.path().to_path_buf()]).unwrap();

        // Build the archive somewhere else and serve it over HTTP
        let staging = TempDir::new().unwrap();
        let archive_path = staging.path().join("pkg.tar.gz");
        write_tar_gz(&archive_path, &[("bin/tool", b"bin".as_slice())]);
        let body = fs::read(&archive_path).unwrap();

        let mut rec = record("tool", "2.0", "0");
        rec.filename = "tool-2.0-0.tar.gz".to_string();
        rec.sha256 = Some(hash::sha256_file(&archive_path).unwrap());
        rec.url = format!("{}/main/linux-64/tool-2.0-0.tar.gz", server.url());

        server
            .mock("GET", "/main/linux-64/tool-2.0-0.tar.gz")
            .with_status(200)
            .with_body(body)
            .create();

        let dir = cache.ensure_extracted(&rec, &client()).unwrap();
        assert_eq!(fs::read(dir.join("bin/tool")).unwrap(), b"bin");
        assert!(cache.find_archive(&rec).is_some());
    }
}
