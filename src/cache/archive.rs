// src/cache/archive.rs

//! Package archive format detection and extraction
//!
//! Archives are tarballs compressed with gzip, xz or zstd (or left plain).
//! Detection prefers magic bytes over the filename so mislabeled downloads
//! still extract.

use crate::error::{Error, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// Supported archive encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Uncompressed tar
    Tar,
    /// Gzip-compressed tar (.tar.gz, .tgz)
    TarGz,
    /// XZ-compressed tar (.tar.xz)
    TarXz,
    /// Zstandard-compressed tar (.tar.zst)
    TarZst,
}

impl ArchiveFormat {
    /// Detect from a filename
    pub fn from_extension(name: &str) -> Option<Self> {
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar.xz") {
            Some(Self::TarXz)
        } else if name.ends_with(".tar.zst") || name.ends_with(".tar.zstd") {
            Some(Self::TarZst)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Detect from leading magic bytes
    ///
    /// Magic bytes:
    /// - Gzip: `1f 8b`
    /// - XZ: `fd 37 7a 58 5a 00`
    /// - Zstd: `28 b5 2f fd`
    pub fn from_magic_bytes(data: &[u8]) -> Option<Self> {
        if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
            Some(Self::TarGz)
        } else if data.len() >= 6 && data[..6] == [0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00] {
            Some(Self::TarXz)
        } else if data.len() >= 4 && data[..4] == [0x28, 0xb5, 0x2f, 0xfd] {
            Some(Self::TarZst)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
            Self::TarXz => "tar.xz",
            Self::TarZst => "tar.zst",
        }
    }
}

/// Detect the format of an archive file, magic bytes first
fn detect(path: &Path) -> Result<ArchiveFormat> {
    let mut file = File::open(path)?;
    let mut head = [0u8; 6];
    let n = file.read(&mut head)?;
    file.seek(SeekFrom::Start(0))?;

    if let Some(format) = ArchiveFormat::from_magic_bytes(&head[..n]) {
        return Ok(format);
    }

    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    ArchiveFormat::from_extension(name).ok_or_else(|| Error::Extract {
        path: path.to_path_buf(),
        reason: "unrecognized archive format".to_string(),
    })
}

/// Unpack an archive into a directory
///
/// The destination must already exist; entries escaping it are rejected by
/// the tar layer.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let format = detect(archive)?;
    let file = File::open(archive)?;
    let reader = BufReader::new(file);

    let decoder: Box<dyn Read> = match format {
        ArchiveFormat::Tar => Box::new(reader),
        ArchiveFormat::TarGz => Box::new(flate2::read::GzDecoder::new(reader)),
        ArchiveFormat::TarXz => Box::new(xz2::read::XzDecoder::new(reader)),
        ArchiveFormat::TarZst => {
            Box::new(zstd::Decoder::new(reader).map_err(|e| Error::Extract {
                path: archive.to_path_buf(),
                reason: format!("failed to create {} decoder: {e}", format.name()),
            })?)
        }
    };

    tar::Archive::new(decoder)
        .unpack(dest)
        .map_err(|e| Error::Extract {
            path: archive.to_path_buf(),
            reason: format!("failed to unpack {} archive: {e}", format.name()),
        })
}
