//! Content identity for single files, whole repositories and full queries.
//!
//! A [`FileFingerprint`] decides whether a cached extraction result is still
//! valid. [`files_key`] folds every tracked file's fingerprint (plus the
//! extractor identity) into one digest that keys the memory tier, and
//! [`QueryKey::digest`] extends that digest with every request parameter
//! that affects output, keying the result tier.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use cartograph_core::{FingerprintMode, OutputFormat, RankConfig};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version tag mixed into every digest so that format changes invalidate old
/// cache entries.
const KEY_VERSION: &str = "cartograph-v1";

/// Identity of one file at one version.
///
/// In metadata mode the fingerprint is `(path, mtime, size)`; in content mode
/// the mtime is zeroed and a SHA-256 of the bytes is recorded instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub path: PathBuf,
    pub mtime_ns: u64,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl FileFingerprint {
    /// Fingerprint from filesystem metadata without reading the file.
    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self {
            path,
            mtime_ns,
            size: metadata.len(),
            content_hash: None,
        }
    }

    /// Fingerprint from file bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::PathBuf;
    /// use cartograph_repomap::fingerprint::FileFingerprint;
    ///
    /// let a = FileFingerprint::from_content(PathBuf::from("a.rs"), b"fn a() {}");
    /// let b = FileFingerprint::from_content(PathBuf::from("a.rs"), b"fn a() {}");
    /// assert_eq!(a, b);
    /// assert_eq!(a.size, 9);
    /// ```
    pub fn from_content(path: PathBuf, bytes: &[u8]) -> Self {
        Self {
            path,
            mtime_ns: 0,
            size: bytes.len() as u64,
            content_hash: Some(sha256_hex(bytes)),
        }
    }

    /// Fingerprint `abs_path`, recording it under the relative `path`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file cannot be read in
    /// content mode.
    pub fn compute(
        path: PathBuf,
        abs_path: &Path,
        metadata: &Metadata,
        mode: FingerprintMode,
    ) -> io::Result<Self> {
        match mode {
            FingerprintMode::Metadata => Ok(Self::from_metadata(path, metadata)),
            FingerprintMode::Content => {
                let bytes = std::fs::read(abs_path)?;
                Ok(Self::from_content(path, &bytes))
            }
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Normalize a path into a `/`-separated string for hashing and display.
pub fn path_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Digest over the whole tracked file set.
///
/// Any added, removed or modified file changes the key, as does a different
/// extractor identity. `files` must already be in walk (path) order.
pub fn files_key<'a>(
    extractor_id: &str,
    files: impl IntoIterator<Item = &'a FileFingerprint>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(KEY_VERSION.as_bytes());
    hasher.update([0]);
    hasher.update(extractor_id.as_bytes());
    hasher.update([0]);
    for fp in files {
        hasher.update(path_key(&fp.path).as_bytes());
        hasher.update([0]);
        hasher.update(fp.mtime_ns.to_le_bytes());
        hasher.update(fp.size.to_le_bytes());
        hasher.update(fp.content_hash.as_deref().unwrap_or("").as_bytes());
        hasher.update([b'\n']);
    }
    format!("{:x}", hasher.finalize())
}

/// Every input that affects a rendered map.
///
/// Focus files and identifiers are expected to be sorted and deduplicated;
/// [`QueryKey::digest`] hashes them in the given order.
#[derive(Debug, Clone)]
pub struct QueryKey<'a> {
    pub files_key: &'a str,
    pub focus_files: &'a [PathBuf],
    pub mentioned_idents: &'a [String],
    pub max_tokens: usize,
    pub chars_per_token: usize,
    /// Annotator identity when enhancement is on.
    pub annotator: Option<&'a str>,
    pub format: OutputFormat,
    pub rank: &'a RankConfig,
}

impl QueryKey<'_> {
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(KEY_VERSION.as_bytes());
        hasher.update([0]);
        hasher.update(self.files_key.as_bytes());
        hasher.update(b"\0focus");
        for f in self.focus_files {
            hasher.update([0]);
            hasher.update(path_key(f).as_bytes());
        }
        hasher.update(b"\0idents");
        for ident in self.mentioned_idents {
            hasher.update([0]);
            hasher.update(ident.as_bytes());
        }
        hasher.update([0]);
        hasher.update((self.max_tokens as u64).to_le_bytes());
        hasher.update((self.chars_per_token as u64).to_le_bytes());
        hasher.update(b"annotator");
        if let Some(annotator) = self.annotator {
            hasher.update([1]);
            hasher.update(annotator.as_bytes());
        }
        hasher.update([0]);
        hasher.update(self.format.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(self.rank.damping.to_bits().to_le_bytes());
        hasher.update(self.rank.focus_boost.to_bits().to_le_bytes());
        hasher.update(self.rank.mention_boost.to_bits().to_le_bytes());
        hasher.update(self.rank.epsilon.to_bits().to_le_bytes());
        hasher.update((self.rank.max_iterations as u64).to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}
