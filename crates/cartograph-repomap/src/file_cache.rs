//! File tier: per-file extraction results keyed by absolute path and
//! validated by fingerprint.

use std::collections::HashSet;
use std::path::{Path, MAIN_SEPARATOR};
use std::sync::Arc;

use cartograph_core::CartographError;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::extract::{decode_source, ExtractionError, SymbolExtractor};
use crate::fingerprint::FileFingerprint;
use crate::store::{CacheStore, Tier};
use crate::symbols::{FileSymbols, SymbolOccurrence, SymbolsByFile};
use crate::walker::TrackedFile;

/// What the file tier stores for one path.
#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    extractor: String,
    fingerprint: FileFingerprint,
    occurrences: Vec<SymbolOccurrence>,
    #[serde(default)]
    error: Option<String>,
}

/// Result of refreshing a whole file set.
#[derive(Debug, Default)]
pub struct Refresh {
    pub symbols: SymbolsByFile,
    pub hits: usize,
    pub misses: usize,
    pub failed: usize,
}

/// Cached front-end to a [`SymbolExtractor`].
pub struct FileCache {
    store: Arc<dyn CacheStore>,
    extractor: Arc<dyn SymbolExtractor>,
}

impl FileCache {
    pub fn new(store: Arc<dyn CacheStore>, extractor: Arc<dyn SymbolExtractor>) -> Self {
        Self { store, extractor }
    }

    pub fn extractor_id(&self) -> &str {
        self.extractor.id()
    }

    /// Return the symbols for `file`, extracting only when the stored entry is
    /// missing, unreadable, or was recorded for a different fingerprint.
    ///
    /// The boolean is `true` on a cache hit. Storage failures degrade to a
    /// miss and never fail the lookup.
    pub fn get_or_parse(&self, file: &TrackedFile) -> (FileSymbols, bool) {
        let key = file.abs_path.to_string_lossy();

        if let Some(symbols) = self.lookup(&key, file) {
            debug!(path = %file.path.display(), "file cache hit");
            return (symbols, true);
        }

        let symbols = match self.parse(file) {
            Ok(occurrences) => FileSymbols::parsed(file.path.clone(), occurrences),
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "extraction failed");
                FileSymbols::failed(file.path.clone(), e.to_string())
            }
        };

        let entry = FileEntry {
            extractor: self.extractor.id().to_string(),
            fingerprint: file.fingerprint.clone(),
            occurrences: symbols.occurrences.clone(),
            error: symbols.error.clone(),
        };
        match serde_json::to_vec(&entry) {
            Ok(blob) => {
                if let Err(e) = self.store.put(Tier::File, &key, &blob) {
                    warn!(path = %file.path.display(), error = %e, "failed to write file cache entry");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode file cache entry"),
        }

        (symbols, false)
    }

    /// Bring every file in `files` up to date on `pool`.
    ///
    /// Workers stop picking up new files once `cancel` fires; files already
    /// being parsed run to completion.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Cancelled`] if cancellation was observed.
    pub fn refresh(
        &self,
        files: &[TrackedFile],
        pool: &rayon::ThreadPool,
        cancel: &CancellationToken,
    ) -> Result<Refresh, CartographError> {
        let results: Vec<Option<(FileSymbols, bool)>> = pool.install(|| {
            files
                .par_iter()
                .map(|file| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some(self.get_or_parse(file))
                })
                .collect()
        });

        if cancel.is_cancelled() {
            return Err(CartographError::Cancelled);
        }

        let mut refresh = Refresh::default();
        for (symbols, hit) in results.into_iter().flatten() {
            if hit {
                refresh.hits += 1;
            } else {
                refresh.misses += 1;
            }
            if symbols.is_failed() {
                refresh.failed += 1;
            }
            refresh.symbols.insert(symbols.path.clone(), symbols);
        }
        Ok(refresh)
    }

    /// Delete entries under `root` for files no longer in `files`.
    ///
    /// Returns the number of entries removed. Storage failures are logged
    /// and count as nothing removed.
    pub fn prune(&self, root: &Path, files: &[TrackedFile]) -> usize {
        let prefix = format!("{}{MAIN_SEPARATOR}", root.to_string_lossy());
        let keys = match self.store.keys_with_prefix(Tier::File, &prefix) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "failed to list file cache entries");
                return 0;
            }
        };
        let tracked: HashSet<String> = files
            .iter()
            .map(|f| f.abs_path.to_string_lossy().into_owned())
            .collect();
        let stale: Vec<String> = keys.into_iter().filter(|k| !tracked.contains(k)).collect();
        match self.store.remove(Tier::File, &stale) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "failed to prune file cache entries");
                0
            }
        }
    }

    fn lookup(&self, key: &str, file: &TrackedFile) -> Option<FileSymbols> {
        let blob = match self.store.get(Tier::File, key) {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "file cache read failed");
                return None;
            }
        };
        let entry: FileEntry = match serde_json::from_slice(&blob) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "discarding corrupt file cache entry");
                return None;
            }
        };
        if entry.extractor != self.extractor.id() || entry.fingerprint != file.fingerprint {
            return None;
        }
        Some(FileSymbols {
            path: file.path.clone(),
            occurrences: entry.occurrences,
            error: entry.error,
        })
    }

    fn parse(&self, file: &TrackedFile) -> Result<Vec<SymbolOccurrence>, ExtractionError> {
        let bytes = std::fs::read(&file.abs_path).map_err(|e| ExtractionError::Io(e.to_string()))?;
        let text = decode_source(bytes)?;
        let mut occurrences = self.extractor.extract(&file.path, &text)?;
        for occ in &mut occurrences {
            if occ.file != file.path {
                occ.file = file.path.clone();
            }
        }
        Ok(occurrences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cartograph_core::{FingerprintMode, WalkConfig};

    use crate::extract::TreeSitterExtractor;
    use crate::store::MemoryStore;
    use crate::walker::walk_repo;

    /// Counts extractor invocations.
    struct Counting {
        inner: TreeSitterExtractor,
        calls: AtomicUsize,
    }

    impl SymbolExtractor for Counting {
        fn id(&self) -> &str {
            "counting"
        }

        fn extract(
            &self,
            path: &Path,
            text: &str,
        ) -> Result<Vec<SymbolOccurrence>, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.extract(path, text)
        }
    }

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap()
    }

    fn walk(root: &Path) -> Vec<TrackedFile> {
        walk_repo(root, &WalkConfig::default(), FingerprintMode::Metadata).unwrap()
    }

    fn setup() -> (tempfile::TempDir, Arc<Counting>, FileCache) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def a():\n    return b()\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "def b():\n    return 1\n").unwrap();
        let extractor = Arc::new(Counting {
            inner: TreeSitterExtractor::new(),
            calls: AtomicUsize::new(0),
        });
        let cache = FileCache::new(Arc::new(MemoryStore::new()), extractor.clone());
        (dir, extractor, cache)
    }

    #[test]
    fn second_refresh_hits_every_file() {
        let (dir, extractor, cache) = setup();
        let files = walk(dir.path());
        let pool = pool();

        let first = cache
            .refresh(&files, &pool, &CancellationToken::new())
            .unwrap();
        assert_eq!((first.hits, first.misses), (0, 2));

        let second = cache
            .refresh(&files, &pool, &CancellationToken::new())
            .unwrap();
        assert_eq!((second.hits, second.misses), (2, 0));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(first.symbols, second.symbols);
    }

    #[test]
    fn changed_fingerprint_reparses_only_that_file() {
        let (dir, extractor, cache) = setup();
        let pool = pool();
        let files = walk(dir.path());
        cache
            .refresh(&files, &pool, &CancellationToken::new())
            .unwrap();

        std::fs::write(
            dir.path().join("b.py"),
            "def b():\n    return 2\n\ndef c():\n    return 3\n",
        )
        .unwrap();
        let files = walk(dir.path());
        let refresh = cache
            .refresh(&files, &pool, &CancellationToken::new())
            .unwrap();
        assert_eq!((refresh.hits, refresh.misses), (1, 1));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 3);
        let b = &refresh.symbols[Path::new("b.py")];
        assert_eq!(b.definition_count(), 2);
    }

    #[test]
    fn corrupt_entry_is_a_miss_and_is_overwritten() {
        let (dir, _extractor, cache) = setup();
        let files = walk(dir.path());
        let a = &files[0];
        cache
            .store
            .put(Tier::File, &a.abs_path.to_string_lossy(), b"not json")
            .unwrap();

        let (symbols, hit) = cache.get_or_parse(a);
        assert!(!hit);
        assert!(!symbols.is_failed());
        let (_, hit) = cache.get_or_parse(a);
        assert!(hit);
    }

    #[test]
    fn binary_file_fails_without_aborting() {
        let (dir, _extractor, cache) = setup();
        std::fs::write(dir.path().join("blob.rs"), [b'f', b'n', 0, 1, 2]).unwrap();
        let files = walk(dir.path());
        let refresh = cache
            .refresh(&files, &pool(), &CancellationToken::new())
            .unwrap();
        assert_eq!(refresh.symbols.len(), 3);
        assert_eq!(refresh.failed, 1);
        let blob = &refresh.symbols[Path::new("blob.rs")];
        assert_eq!(blob.error.as_deref(), Some("binary content"));
    }

    #[test]
    fn cancelled_refresh_errors() {
        let (dir, extractor, cache) = setup();
        let files = walk(dir.path());
        let token = CancellationToken::new();
        token.cancel();
        let err = cache.refresh(&files, &pool(), &token).unwrap_err();
        assert!(matches!(err, CartographError::Cancelled));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prune_drops_untracked_files_under_root() {
        let (dir, _extractor, cache) = setup();
        let root = dir.path().canonicalize().unwrap();
        let files = walk(&root);
        cache
            .refresh(&files, &pool(), &CancellationToken::new())
            .unwrap();
        cache.store.put(Tier::File, "/elsewhere/z.py", b"{}").unwrap();

        std::fs::remove_file(root.join("b.py")).unwrap();
        let files = walk(&root);
        assert_eq!(cache.prune(&root, &files), 1);
        assert_eq!(cache.store.len(Tier::File).unwrap(), 2);
        assert_eq!(cache.prune(&root, &files), 0);
    }

    #[test]
    fn different_extractor_identity_misses() {
        let (dir, _extractor, cache) = setup();
        let files = walk(dir.path());
        cache
            .refresh(&files, &pool(), &CancellationToken::new())
            .unwrap();

        let other = FileCache::new(Arc::clone(&cache.store), Arc::new(TreeSitterExtractor::new()));
        let refresh = other
            .refresh(&files, &pool(), &CancellationToken::new())
            .unwrap();
        assert_eq!(refresh.hits, 0);
    }
}
