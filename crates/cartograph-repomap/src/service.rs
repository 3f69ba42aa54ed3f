//! The repository map service: walk, probe the three cache tiers, and fall
//! through to extraction, ranking and assembly only where needed.
//!
//! Lookup order for one request:
//!
//! 1. **Result tier** keyed by the full query digest. A hit returns stored
//!    content without touching the file tier.
//! 2. **Memory tier** keyed by the files-only digest. A hit reuses the parsed
//!    symbols, graph and any ranking already computed for the same
//!    personalization.
//! 3. **File tier** per file. Only files whose fingerprint changed are
//!    re-extracted, in parallel on a bounded worker pool.
//!
//! Concurrent identical requests are coalesced at the result and memory
//! tiers; a caller that waited on another caller's computation counts a hit.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use cartograph_core::{CartographConfig, CartographError, OutputFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assemble::Assembler;
use crate::enhance::{Annotator, ReferenceCountAnnotator};
use crate::extract::{SymbolExtractor, TreeSitterExtractor};
use crate::file_cache::FileCache;
use crate::fingerprint::{files_key, QueryKey};
use crate::flight::{FlightRole, SingleFlight};
use crate::graph::ReferenceGraph;
use crate::rank::{Ranker, Ranking};
use crate::store::{CacheStore, MemoryStore, SqliteStore, Tier};
use crate::symbols::SymbolsByFile;
use crate::walker::{resolve_root, walk_repo, TrackedFile};

/// File name of the SQLite database inside the cache directory.
pub const CACHE_DB_FILE: &str = "cache.db";

/// Parameters for one map request.
///
/// # Examples
///
/// ```
/// use cartograph_core::OutputFormat;
/// use cartograph_repomap::RepoMapRequest;
///
/// let request = RepoMapRequest::new(".")
///     .with_focus_files(["src/lib.rs"])
///     .with_max_tokens(1024);
/// assert_eq!(request.max_tokens, 1024);
/// assert_eq!(request.format, OutputFormat::Text);
/// assert!(!request.enable_enhancement);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RepoMapRequest {
    pub repo_path: PathBuf,
    /// Files the caller is working on, relative to `repo_path` or absolute.
    pub focus_files: Vec<PathBuf>,
    pub mentioned_idents: Vec<String>,
    pub max_tokens: usize,
    pub enable_enhancement: bool,
    pub format: OutputFormat,
}

impl RepoMapRequest {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            focus_files: Vec::new(),
            mentioned_idents: Vec::new(),
            max_tokens: 5000,
            enable_enhancement: false,
            format: OutputFormat::Text,
        }
    }

    pub fn with_focus_files<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.focus_files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mentioned_idents<I, S>(mut self, idents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mentioned_idents = idents.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_enhancement(mut self, enabled: bool) -> Self {
        self.enable_enhancement = enabled;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }
}

/// Per-call hit/miss counters for each cache tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub file_hits: usize,
    pub file_misses: usize,
    pub memory_hits: usize,
    pub memory_misses: usize,
    pub result_hits: usize,
    pub result_misses: usize,
}

/// Facts about a rendered map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapMetadata {
    /// Tracked files, including files whose extraction failed.
    pub file_count: usize,
    /// Definitions rendered into the content.
    pub definition_count: usize,
    /// Definitions across all tracked files.
    pub total_definitions: usize,
    pub rendered_files: usize,
    pub token_estimate: usize,
    pub truncated: bool,
    pub budget_too_small: bool,
    pub focus_truncated: bool,
    pub converged: bool,
    pub iterations: usize,
    pub failed_files: usize,
    /// Files-only repository fingerprint.
    pub repo_fingerprint: String,
    pub cache_stats: CacheStats,
}

/// A rendered repository map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMap {
    pub content: String,
    pub metadata: MapMetadata,
}

/// What the result tier stores for one query digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredResult {
    content: String,
    metadata: MapMetadata,
    created_at: DateTime<Utc>,
}

/// Memory-tier entry: everything derived from one file set.
struct Snapshot {
    key: String,
    symbols: SymbolsByFile,
    graph: ReferenceGraph,
    failed_files: usize,
    total_definitions: usize,
    /// Rankings already computed, keyed by personalization.
    rankings: Mutex<HashMap<String, Arc<Ranking>>>,
    reference_counts: OnceLock<ReferenceCountAnnotator>,
}

impl Snapshot {
    fn new(key: String, symbols: SymbolsByFile, failed_files: usize) -> Self {
        let graph = ReferenceGraph::build(&symbols);
        let total_definitions = symbols.values().map(|s| s.definition_count()).sum();
        Self {
            key,
            symbols,
            graph,
            failed_files,
            total_definitions,
            rankings: Mutex::new(HashMap::new()),
            reference_counts: OnceLock::new(),
        }
    }

    fn ranking(&self, ranker: &Ranker, focus: &[PathBuf], idents: &[String]) -> Arc<Ranking> {
        let key = personalization_key(focus, idents);
        let mut rankings = self.rankings.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            rankings
                .entry(key)
                .or_insert_with(|| Arc::new(ranker.rank(&self.graph, focus, idents))),
        )
    }

    fn reference_counts(&self) -> &ReferenceCountAnnotator {
        self.reference_counts
            .get_or_init(|| ReferenceCountAnnotator::new(&self.graph, &self.symbols))
    }
}

fn personalization_key(focus: &[PathBuf], idents: &[String]) -> String {
    let mut key = String::new();
    for f in focus {
        key.push_str(&crate::fingerprint::path_key(f));
        key.push('\0');
    }
    key.push('\u{1f}');
    for ident in idents {
        key.push_str(ident);
        key.push('\0');
    }
    key
}

/// Long-lived map generator owning the cache tiers.
///
/// One service can serve many repositories; the memory tier keeps one live
/// entry per repository root.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use cartograph_core::CartographConfig;
/// use cartograph_repomap::{MemoryStore, RepoMapRequest, RepoMapService};
///
/// let dir = tempfile::tempdir().unwrap();
/// std::fs::write(dir.path().join("utils.py"), "def add(a, b):\n    return a + b\n").unwrap();
/// std::fs::write(dir.path().join("main.py"), "from utils import add\n\nprint(add(1, 2))\n").unwrap();
///
/// let service = RepoMapService::new(CartographConfig::default(), Arc::new(MemoryStore::new())).unwrap();
/// let map = service.repo_map(&RepoMapRequest::new(dir.path())).unwrap();
/// assert!(map.content.contains("function add"));
/// assert_eq!(map.metadata.file_count, 2);
/// ```
pub struct RepoMapService {
    config: CartographConfig,
    store: Arc<dyn CacheStore>,
    file_cache: FileCache,
    annotator: Option<Arc<dyn Annotator>>,
    ranker: Ranker,
    pool: rayon::ThreadPool,
    snapshots: Mutex<HashMap<PathBuf, Arc<Snapshot>>>,
    snapshot_flights: SingleFlight<Arc<Snapshot>>,
    result_flights: SingleFlight<StoredResult>,
}

impl RepoMapService {
    /// Create a service over `store` using the built-in tree-sitter extractor.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Config`] if `config` is invalid or the parse
    /// worker pool cannot be started.
    pub fn new(
        config: CartographConfig,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self, CartographError> {
        Self::with_extractor(config, store, Arc::new(TreeSitterExtractor::new()))
    }

    /// Create a service with a custom extractor.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Config`] if `config` is invalid or the parse
    /// worker pool cannot be started.
    pub fn with_extractor(
        config: CartographConfig,
        store: Arc<dyn CacheStore>,
        extractor: Arc<dyn SymbolExtractor>,
    ) -> Result<Self, CartographError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.walk.workers)
            .thread_name(|i| format!("cartograph-parse-{i}"))
            .stack_size(8 * 1024 * 1024)
            .build()
            .map_err(|e| CartographError::Config(format!("failed to start parse workers: {e}")))?;

        Ok(Self {
            ranker: Ranker::new(config.rank.clone()),
            file_cache: FileCache::new(Arc::clone(&store), extractor),
            config,
            store,
            annotator: None,
            pool,
            snapshots: Mutex::new(HashMap::new()),
            snapshot_flights: SingleFlight::new(),
            result_flights: SingleFlight::new(),
        })
    }

    /// Create a service whose durable tiers live in the repository's cache
    /// directory, or in memory when caching is disabled.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::RepoUnreadable`] if `repo_root` is not a
    /// readable directory, or [`CartographError::Database`] if the cache
    /// database cannot be opened.
    pub fn open(repo_root: &Path, config: CartographConfig) -> Result<Self, CartographError> {
        let root = resolve_root(repo_root)?;
        let store: Arc<dyn CacheStore> = if config.cache.enabled {
            let path = config.cache_dir_for(&root).join(CACHE_DB_FILE);
            debug!(path = %path.display(), "opening cache database");
            Arc::new(SqliteStore::open(&path)?)
        } else {
            Arc::new(MemoryStore::new())
        };
        Self::new(config, store)
    }

    /// Use `annotator` for decorations instead of the built-in reference
    /// counter.
    pub fn with_annotator(mut self, annotator: Arc<dyn Annotator>) -> Self {
        self.annotator = Some(annotator);
        self
    }

    fn annotator_id(&self) -> &str {
        self.annotator
            .as_deref()
            .map_or(ReferenceCountAnnotator::ID, |a| a.id())
    }

    pub fn config(&self) -> &CartographConfig {
        &self.config
    }

    /// Build (or fetch) the map for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::RepoUnreadable`] if the repository cannot
    /// be read.
    pub fn repo_map(&self, request: &RepoMapRequest) -> Result<RepoMap, CartographError> {
        self.repo_map_with_cancel(request, &CancellationToken::new())
    }

    /// Like [`RepoMapService::repo_map`], abandoning work once `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Cancelled`] if cancellation was observed
    /// before the map was complete, or [`CartographError::RepoUnreadable`] if
    /// the repository cannot be read.
    pub fn repo_map_with_cancel(
        &self,
        request: &RepoMapRequest,
        cancel: &CancellationToken,
    ) -> Result<RepoMap, CartographError> {
        let started = Instant::now();
        let root = resolve_root(&request.repo_path)?;
        let files = walk_repo(&root, &self.config.walk, self.config.cache.fingerprint)?;
        if cancel.is_cancelled() {
            return Err(CartographError::Cancelled);
        }

        let files_key = files_key(
            self.file_cache.extractor_id(),
            files.iter().map(|f| &f.fingerprint),
        );
        let focus = normalize_focus(&root, &request.focus_files);
        let idents: Vec<String> = request
            .mentioned_idents
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let query_key = QueryKey {
            files_key: &files_key,
            focus_files: &focus,
            mentioned_idents: &idents,
            max_tokens: request.max_tokens,
            chars_per_token: self.config.map.chars_per_token,
            annotator: request.enable_enhancement.then(|| self.annotator_id()),
            format: request.format,
            rank: &self.config.rank,
        }
        .digest();
        let query_key = format!("{}{files_key}:{query_key}", result_scope(&root));

        let mut stats = CacheStats::default();
        let stored = match self.load_result(&query_key) {
            Some(stored) => {
                stats.result_hits = 1;
                Arc::new(stored)
            }
            None => {
                let (stored, role) = self.result_flights.run(&query_key, || {
                    if let Some(stored) = self.load_result(&query_key) {
                        stats.result_hits = 1;
                        return Ok(stored);
                    }
                    stats.result_misses = 1;
                    let stored = self.build(
                        &root, &files, &files_key, &focus, &idents, request, cancel, &mut stats,
                    )?;
                    self.save_result(&query_key, &stored);
                    Ok(stored)
                })?;
                if role == FlightRole::Waiter {
                    stats = CacheStats {
                        result_hits: 1,
                        ..CacheStats::default()
                    };
                }
                stored
            }
        };

        let map = RepoMap {
            content: stored.content.clone(),
            metadata: MapMetadata {
                cache_stats: stats,
                ..stored.metadata.clone()
            },
        };
        info!(
            repo = %root.display(),
            files = map.metadata.file_count,
            definitions = map.metadata.definition_count,
            tokens = map.metadata.token_estimate,
            truncated = map.metadata.truncated,
            result_hit = stats.result_hits > 0,
            memory_hit = stats.memory_hits > 0,
            file_misses = stats.file_misses,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "repo map ready"
        );
        Ok(map)
    }

    /// Drop every cached entry in all three tiers.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Database`] if the durable store cannot be
    /// cleared.
    pub fn clear_caches(&self) -> Result<(), CartographError> {
        self.store.clear()?;
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!("caches cleared");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        root: &Path,
        files: &[TrackedFile],
        files_key: &str,
        focus: &[PathBuf],
        idents: &[String],
        request: &RepoMapRequest,
        cancel: &CancellationToken,
        stats: &mut CacheStats,
    ) -> Result<StoredResult, CartographError> {
        let snapshot = self.snapshot(root, files, files_key, cancel, stats)?;
        if cancel.is_cancelled() {
            return Err(CartographError::Cancelled);
        }

        let ranking = snapshot.ranking(&self.ranker, focus, idents);
        if cancel.is_cancelled() {
            return Err(CartographError::Cancelled);
        }

        let mut assembler = Assembler::new(request.format, self.config.map.chars_per_token);
        if request.enable_enhancement {
            assembler = match &self.annotator {
                Some(annotator) => assembler.with_annotator(annotator.as_ref()),
                None => assembler.with_annotator(snapshot.reference_counts()),
            };
        }
        let assembly = assembler.assemble(&ranking, &snapshot.symbols, focus, request.max_tokens);

        Ok(StoredResult {
            content: assembly.content,
            metadata: MapMetadata {
                file_count: files.len(),
                definition_count: assembly.definition_count,
                total_definitions: snapshot.total_definitions,
                rendered_files: assembly.rendered_files,
                token_estimate: assembly.token_estimate,
                truncated: assembly.truncated,
                budget_too_small: assembly.budget_too_small,
                focus_truncated: assembly.focus_truncated,
                converged: ranking.converged,
                iterations: ranking.iterations,
                failed_files: snapshot.failed_files,
                repo_fingerprint: files_key.to_string(),
                cache_stats: CacheStats::default(),
            },
            created_at: Utc::now(),
        })
    }

    fn snapshot(
        &self,
        root: &Path,
        files: &[TrackedFile],
        files_key: &str,
        cancel: &CancellationToken,
        stats: &mut CacheStats,
    ) -> Result<Arc<Snapshot>, CartographError> {
        if let Some(snapshot) = self.cached_snapshot(root, files_key) {
            stats.memory_hits += 1;
            return Ok(snapshot);
        }

        let flight_key = format!("{}\0{}", root.display(), files_key);
        let (snapshot, role) = self.snapshot_flights.run(&flight_key, || {
            if let Some(snapshot) = self.cached_snapshot(root, files_key) {
                stats.memory_hits += 1;
                return Ok(snapshot);
            }
            stats.memory_misses += 1;

            let refresh = self.file_cache.refresh(files, &self.pool, cancel)?;
            stats.file_hits += refresh.hits;
            stats.file_misses += refresh.misses;
            debug!(
                hits = refresh.hits,
                misses = refresh.misses,
                failed = refresh.failed,
                "file tier refreshed"
            );

            self.prune(root, files, files_key);

            let snapshot = Arc::new(Snapshot::new(
                files_key.to_string(),
                refresh.symbols,
                refresh.failed,
            ));
            self.snapshots
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(root.to_path_buf(), Arc::clone(&snapshot));
            Ok(snapshot)
        })?;

        if role == FlightRole::Waiter {
            stats.memory_hits += 1;
        }
        Ok(Arc::clone(&*snapshot))
    }

    fn cached_snapshot(&self, root: &Path, files_key: &str) -> Option<Arc<Snapshot>> {
        let snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        snapshots
            .get(root)
            .filter(|s| s.key == files_key)
            .map(Arc::clone)
    }

    /// Drop durable entries that the current file set has made unreachable:
    /// file entries for untracked paths and results for older file sets.
    fn prune(&self, root: &Path, files: &[TrackedFile], files_key: &str) {
        let stale_files = self.file_cache.prune(root, files);

        let scope = result_scope(root);
        let current = format!("{scope}{files_key}:");
        let stale_results = match self.store.keys_with_prefix(Tier::Result, &scope) {
            Ok(keys) => {
                let stale: Vec<String> =
                    keys.into_iter().filter(|k| !k.starts_with(&current)).collect();
                self.store.remove(Tier::Result, &stale).unwrap_or_else(|e| {
                    warn!(error = %e, "failed to prune result cache entries");
                    0
                })
            }
            Err(e) => {
                warn!(error = %e, "failed to list result cache entries");
                0
            }
        };

        if stale_files + stale_results > 0 {
            debug!(stale_files, stale_results, "pruned durable cache");
        }
    }

    fn load_result(&self, key: &str) -> Option<StoredResult> {
        let blob = match self.store.get(Tier::Result, key) {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "result cache read failed");
                return None;
            }
        };
        match serde_json::from_slice(&blob) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!(error = %e, "discarding corrupt result cache entry");
                None
            }
        }
    }

    fn save_result(&self, key: &str, stored: &StoredResult) {
        let blob = match serde_json::to_vec(stored) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "failed to encode result cache entry");
                return;
            }
        };
        if let Err(e) = self.store.put(Tier::Result, key, &blob) {
            warn!(error = %e, "failed to write result cache entry");
        }
    }
}

/// Result-tier key prefix shared by every query against `root`.
fn result_scope(root: &Path) -> String {
    format!("{}#", root.display())
}

/// Make focus paths relative to `root`, drop `.` components, sort and dedupe.
fn normalize_focus(root: &Path, focus: &[PathBuf]) -> Vec<PathBuf> {
    let set: BTreeSet<PathBuf> = focus
        .iter()
        .map(|p| {
            if p.is_absolute() {
                let canonical = p.canonicalize().unwrap_or_else(|_| p.clone());
                canonical
                    .strip_prefix(root)
                    .map(Path::to_path_buf)
                    .unwrap_or(canonical)
            } else {
                p.components()
                    .filter(|c| !matches!(c, Component::CurDir))
                    .collect()
            }
        })
        .filter(|p: &PathBuf| !p.as_os_str().is_empty())
        .collect();
    set.into_iter().collect()
}
