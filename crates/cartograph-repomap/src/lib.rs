//! Cached, token-budgeted repository maps.
//!
//! Walks a repository, extracts definitions and references with tree-sitter
//! (or any [`SymbolExtractor`]), links files into a reference graph, ranks
//! them with personalized PageRank and renders the highest-ranked
//! definitions within a token budget.
//!
//! Repeated requests are served from three cache tiers: per-file extraction
//! results, the in-memory graph for an unchanged file set, and rendered maps
//! keyed by the full query. See [`RepoMapService`].

pub mod assemble;
pub mod enhance;
pub mod extract;
pub mod file_cache;
pub mod fingerprint;
pub mod flight;
pub mod graph;
pub mod rank;
pub mod service;
pub mod store;
pub mod symbols;
pub mod walker;

use cartograph_core::{CartographConfig, CartographError};

pub use enhance::{Annotation, AnnotationError, Annotator, ReferenceCountAnnotator};
pub use extract::{ExtractionError, SymbolExtractor, TreeSitterExtractor};
pub use service::{CacheStats, MapMetadata, RepoMap, RepoMapRequest, RepoMapService};
pub use store::{CacheStore, MemoryStore, SqliteStore};
pub use symbols::{FileSymbols, OccurrenceKind, SymbolOccurrence, SymbolType};
pub use tokio_util::sync::CancellationToken;

/// Generate a map for a single request with a one-off service.
///
/// The durable tiers live in the repository's cache directory, so a later
/// call still benefits from file and result caching. Long-lived callers
/// should keep a [`RepoMapService`] to also reuse the memory tier.
///
/// # Errors
///
/// Returns [`CartographError::RepoUnreadable`] if the repository cannot be
/// read, or [`CartographError::Database`] if the cache database cannot be
/// opened.
///
/// # Examples
///
/// ```no_run
/// use cartograph_core::CartographConfig;
/// use cartograph_repomap::{repo_map, RepoMapRequest};
///
/// let map = repo_map(&RepoMapRequest::new(".").with_max_tokens(1024), CartographConfig::default()).unwrap();
/// println!("{}", map.content);
/// ```
pub fn repo_map(
    request: &RepoMapRequest,
    config: CartographConfig,
) -> Result<RepoMap, CartographError> {
    RepoMapService::open(&request.repo_path, config)?.repo_map(request)
}
