//! Personalized PageRank over the reference graph.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use cartograph_core::RankConfig;
use serde::{Deserialize, Serialize};

use crate::graph::ReferenceGraph;

/// A file with its importance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedFile {
    pub path: PathBuf,
    pub score: f64,
    /// Total weight of references into this file, used as a tie-breaker.
    pub in_weight: f64,
}

/// Personalized PageRank output for one graph and one personalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    /// Files by descending score, then descending in-weight, then path.
    pub files: Vec<RankedFile>,
    pub iterations: usize,
    pub converged: bool,
}

impl Ranking {
    pub fn score(&self, path: &Path) -> Option<f64> {
        self.files.iter().find(|f| f.path == path).map(|f| f.score)
    }

    pub fn position(&self, path: &Path) -> Option<usize> {
        self.files.iter().position(|f| f.path == path)
    }
}

/// Personalized PageRank over a [`ReferenceGraph`].
///
/// The restart vector is uniform, multiplied by `focus_boost` for focus files
/// and by `mention_boost` for files defining a mentioned identifier, then
/// normalized. Dangling nodes spread their mass uniformly. Iteration stops
/// when the L1 change drops below `epsilon` or after `max_iterations`.
///
/// # Examples
///
/// ```
/// use cartograph_core::RankConfig;
/// use cartograph_repomap::graph::ReferenceGraph;
/// use cartograph_repomap::rank::Ranker;
/// use cartograph_repomap::symbols::SymbolsByFile;
///
/// let ranking = Ranker::new(RankConfig::default()).rank(&ReferenceGraph::build(&SymbolsByFile::new()), &[], &[]);
/// assert!(ranking.files.is_empty());
/// assert!(ranking.converged);
/// ```
#[derive(Debug, Clone)]
pub struct Ranker {
    config: RankConfig,
}

impl Ranker {
    pub fn new(config: RankConfig) -> Self {
        Self { config }
    }

    pub fn rank(
        &self,
        graph: &ReferenceGraph,
        focus_files: &[PathBuf],
        mentioned_idents: &[String],
    ) -> Ranking {
        let n = graph.node_count();
        if n == 0 {
            return Ranking {
                files: Vec::new(),
                iterations: 0,
                converged: true,
            };
        }

        let paths: Vec<&Path> = graph.files().collect();
        let restart = self.restart_vector(graph, &paths, focus_files, mentioned_idents);

        let mut out_weight = vec![0.0; n];
        let edges: Vec<(usize, usize, f64)> = graph.edges().collect();
        for &(from, _, w) in &edges {
            out_weight[from] += w;
        }

        let d = self.config.damping;
        let n_f64 = n as f64;
        let mut scores = restart.clone();
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.config.max_iterations {
            iterations += 1;

            let dangling: f64 = scores
                .iter()
                .zip(&out_weight)
                .filter(|(_, w)| **w == 0.0)
                .map(|(s, _)| s)
                .sum();

            let mut next: Vec<f64> = restart
                .iter()
                .map(|p| (1.0 - d) * p + d * dangling / n_f64)
                .collect();
            for &(from, to, w) in &edges {
                next[to] += d * scores[from] * w / out_weight[from];
            }

            let delta: f64 = next.iter().zip(&scores).map(|(a, b)| (a - b).abs()).sum();
            scores = next;
            if delta < self.config.epsilon {
                converged = true;
                break;
            }
        }

        let total: f64 = scores.iter().sum();
        if total > 0.0 {
            for s in &mut scores {
                *s /= total;
            }
        }

        let mut files: Vec<RankedFile> = paths
            .iter()
            .zip(scores)
            .map(|(path, score)| RankedFile {
                path: path.to_path_buf(),
                score,
                in_weight: graph.in_weight(path),
            })
            .collect();
        files.sort_by(compare_ranked);

        Ranking {
            files,
            iterations,
            converged,
        }
    }

    fn restart_vector(
        &self,
        graph: &ReferenceGraph,
        paths: &[&Path],
        focus_files: &[PathBuf],
        mentioned_idents: &[String],
    ) -> Vec<f64> {
        let mentioned: BTreeSet<&Path> = mentioned_idents
            .iter()
            .flat_map(|ident| graph.definers_of(ident))
            .collect();

        let mut restart: Vec<f64> = paths
            .iter()
            .map(|path| {
                let mut weight = 1.0;
                if focus_files.iter().any(|f| f.as_path() == *path) {
                    weight *= self.config.focus_boost;
                }
                if mentioned.contains(path) {
                    weight *= self.config.mention_boost;
                }
                weight
            })
            .collect();

        let total: f64 = restart.iter().sum();
        if !(total.is_finite() && total > 0.0) {
            return vec![1.0 / paths.len() as f64; paths.len()];
        }
        for p in &mut restart {
            *p /= total;
        }
        restart
    }
}

fn compare_ranked(a: &RankedFile, b: &RankedFile) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.in_weight.total_cmp(&a.in_weight))
        .then_with(|| a.path.cmp(&b.path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{FileSymbols, OccurrenceKind, SymbolOccurrence, SymbolType, SymbolsByFile};

    fn occ(file: &str, name: &str, kind: OccurrenceKind) -> SymbolOccurrence {
        SymbolOccurrence {
            file: PathBuf::from(file),
            line_start: 1,
            line_end: 1,
            column: 0,
            kind,
            symbol_type: SymbolType::Function,
            name: name.to_string(),
        }
    }

    /// main.py and cli.py both call into utils.py; main.py also calls cli.py.
    fn sample_graph() -> ReferenceGraph {
        let mut symbols = SymbolsByFile::new();
        let mut add = |path: &str, occurrences: Vec<SymbolOccurrence>| {
            symbols.insert(
                PathBuf::from(path),
                FileSymbols::parsed(PathBuf::from(path), occurrences),
            );
        };
        add(
            "main.py",
            vec![
                occ("main.py", "main", OccurrenceKind::Definition),
                occ("main.py", "add", OccurrenceKind::Reference),
                occ("main.py", "run_cli", OccurrenceKind::Reference),
            ],
        );
        add(
            "cli.py",
            vec![
                occ("cli.py", "run_cli", OccurrenceKind::Definition),
                occ("cli.py", "add", OccurrenceKind::Reference),
            ],
        );
        add(
            "utils.py",
            vec![occ("utils.py", "add", OccurrenceKind::Definition)],
        );
        add("lonely.py", vec![occ("lonely.py", "solo", OccurrenceKind::Definition)]);
        ReferenceGraph::build(&symbols)
    }

    fn ranker() -> Ranker {
        Ranker::new(RankConfig::default())
    }

    #[test]
    fn scores_sum_to_one() {
        let ranking = ranker().rank(&sample_graph(), &[], &[]);
        let total: f64 = ranking.files.iter().map(|f| f.score).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(ranking.converged);
        assert!(ranking.iterations > 1);
    }

    #[test]
    fn most_referenced_file_ranks_first() {
        let ranking = ranker().rank(&sample_graph(), &[], &[]);
        assert_eq!(ranking.files[0].path, PathBuf::from("utils.py"));
        assert!(ranking.score(Path::new("utils.py")) > ranking.score(Path::new("main.py")));
    }

    #[test]
    fn degenerate_boosts_fall_back_to_uniform_restart() {
        let graph = sample_graph();
        let ranker = Ranker::new(RankConfig {
            focus_boost: 0.0,
            ..RankConfig::default()
        });
        let all: Vec<PathBuf> = graph.files().map(Path::to_path_buf).collect();
        let ranking = ranker.rank(&graph, &all, &[]);
        assert!(ranking.files.iter().all(|f| f.score.is_finite()));
        assert_eq!(ranking, ranker.rank(&graph, &[], &[]));
    }

    #[test]
    fn focus_raises_score() {
        let graph = sample_graph();
        let plain = ranker().rank(&graph, &[], &[]);
        let focused = ranker().rank(&graph, &[PathBuf::from("lonely.py")], &[]);
        let before = plain.score(Path::new("lonely.py")).unwrap();
        let after = focused.score(Path::new("lonely.py")).unwrap();
        assert!(after > before);
        let total: f64 = focused.files.iter().map(|f| f.score).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn mentioned_identifier_raises_defining_file() {
        let graph = sample_graph();
        let plain = ranker().rank(&graph, &[], &[]);
        let mentioned = ranker().rank(&graph, &[], &["solo".to_string()]);
        assert!(
            mentioned.score(Path::new("lonely.py")).unwrap()
                > plain.score(Path::new("lonely.py")).unwrap()
        );
    }

    #[test]
    fn ranking_is_deterministic() {
        let graph = sample_graph();
        assert_eq!(ranker().rank(&graph, &[], &[]), ranker().rank(&graph, &[], &[]));
    }

    #[test]
    fn iteration_cap_reports_not_converged() {
        let config = RankConfig {
            max_iterations: 1,
            epsilon: 1e-15,
            ..RankConfig::default()
        };
        let ranking = Ranker::new(config).rank(&sample_graph(), &[], &[]);
        assert_eq!(ranking.iterations, 1);
        assert!(!ranking.converged);
        let total: f64 = ranking.files.iter().map(|f| f.score).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ties_break_by_path() {
        let mut symbols = SymbolsByFile::new();
        for path in ["b.py", "a.py", "c.py"] {
            symbols.insert(PathBuf::from(path), FileSymbols::parsed(PathBuf::from(path), vec![]));
        }
        let ranking = ranker().rank(&ReferenceGraph::build(&symbols), &[], &[]);
        let order: Vec<&Path> = ranking.files.iter().map(|f| f.path.as_path()).collect();
        assert_eq!(order, vec![Path::new("a.py"), Path::new("b.py"), Path::new("c.py")]);
    }
}
