//! File-level reference graph: which files use names defined in which other
//! files, and how often.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use crate::symbols::SymbolsByFile;

/// Directed, weighted file graph built from resolved references.
///
/// Every tracked file is a node (including files with no symbols). An edge
/// `A -> B` means something in `A` references a name defined in `B`; its
/// weight is the number of such references. Nodes are inserted in path order,
/// so node indices are stable for a given file set.
///
/// A reference resolves to the referencing file itself when that file defines
/// the name, otherwise to the alphabetically-first defining file. Self
/// references add no edge.
///
/// # Examples
///
/// ```
/// use std::path::{Path, PathBuf};
/// use cartograph_repomap::graph::ReferenceGraph;
/// use cartograph_repomap::symbols::{FileSymbols, OccurrenceKind, SymbolOccurrence, SymbolType, SymbolsByFile};
///
/// let occ = |file: &str, name: &str, kind| SymbolOccurrence {
///     file: PathBuf::from(file),
///     line_start: 1,
///     line_end: 1,
///     column: 0,
///     kind,
///     symbol_type: SymbolType::Function,
///     name: name.into(),
/// };
/// let mut symbols = SymbolsByFile::new();
/// symbols.insert("main.py".into(), FileSymbols::parsed("main.py".into(), vec![
///     occ("main.py", "add", OccurrenceKind::Reference),
/// ]));
/// symbols.insert("utils.py".into(), FileSymbols::parsed("utils.py".into(), vec![
///     occ("utils.py", "add", OccurrenceKind::Definition),
/// ]));
///
/// let graph = ReferenceGraph::build(&symbols);
/// assert_eq!(graph.edge_weight(Path::new("main.py"), Path::new("utils.py")), Some(1.0));
/// assert_eq!(graph.edge_weight(Path::new("utils.py"), Path::new("main.py")), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReferenceGraph {
    graph: DiGraph<PathBuf, f64>,
    index: HashMap<PathBuf, NodeIndex>,
    definers: BTreeMap<String, BTreeSet<PathBuf>>,
    /// Cross-file references resolved to `(defining file, name)`.
    inbound: HashMap<(PathBuf, String), usize>,
}

impl ReferenceGraph {
    pub fn build(symbols: &SymbolsByFile) -> Self {
        let mut definers: BTreeMap<String, BTreeSet<PathBuf>> = BTreeMap::new();
        for (path, file) in symbols {
            for def in file.occurrences.iter().filter(|o| o.is_definition()) {
                definers
                    .entry(def.name.clone())
                    .or_default()
                    .insert(path.clone());
            }
        }

        let mut weights: BTreeMap<(&Path, &Path), f64> = BTreeMap::new();
        let mut inbound: HashMap<(PathBuf, String), usize> = HashMap::new();
        for (path, file) in symbols {
            for reference in file.references() {
                let Some(files) = definers.get(&reference.name) else {
                    continue; // Unresolved reference
                };
                if files.contains(path) {
                    continue;
                }
                let Some(target) = files.iter().next() else {
                    continue;
                };
                *weights.entry((path.as_path(), target.as_path())).or_insert(0.0) += 1.0;
                *inbound
                    .entry((target.clone(), reference.name.clone()))
                    .or_insert(0) += 1;
            }
        }

        let mut graph = DiGraph::with_capacity(symbols.len(), weights.len());
        let mut index = HashMap::with_capacity(symbols.len());
        for path in symbols.keys() {
            index.insert(path.clone(), graph.add_node(path.clone()));
        }
        for ((from, to), weight) in weights {
            if let (Some(&a), Some(&b)) = (index.get(from), index.get(to)) {
                graph.add_edge(a, b, weight);
            }
        }

        Self {
            graph,
            index,
            definers,
            inbound,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// File paths in node-index order.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.graph.node_weights().map(PathBuf::as_path)
    }

    pub fn edge_weight(&self, from: &Path, to: &Path) -> Option<f64> {
        let a = *self.index.get(from)?;
        let b = *self.index.get(to)?;
        let edge = self.graph.find_edge(a, b)?;
        self.graph.edge_weight(edge).copied()
    }

    /// `(source, target, weight)` triples by node index.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index(), *e.weight()))
    }

    /// Total weight of edges entering `path`.
    pub fn in_weight(&self, path: &Path) -> f64 {
        self.weight_sum(path, Direction::Incoming)
    }

    #[cfg(test)]
    fn out_weight(&self, path: &Path) -> f64 {
        self.weight_sum(path, Direction::Outgoing)
    }

    /// Files defining `name`, in path order.
    pub fn definers_of(&self, name: &str) -> impl Iterator<Item = &Path> {
        self.definers
            .get(name)
            .into_iter()
            .flat_map(|files| files.iter().map(PathBuf::as_path))
    }

    /// Number of references from other files resolved to `name` in `file`.
    pub fn reference_count(&self, file: &Path, name: &str) -> usize {
        self.inbound
            .get(&(file.to_path_buf(), name.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn weight_sum(&self, path: &Path, direction: Direction) -> f64 {
        let Some(&node) = self.index.get(path) else {
            return 0.0;
        };
        self.graph
            .edges_directed(node, direction)
            .map(|e| *e.weight())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::{FileSymbols, OccurrenceKind, SymbolOccurrence, SymbolType};

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

    fn def(file: &str, name: &str) -> SymbolOccurrence {
        occ(file, name, OccurrenceKind::Definition)
    }

    fn reference(file: &str, name: &str) -> SymbolOccurrence {
        occ(file, name, OccurrenceKind::Reference)
    }

    fn symbols(files: Vec<(&str, Vec<SymbolOccurrence>)>) -> SymbolsByFile {
        files
            .into_iter()
            .map(|(path, occurrences)| {
                (
                    PathBuf::from(path),
                    FileSymbols::parsed(PathBuf::from(path), occurrences),
                )
            })
            .collect()
    }

    #[test]
    fn repeated_references_accumulate_weight() {
        let graph = ReferenceGraph::build(&symbols(vec![
            ("a.py", vec![reference("a.py", "f"), reference("a.py", "f"), reference("a.py", "g")]),
            ("b.py", vec![def("b.py", "f"), def("b.py", "g")]),
        ]));
        assert_eq!(graph.edge_weight(Path::new("a.py"), Path::new("b.py")), Some(3.0));
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.in_weight(Path::new("b.py")), 3.0);
        assert_eq!(graph.out_weight(Path::new("a.py")), 3.0);
        assert_eq!(graph.reference_count(Path::new("b.py"), "f"), 2);
    }

    #[test]
    fn same_file_definition_wins_and_adds_no_edge() {
        let graph = ReferenceGraph::build(&symbols(vec![
            ("a.py", vec![def("a.py", "helper"), reference("a.py", "helper")]),
            ("b.py", vec![def("b.py", "helper")]),
        ]));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn ambiguous_names_resolve_to_first_path() {
        let graph = ReferenceGraph::build(&symbols(vec![
            ("main.py", vec![reference("main.py", "run")]),
            ("z.py", vec![def("z.py", "run")]),
            ("a.py", vec![def("a.py", "run")]),
        ]));
        assert_eq!(graph.edge_weight(Path::new("main.py"), Path::new("a.py")), Some(1.0));
        assert_eq!(graph.edge_weight(Path::new("main.py"), Path::new("z.py")), None);
        let definers: Vec<&Path> = graph.definers_of("run").collect();
        assert_eq!(definers, vec![Path::new("a.py"), Path::new("z.py")]);
    }

    #[test]
    fn unresolved_references_are_dropped() {
        let graph = ReferenceGraph::build(&symbols(vec![
            ("a.py", vec![reference("a.py", "print")]),
            ("b.py", vec![]),
        ]));
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn nodes_follow_path_order() {
        let graph = ReferenceGraph::build(&symbols(vec![
            ("c.py", vec![]),
            ("a.py", vec![]),
            ("b.py", vec![]),
        ]));
        let files: Vec<&Path> = graph.files().collect();
        assert_eq!(files, vec![Path::new("a.py"), Path::new("b.py"), Path::new("c.py")]);
    }
}
