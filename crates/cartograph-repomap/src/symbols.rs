use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Whether an occurrence introduces a name or uses one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccurrenceKind {
    Definition,
    Reference,
}

/// Classification of a named code entity.
///
/// Structs, enums, traits and interfaces are all reported as `Class`.
///
/// # Examples
///
/// ```
/// use cartograph_repomap::symbols::SymbolType;
///
/// assert_eq!(SymbolType::Function.label(), "function");
/// assert_eq!(SymbolType::Module.to_string(), "module");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolType {
    Class,
    Function,
    Method,
    Variable,
    Module,
}

impl SymbolType {
    /// Short label used when rendering a definition line.
    pub fn label(self) -> &'static str {
        match self {
            SymbolType::Class => "class",
            SymbolType::Function => "function",
            SymbolType::Method => "method",
            SymbolType::Variable => "variable",
            SymbolType::Module => "module",
        }
    }
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A definition or reference of a named entity at a specific location.
///
/// Lines are 1-indexed; `column` is the 0-indexed character offset of the
/// name on `line_start`.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use cartograph_repomap::symbols::{OccurrenceKind, SymbolOccurrence, SymbolType};
///
/// let occ = SymbolOccurrence {
///     file: PathBuf::from("utils.py"),
///     line_start: 1,
///     line_end: 2,
///     column: 4,
///     kind: OccurrenceKind::Definition,
///     symbol_type: SymbolType::Function,
///     name: "add".into(),
/// };
/// assert!(occ.is_definition());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolOccurrence {
    /// File path, relative to the repository root.
    pub file: PathBuf,
    pub line_start: u32,
    pub line_end: u32,
    pub column: u32,
    pub kind: OccurrenceKind,
    pub symbol_type: SymbolType,
    pub name: String,
}

impl SymbolOccurrence {
    pub fn is_definition(&self) -> bool {
        self.kind == OccurrenceKind::Definition
    }

    pub fn is_reference(&self) -> bool {
        self.kind == OccurrenceKind::Reference
    }
}

/// Extraction result for one file at one version.
///
/// A file whose extraction failed carries an empty occurrence list and the
/// failure message; it still counts as a tracked file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSymbols {
    pub path: PathBuf,
    pub occurrences: Vec<SymbolOccurrence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileSymbols {
    /// Symbols for a successfully extracted file.
    pub fn parsed(path: PathBuf, occurrences: Vec<SymbolOccurrence>) -> Self {
        Self {
            path,
            occurrences,
            error: None,
        }
    }

    /// Placeholder for a file whose extraction failed.
    pub fn failed(path: PathBuf, error: impl Into<String>) -> Self {
        Self {
            path,
            occurrences: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Definitions ordered by position.
    pub fn definitions(&self) -> Vec<&SymbolOccurrence> {
        let mut defs: Vec<&SymbolOccurrence> = self
            .occurrences
            .iter()
            .filter(|o| o.is_definition())
            .collect();
        defs.sort_by(|a, b| {
            (a.line_start, a.column, &a.name).cmp(&(b.line_start, b.column, &b.name))
        });
        defs
    }

    pub fn references(&self) -> impl Iterator<Item = &SymbolOccurrence> {
        self.occurrences.iter().filter(|o| o.is_reference())
    }

    pub fn definition_count(&self) -> usize {
        self.occurrences.iter().filter(|o| o.is_definition()).count()
    }
}

/// All tracked files' symbols, ordered by path.
pub type SymbolsByFile = BTreeMap<PathBuf, FileSymbols>;

#[cfg(test)]
mod tests {
    use super::*;

    fn occ(name: &str, line: u32, kind: OccurrenceKind) -> SymbolOccurrence {
        SymbolOccurrence {
            file: PathBuf::from("a.py"),
            line_start: line,
            line_end: line,
            column: 0,
            kind,
            symbol_type: SymbolType::Function,
            name: name.to_string(),
        }
    }

    #[test]
    fn definitions_are_sorted_by_position() {
        let symbols = FileSymbols::parsed(
            PathBuf::from("a.py"),
            vec![
                occ("late", 10, OccurrenceKind::Definition),
                occ("call", 3, OccurrenceKind::Reference),
                occ("early", 2, OccurrenceKind::Definition),
            ],
        );
        let names: Vec<&str> = symbols
            .definitions()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["early", "late"]);
        assert_eq!(symbols.definition_count(), 2);
        assert_eq!(symbols.references().count(), 1);
    }

    #[test]
    fn failed_file_has_no_occurrences() {
        let symbols = FileSymbols::failed(PathBuf::from("b.py"), "binary content");
        assert!(symbols.is_failed());
        assert!(symbols.definitions().is_empty());
    }

    #[test]
    fn kinds_serialize_lowercase() {
        let json = serde_json::to_string(&occ("x", 1, OccurrenceKind::Reference)).unwrap();
        assert!(json.contains("\"kind\":\"reference\""));
        assert!(json.contains("\"symbol_type\":\"function\""));
    }
}
