//! Optional definition decorations.
//!
//! An [`Annotator`] is queried once per rendered definition when enhancement
//! is enabled. Failures are swallowed by the assembler: the line is simply
//! rendered undecorated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::graph::ReferenceGraph;
use crate::symbols::SymbolsByFile;

/// Extra information about one definition.
///
/// # Examples
///
/// ```
/// use cartograph_repomap::enhance::Annotation;
///
/// let annotation = Annotation {
///     type_signature: Some("(a: int, b: int) -> int".into()),
///     reference_count: Some(3),
/// };
/// assert_eq!(annotation.suffix(), ": (a: int, b: int) -> int [3 refs]");
/// assert_eq!(Annotation::default().suffix(), "");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub type_signature: Option<String>,
    pub reference_count: Option<usize>,
}

impl Annotation {
    /// Text appended to a rendered definition line.
    pub fn suffix(&self) -> String {
        let mut out = String::new();
        if let Some(sig) = self.type_signature.as_deref().filter(|s| !s.is_empty()) {
            out.push_str(": ");
            out.push_str(sig);
        }
        if let Some(count) = self.reference_count {
            let noun = if count == 1 { "ref" } else { "refs" };
            out.push_str(&format!(" [{count} {noun}]"));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnnotationError {
    #[error("annotator unavailable: {0}")]
    Unavailable(String),

    #[error("no symbol at {file}:{line}:{character}")]
    NotFound {
        file: PathBuf,
        line: u32,
        character: u32,
    },
}

/// Source of definition annotations, typically a language server.
///
/// `line` and `character` are 0-based, following the Language Server
/// Protocol convention.
pub trait Annotator: Send + Sync {
    /// Stable identity of this annotator and its output format. Mixed into
    /// result cache keys so maps decorated by different annotators never
    /// collide.
    fn id(&self) -> &str;

    fn annotate(&self, file: &Path, line: u32, character: u32)
        -> Result<Annotation, AnnotationError>;
}

/// Built-in annotator reporting how many other files reference each
/// definition.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use cartograph_repomap::enhance::{Annotator, ReferenceCountAnnotator};
/// use cartograph_repomap::graph::ReferenceGraph;
/// use cartograph_repomap::symbols::SymbolsByFile;
///
/// let symbols = SymbolsByFile::new();
/// let annotator = ReferenceCountAnnotator::new(&ReferenceGraph::build(&symbols), &symbols);
/// assert!(annotator.annotate(Path::new("a.py"), 0, 0).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReferenceCountAnnotator {
    counts: HashMap<(PathBuf, u32, u32), usize>,
}

impl ReferenceCountAnnotator {
    pub fn new(graph: &ReferenceGraph, symbols: &SymbolsByFile) -> Self {
        let mut counts = HashMap::new();
        for (path, file) in symbols {
            for def in file.occurrences.iter().filter(|o| o.is_definition()) {
                let line = def.line_start.saturating_sub(1);
                counts.insert(
                    (path.clone(), line, def.column),
                    graph.reference_count(path, &def.name),
                );
            }
        }
        Self { counts }
    }
}

impl ReferenceCountAnnotator {
    pub const ID: &'static str = "reference-count/1";
}

impl Annotator for ReferenceCountAnnotator {
    fn id(&self) -> &str {
        Self::ID
    }

    fn annotate(
        &self,
        file: &Path,
        line: u32,
        character: u32,
    ) -> Result<Annotation, AnnotationError> {
        self.counts
            .get(&(file.to_path_buf(), line, character))
            .map(|&count| Annotation {
                type_signature: None,
                reference_count: Some(count),
            })
            .ok_or_else(|| AnnotationError::NotFound {
                file: file.to_path_buf(),
                line,
                character,
            })
    }
}
