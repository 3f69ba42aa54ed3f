//! Token-budgeted rendering of a ranked file list.
//!
//! Files are emitted focus-first, then in rank order. Each file is a header
//! line followed by one line per definition in position order. Budget is
//! charged per line using [`estimate_tokens`]; when a file does not fit in
//! full, the longest prefix of its definitions that fits together with a
//! `... N more` marker is emitted and assembly stops. Decorations from an
//! [`Annotator`] are appended after budgeting and are not charged.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use cartograph_core::OutputFormat;

use crate::enhance::Annotator;
use crate::rank::Ranking;
use crate::symbols::{SymbolOccurrence, SymbolsByFile};

const BRANCH: &str = "\u{251c}\u{2500}\u{2500} ";
const LAST_BRANCH: &str = "\u{2514}\u{2500}\u{2500} ";

/// Estimated token count: `ceil(chars / chars_per_token)`.
///
/// # Examples
///
/// ```
/// use cartograph_repomap::assemble::estimate_tokens;
///
/// assert_eq!(estimate_tokens("", 4), 0);
/// assert_eq!(estimate_tokens("abcd", 4), 1);
/// assert_eq!(estimate_tokens("abcde", 4), 2);
/// ```
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    text.chars().count().div_ceil(chars_per_token.max(1))
}

/// Rendered map plus what went into it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assembly {
    pub content: String,
    pub rendered_files: usize,
    /// Definitions actually rendered.
    pub definition_count: usize,
    /// Estimated tokens of `content`, decorations included.
    pub token_estimate: usize,
    pub truncated: bool,
    /// Not even one file header fit; `content` is a single summary line.
    pub budget_too_small: bool,
    /// The focus files alone exceeded the budget.
    pub focus_truncated: bool,
}

/// Renders a [`Ranking`] within a token budget.
///
/// [`OutputFormat::Json`] uses the text layout for `content`; the JSON
/// envelope is produced by the caller.
///
/// # Examples
///
/// ```
/// use cartograph_core::OutputFormat;
/// use cartograph_repomap::assemble::Assembler;
/// use cartograph_repomap::rank::Ranking;
/// use cartograph_repomap::symbols::SymbolsByFile;
///
/// let assembly = Assembler::new(OutputFormat::Text, 4).assemble(
///     &Ranking::default(),
///     &SymbolsByFile::new(),
///     &[],
///     100,
/// );
/// assert!(assembly.content.is_empty());
/// assert!(!assembly.truncated);
/// ```
pub struct Assembler<'a> {
    format: OutputFormat,
    chars_per_token: usize,
    annotator: Option<&'a dyn Annotator>,
}

/// How much of one file fits.
enum Fit {
    All,
    Prefix(usize),
    Nothing,
}

impl<'a> Assembler<'a> {
    pub fn new(format: OutputFormat, chars_per_token: usize) -> Self {
        Self {
            format,
            chars_per_token: chars_per_token.max(1),
            annotator: None,
        }
    }

    pub fn with_annotator(mut self, annotator: &'a dyn Annotator) -> Self {
        self.annotator = Some(annotator);
        self
    }

    pub fn assemble(
        &self,
        ranking: &Ranking,
        symbols: &SymbolsByFile,
        focus_files: &[PathBuf],
        max_tokens: usize,
    ) -> Assembly {
        let focus: BTreeSet<&Path> = focus_files
            .iter()
            .map(PathBuf::as_path)
            .filter(|p| symbols.contains_key(*p))
            .collect();

        let focus_order = ranking
            .files
            .iter()
            .filter(|f| focus.contains(f.path.as_path()))
            .map(|f| (f.path.as_path(), true));
        let rest = ranking
            .files
            .iter()
            .filter(|f| !focus.contains(f.path.as_path()))
            .filter(|f| symbols.get(&f.path).is_some_and(|s| s.definition_count() > 0))
            .map(|f| (f.path.as_path(), false));

        let mut assembly = Assembly::default();
        let mut lines: Vec<String> = Vec::new();
        let mut used = 0usize;

        for (path, is_focus) in focus_order.chain(rest) {
            let defs = symbols
                .get(path)
                .map(|s| s.definitions())
                .unwrap_or_default();
            let header = self.header(path);
            let bodies: Vec<String> = defs.iter().map(|d| self.body(d)).collect();

            let remaining = max_tokens.saturating_sub(used);
            let header_cost = self.cost(&header);
            let costs: Vec<usize> = bodies
                .iter()
                .map(|b| self.cost(&self.definition_line(b, false)))
                .collect();

            let fit = self.fit(header_cost, &costs, remaining);
            let shown = match fit {
                Fit::All => bodies.len(),
                Fit::Prefix(k) => k,
                Fit::Nothing => {
                    assembly.truncated = true;
                    assembly.focus_truncated |= is_focus;
                    break;
                }
            };
            let hidden = bodies.len() - shown;

            lines.push(header);
            used += header_cost;
            for (i, (body, def)) in bodies.iter().zip(&defs).take(shown).enumerate() {
                let last = i + 1 == shown && hidden == 0;
                let mut line = self.definition_line(body, last);
                used += self.cost(&line);
                line.push_str(&self.decoration(path, def));
                lines.push(line);
            }
            if hidden > 0 {
                let marker = self.marker(hidden);
                used += self.cost(&marker);
                lines.push(marker);
            }
            if self.format == OutputFormat::Markdown {
                lines.push(String::new());
            }

            assembly.rendered_files += 1;
            assembly.definition_count += shown;

            if hidden > 0 {
                assembly.truncated = true;
                assembly.focus_truncated |= is_focus;
                break;
            }
        }

        if assembly.rendered_files == 0 && assembly.truncated {
            assembly.budget_too_small = true;
            lines = vec![self.summary(symbols.len())];
        }

        while lines.last().is_some_and(String::is_empty) {
            lines.pop();
        }
        let mut content = String::new();
        for line in &lines {
            let _ = writeln!(content, "{line}");
            assembly.token_estimate += self.cost(line);
        }
        assembly.content = content;
        assembly
    }

    /// Largest amount of this file that fits in `remaining` tokens.
    fn fit(&self, header_cost: usize, costs: &[usize], remaining: usize) -> Fit {
        let total: usize = header_cost + costs.iter().sum::<usize>();
        if total <= remaining {
            return Fit::All;
        }
        let mut prefix: usize = header_cost + costs.iter().sum::<usize>();
        for k in (0..costs.len()).rev() {
            prefix -= costs[k];
            let marker_cost = self.cost(&self.marker(costs.len() - k));
            if prefix + marker_cost <= remaining {
                return Fit::Prefix(k);
            }
        }
        Fit::Nothing
    }

    fn cost(&self, line: &str) -> usize {
        estimate_tokens(line, self.chars_per_token)
    }

    fn header(&self, path: &Path) -> String {
        let display = crate::fingerprint::path_key(path);
        match self.format {
            OutputFormat::Markdown => format!("## {display}"),
            OutputFormat::Text | OutputFormat::Json => format!("{display}:"),
        }
    }

    /// Definition text without tree prefix or decoration.
    fn body(&self, def: &SymbolOccurrence) -> String {
        match self.format {
            OutputFormat::Markdown => format!("{} `{}`", def.symbol_type.label(), def.name),
            OutputFormat::Text | OutputFormat::Json => {
                format!("{} {}", def.symbol_type.label(), def.name)
            }
        }
    }

    fn definition_line(&self, body: &str, last: bool) -> String {
        match self.format {
            OutputFormat::Markdown => format!("- {body}"),
            OutputFormat::Text | OutputFormat::Json => {
                let branch = if last { LAST_BRANCH } else { BRANCH };
                format!("{branch}{body}")
            }
        }
    }

    fn marker(&self, hidden: usize) -> String {
        match self.format {
            OutputFormat::Markdown => format!("- ... {hidden} more"),
            OutputFormat::Text | OutputFormat::Json => format!("{LAST_BRANCH}... {hidden} more"),
        }
    }

    fn summary(&self, file_count: usize) -> String {
        match self.format {
            OutputFormat::Markdown => {
                format!("# Repository Map ({file_count} files, token budget too small)")
            }
            OutputFormat::Text | OutputFormat::Json => {
                format!("repository map: {file_count} files (token budget too small)")
            }
        }
    }

    fn decoration(&self, path: &Path, def: &SymbolOccurrence) -> String {
        let Some(annotator) = self.annotator else {
            return String::new();
        };
        match annotator.annotate(path, def.line_start.saturating_sub(1), def.column) {
            Ok(annotation) => annotation.suffix(),
            Err(e) => {
                tracing::debug!(path = %path.display(), name = %def.name, error = %e, "annotation skipped");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhance::{Annotation, AnnotationError};
    use crate::rank::RankedFile;
    use crate::symbols::{FileSymbols, OccurrenceKind, SymbolType};

    fn def(file: &str, name: &str, line: u32) -> SymbolOccurrence {
        SymbolOccurrence {
            file: PathBuf::from(file),
            line_start: line,
            line_end: line,
            column: 0,
            kind: OccurrenceKind::Definition,
            symbol_type: SymbolType::Function,
            name: name.to_string(),
        }
    }

    /// `core.py` (3 defs) ranks above `app.py` (2 defs) above `empty.py`.
    fn fixture() -> (Ranking, SymbolsByFile) {
        let mut symbols = SymbolsByFile::new();
        symbols.insert(
            "core.py".into(),
            FileSymbols::parsed(
                "core.py".into(),
                vec![def("core.py", "gamma", 9), def("core.py", "alpha", 1), def("core.py", "beta", 5)],
            ),
        );
        symbols.insert(
            "app.py".into(),
            FileSymbols::parsed("app.py".into(), vec![def("app.py", "main", 1), def("app.py", "run", 4)]),
        );
        symbols.insert("empty.py".into(), FileSymbols::parsed("empty.py".into(), vec![]));
        let ranking = Ranking {
            files: ["core.py", "app.py", "empty.py"]
                .iter()
                .enumerate()
                .map(|(i, p)| RankedFile {
                    path: PathBuf::from(p),
                    score: 1.0 / (i as f64 + 2.0),
                    in_weight: 0.0,
                })
                .collect(),
            iterations: 5,
            converged: true,
        };
        (ranking, symbols)
    }

    fn text(max_tokens: usize, focus: &[PathBuf]) -> Assembly {
        let (ranking, symbols) = fixture();
        Assembler::new(OutputFormat::Text, 4).assemble(&ranking, &symbols, focus, max_tokens)
    }

    #[test]
    fn renders_everything_with_large_budget() {
        let assembly = text(10_000, &[]);
        let expected = "core.py:\n\
            \u{251c}\u{2500}\u{2500} function alpha\n\
            \u{251c}\u{2500}\u{2500} function beta\n\
            \u{2514}\u{2500}\u{2500} function gamma\n\
            app.py:\n\
            \u{251c}\u{2500}\u{2500} function main\n\
            \u{2514}\u{2500}\u{2500} function run\n";
        assert_eq!(assembly.content, expected);
        assert_eq!(assembly.rendered_files, 2);
        assert_eq!(assembly.definition_count, 5);
        assert!(!assembly.truncated);
        assert_eq!(
            assembly.token_estimate,
            assembly.content.lines().map(|l| estimate_tokens(l, 4)).sum::<usize>()
        );
    }

    #[test]
    fn truncates_with_marker() {
        // header "core.py:" = 2, each definition line = 5, marker "└── ... 2 more" = 4
        let assembly = text(11, &[]);
        assert!(assembly.truncated);
        assert_eq!(assembly.definition_count, 1);
        assert!(assembly.content.ends_with("... 2 more\n"));
        assert!(!assembly.content.contains("app.py"));
        assert!(assembly.token_estimate <= 11);
    }

    #[test]
    fn budget_is_never_exceeded_and_monotonic() {
        let mut previous = 0;
        for budget in 0..60 {
            let assembly = text(budget, &[]);
            if !assembly.budget_too_small {
                assert!(assembly.token_estimate <= budget, "budget {budget}");
            }
            assert!(assembly.definition_count >= previous, "budget {budget}");
            previous = assembly.definition_count;
        }
    }

    #[test]
    fn tiny_budget_yields_summary_only() {
        let assembly = text(1, &[]);
        assert!(assembly.budget_too_small);
        assert!(assembly.truncated);
        assert_eq!(assembly.definition_count, 0);
        assert_eq!(assembly.content.lines().count(), 1);
        assert!(assembly.content.contains("3 files"));
    }

    #[test]
    fn focus_files_come_first() {
        let assembly = text(10_000, &[PathBuf::from("app.py")]);
        assert!(assembly.content.starts_with("app.py:"));
        assert!(assembly.content.contains("core.py:"));
    }

    #[test]
    fn focus_file_without_definitions_renders_header() {
        let assembly = text(10_000, &[PathBuf::from("empty.py")]);
        assert!(assembly.content.starts_with("empty.py:\n"));
        assert_eq!(assembly.rendered_files, 3);
    }

    #[test]
    fn oversized_focus_sets_focus_truncated() {
        let assembly = text(8, &[PathBuf::from("core.py")]);
        assert!(assembly.truncated);
        assert!(assembly.focus_truncated);
    }

    #[test]
    fn markdown_layout() {
        let (ranking, symbols) = fixture();
        let assembly =
            Assembler::new(OutputFormat::Markdown, 4).assemble(&ranking, &symbols, &[], 10_000);
        assert!(assembly.content.starts_with("## core.py\n- function `alpha`\n"));
        assert!(assembly.content.contains("\n\n## app.py\n"));
        assert!(assembly.content.ends_with("- function `run`\n"));
    }

    struct Fixed;

    impl Annotator for Fixed {
        fn id(&self) -> &str {
            "fixed"
        }

        fn annotate(
            &self,
            _file: &Path,
            line: u32,
            _character: u32,
        ) -> Result<Annotation, AnnotationError> {
            if line == 0 {
                Ok(Annotation {
                    type_signature: Some("() -> None".into()),
                    reference_count: None,
                })
            } else {
                Err(AnnotationError::Unavailable("offline".into()))
            }
        }
    }

    #[test]
    fn decorations_are_appended_and_failures_ignored() {
        let (ranking, symbols) = fixture();
        let annotator = Fixed;
        let assembly = Assembler::new(OutputFormat::Text, 4)
            .with_annotator(&annotator)
            .assemble(&ranking, &symbols, &[], 10_000);
        assert!(assembly.content.contains("function alpha: () -> None\n"));
        assert!(assembly.content.contains("function beta\n"));
        assert_eq!(assembly.definition_count, 5);
    }

    struct Offline;

    impl Annotator for Offline {
        fn id(&self) -> &str {
            "offline"
        }

        fn annotate(
            &self,
            _file: &Path,
            _line: u32,
            _character: u32,
        ) -> Result<Annotation, AnnotationError> {
            Err(AnnotationError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn annotations_never_change_selection() {
        let (ranking, symbols) = fixture();
        let focus = [PathBuf::from("app.py")];
        for format in [OutputFormat::Text, OutputFormat::Markdown] {
            for focus in [&[][..], &focus[..]] {
                for budget in 0..80 {
                    let plain =
                        Assembler::new(format, 4).assemble(&ranking, &symbols, focus, budget);
                    let decorated = Assembler::new(format, 4)
                        .with_annotator(&Fixed)
                        .assemble(&ranking, &symbols, focus, budget);
                    let failing = Assembler::new(format, 4)
                        .with_annotator(&Offline)
                        .assemble(&ranking, &symbols, focus, budget);

                    let at = format!("{format} budget {budget}");
                    for other in [&decorated, &failing] {
                        assert_eq!(plain.definition_count, other.definition_count, "{at}");
                        assert_eq!(plain.rendered_files, other.rendered_files, "{at}");
                        assert_eq!(plain.truncated, other.truncated, "{at}");
                        assert_eq!(plain.budget_too_small, other.budget_too_small, "{at}");
                    }
                    assert_eq!(plain.content, failing.content, "{at}");
                }
            }
        }
    }
}
