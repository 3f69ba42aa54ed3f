use std::path::{Path, PathBuf};

use cartograph_core::{CartographError, FingerprintMode, WalkConfig};
use tracing::debug;

use crate::fingerprint::FileFingerprint;

/// A source file discovered during repository walking.
///
/// Content is not read here; only the fingerprint is computed, so an unchanged
/// repository can be recognized without touching file bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// Path relative to the repository root.
    pub path: PathBuf,
    /// Absolute path on disk.
    pub abs_path: PathBuf,
    /// Detected programming language.
    pub language: Language,
    pub fingerprint: FileFingerprint,
}

/// Programming language detected from file extension.
///
/// # Examples
///
/// ```
/// use cartograph_repomap::walker::Language;
///
/// assert_eq!(Language::from_extension("rs"), Language::Rust);
/// assert_eq!(Language::from_extension("py"), Language::Python);
/// assert_eq!(Language::from_extension("tsx"), Language::Tsx);
/// assert_eq!(Language::from_extension("hpp"), Language::Cpp);
/// assert_eq!(Language::from_extension("kts"), Language::Kotlin);
/// assert_eq!(Language::from_extension("txt"), Language::Unknown);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    TypeScript,
    Tsx,
    JavaScript,
    Go,
    Java,
    C,
    Cpp,
    Ruby,
    Php,
    Kotlin,
    Swift,
    Unknown,
}

impl Language {
    /// Detect language from a file extension string (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "rs" => Language::Rust,
            "py" | "pyi" => Language::Python,
            "ts" | "mts" | "cts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" | "hh" => Language::Cpp,
            "rb" => Language::Ruby,
            "php" => Language::Php,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            _ => Language::Unknown,
        }
    }

    /// Detect language from a path's extension.
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|e| e.to_str())
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown)
    }

    /// Get the tree-sitter language grammar for this language.
    ///
    /// Returns `None` for `Language::Unknown`.
    pub fn tree_sitter_language(&self) -> Option<tree_sitter::Language> {
        match self {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Language::Java => Some(tree_sitter_java::LANGUAGE.into()),
            Language::C => Some(tree_sitter_c::LANGUAGE.into()),
            Language::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            Language::Ruby => Some(tree_sitter_ruby::LANGUAGE.into()),
            Language::Php => Some(tree_sitter_php::LANGUAGE_PHP.into()),
            Language::Kotlin => Some(tree_sitter_kotlin_ng::LANGUAGE.into()),
            Language::Swift => Some(tree_sitter_swift::LANGUAGE.into()),
            Language::Unknown => None,
        }
    }
}

/// Canonicalize `root` and make sure it is a readable directory.
///
/// # Errors
///
/// Returns [`CartographError::RepoUnreadable`] when the path is missing, not a
/// directory, or cannot be listed.
pub fn resolve_root(root: &Path) -> Result<PathBuf, CartographError> {
    let unreadable = |reason: String| CartographError::RepoUnreadable {
        path: root.to_path_buf(),
        reason,
    };
    let canonical = root.canonicalize().map_err(|e| unreadable(e.to_string()))?;
    if !canonical.is_dir() {
        return Err(unreadable("not a directory".into()));
    }
    std::fs::read_dir(&canonical).map_err(|e| unreadable(e.to_string()))?;
    Ok(canonical)
}

/// Walk a repository, respecting `.gitignore`, returning tracked source files
/// sorted by relative path.
///
/// Skips files larger than `config.max_file_size` and files with unknown
/// extensions. Files with a known extension but binary content are still
/// tracked; they fail later at extraction.
///
/// # Errors
///
/// Returns [`CartographError::RepoUnreadable`] if the root directory cannot be
/// read.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use cartograph_core::{FingerprintMode, WalkConfig};
/// use cartograph_repomap::walker::walk_repo;
///
/// let files = walk_repo(Path::new("."), &WalkConfig::default(), FingerprintMode::Metadata).unwrap();
/// for f in &files {
///     println!("{}: {:?}", f.path.display(), f.language);
/// }
/// ```
pub fn walk_repo(
    root: &Path,
    config: &WalkConfig,
    mode: FingerprintMode,
) -> Result<Vec<TrackedFile>, CartographError> {
    let root = resolve_root(root)?;
    let walker = ignore::WalkBuilder::new(&root).build();
    let mut files = Vec::new();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "skipping unreadable walk entry");
                continue;
            }
        };

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path();
        let language = Language::from_path(path);
        if language == Language::Unknown {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        if metadata.len() > config.max_file_size {
            debug!(path = %path.display(), size = metadata.len(), "skipping oversized file");
            continue;
        }

        let relative = match path.strip_prefix(&root) {
            Ok(r) => r.to_path_buf(),
            Err(_) => path.to_path_buf(),
        };

        let fingerprint = match FileFingerprint::compute(relative.clone(), path, &metadata, mode)
        {
            Ok(fp) => fp,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping file that cannot be fingerprinted");
                continue;
            }
        };

        files.push(TrackedFile {
            path: relative,
            abs_path: path.to_path_buf(),
            language,
            fingerprint,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
