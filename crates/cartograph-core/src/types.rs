use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Output format for rendered maps and command results.
///
/// `Text` and `Markdown` shape the map content itself; `Json` wraps the
/// content and its metadata in a single document.
///
/// # Examples
///
/// ```
/// use cartograph_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Tree-style plain text.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// How a file's "unchanged" status is decided.
///
/// # Examples
///
/// ```
/// use cartograph_core::FingerprintMode;
///
/// assert_eq!(FingerprintMode::default(), FingerprintMode::Metadata);
/// assert_eq!("content".parse::<FingerprintMode>().unwrap(), FingerprintMode::Content);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Modification time plus size. Cheap: no file reads on the hot path.
    #[default]
    Metadata,
    /// Size plus SHA-256 of the content, for filesystems with unreliable mtimes.
    Content,
}

impl fmt::Display for FingerprintMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintMode::Metadata => write!(f, "metadata"),
            FingerprintMode::Content => write!(f, "content"),
        }
    }
}

impl FromStr for FingerprintMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "metadata" | "mtime" => Ok(FingerprintMode::Metadata),
            "content" | "hash" => Ok(FingerprintMode::Content),
            other => Err(format!("unknown fingerprint mode: {other}")),
        }
    }
}
