use std::path::PathBuf;

/// Errors that can occur while building repository maps.
///
/// Per-file and per-entry failures are absorbed inside the pipeline; only the
/// variants below ever reach a caller. The binary renders them via `miette`.
///
/// # Examples
///
/// ```
/// use cartograph_core::CartographError;
///
/// let err = CartographError::Config("max_tokens must be a number".into());
/// assert!(err.to_string().contains("max_tokens"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum CartographError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(
        code(cartograph::config),
        help("check the values in .cartograph.toml")
    )]
    Config(String),

    /// Cache database failure.
    #[error("database error: {0}")]
    #[diagnostic(
        code(cartograph::database),
        help("remove the cache directory (cartograph cache clear) to rebuild it")
    )]
    Database(String),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The repository root does not exist or cannot be listed.
    #[error("cannot read repository at {}: {reason}", .path.display())]
    #[diagnostic(code(cartograph::repo_unreadable))]
    RepoUnreadable {
        /// Path that was requested.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// The caller cancelled the request before it completed.
    #[error("repository map request was cancelled")]
    Cancelled,
}
