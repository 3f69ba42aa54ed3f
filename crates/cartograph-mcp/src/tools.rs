//! Tool implementations for the cartograph MCP server.
//!
//! One tool is exposed: `get_repo_map`. Map generation runs on the blocking
//! pool under a timeout; when the timeout fires the request's cancellation
//! token is tripped so the worker stops picking up new files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cartograph_core::{CartographConfig, CartographError, OutputFormat};
use cartograph_repomap::{CancellationToken, RepoMapRequest, RepoMapService};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, tool, tool_router, ErrorData as McpError,
};
use serde::Deserialize;
use tracing::warn;

/// Default time allowed for one `get_repo_map` call.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// MCP server exposing repository maps.
///
/// # Examples
///
/// ```
/// use cartograph_core::CartographConfig;
/// use cartograph_mcp::tools::CartographServer;
///
/// let dir = tempfile::tempdir().unwrap();
/// let server = CartographServer::new(dir.path().to_path_buf(), CartographConfig::default()).unwrap();
/// ```
#[derive(Clone)]
pub struct CartographServer {
    pub(crate) repo_path: PathBuf,
    pub(crate) service: Arc<RepoMapService>,
    pub(crate) defaults: MapDefaults,
    pub(crate) tool_router: ToolRouter<Self>,
}

/// Request defaults taken from the `[map]` config section.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MapDefaults {
    max_tokens: usize,
    format: OutputFormat,
    enable_enhancement: bool,
}

/// Parameters for the `get_repo_map` tool.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct GetRepoMapParams {
    /// Repository path (default: server's configured path).
    pub path: Option<String>,
    /// Files currently open or being edited, relative to the repository.
    pub focus_files: Option<Vec<String>>,
    /// Identifiers mentioned in the conversation.
    pub mentioned_idents: Option<Vec<String>>,
    /// Token budget for the map (default: from config, 5000).
    pub max_tokens: Option<usize>,
    /// Content layout: "text" or "markdown" (default: from config).
    pub format: Option<String>,
    /// Append reference counts to each definition (default: false).
    pub enable_enhancement: Option<bool>,
    /// Give up after this many milliseconds (default: 30000).
    pub timeout_ms: Option<u64>,
}

fn mcp_err(msg: impl Into<String>) -> McpError {
    McpError::internal_error(msg.into(), None)
}

#[tool_router]
impl CartographServer {
    /// Create a server for `repo_path`, opening its cache database.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError`] if the repository is unreadable or the
    /// cache cannot be opened.
    pub fn new(repo_path: PathBuf, config: CartographConfig) -> Result<Self, CartographError> {
        let service = RepoMapService::open(&repo_path, config)?;
        Ok(Self::with_service(repo_path, Arc::new(service)))
    }

    /// Create a server around an existing service.
    pub fn with_service(repo_path: PathBuf, service: Arc<RepoMapService>) -> Self {
        let map = &service.config().map;
        let defaults = MapDefaults {
            max_tokens: map.max_tokens,
            format: map.format,
            enable_enhancement: map.enable_enhancement,
        };
        Self {
            repo_path,
            service,
            defaults,
            tool_router: Self::tool_router(),
        }
    }

    fn resolve_path(&self, path: &Option<String>) -> Result<PathBuf, McpError> {
        let canonical_repo_path = self.repo_path.canonicalize().map_err(|e| {
            mcp_err(format!(
                "Failed to access configured repository path {}: {e}",
                self.repo_path.display()
            ))
        })?;

        let requested_path = match path {
            Some(p) => {
                let input_path = PathBuf::from(p);
                if input_path.is_absolute() {
                    input_path
                } else {
                    canonical_repo_path.join(input_path)
                }
            }
            None => canonical_repo_path.clone(),
        };

        let canonical_requested_path = requested_path.canonicalize().map_err(|e| {
            mcp_err(format!(
                "Failed to resolve path {}: {e}",
                requested_path.display()
            ))
        })?;

        if !canonical_requested_path.starts_with(&canonical_repo_path) {
            return Err(mcp_err(format!(
                "Path {} is outside the configured repository {}",
                canonical_requested_path.display(),
                canonical_repo_path.display()
            )));
        }

        Ok(canonical_requested_path)
    }

    fn build_request(&self, params: GetRepoMapParams) -> Result<RepoMapRequest, McpError> {
        let repo_path = self.resolve_path(&params.path)?;
        let format = match params.format.as_deref() {
            Some(f) => f.parse::<OutputFormat>().map_err(|e| {
                McpError::invalid_params(format!("{e}. Use \"text\" or \"markdown\"."), None)
            })?,
            None => self.defaults.format,
        };

        Ok(RepoMapRequest::new(repo_path)
            .with_focus_files(params.focus_files.unwrap_or_default())
            .with_mentioned_idents(params.mentioned_idents.unwrap_or_default())
            .with_max_tokens(params.max_tokens.unwrap_or(self.defaults.max_tokens))
            .with_format(format)
            .with_enhancement(
                params
                    .enable_enhancement
                    .unwrap_or(self.defaults.enable_enhancement),
            ))
    }

    #[tool(
        name = "get_repo_map",
        description = "Get a ranked, token-budgeted map of the repository: the most important files and the classes, functions and methods they define. Files are ranked by how often other files reference them, biased toward focus_files and files defining mentioned_idents. Repeated calls on an unchanged tree are served from cache. Use this to orient yourself before reading or editing code."
    )]
    pub async fn get_repo_map(
        &self,
        Parameters(params): Parameters<GetRepoMapParams>,
    ) -> Result<CallToolResult, McpError> {
        let timeout = Duration::from_millis(params.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let request = self.build_request(params)?;

        let token = CancellationToken::new();
        let service = Arc::clone(&self.service);
        let worker_token = token.clone();
        let task = tokio::task::spawn_blocking(move || {
            service.repo_map_with_cancel(&request, &worker_token)
        });

        let map = match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined
                .map_err(|e| mcp_err(format!("Repo map task failed: {e}")))?
                .map_err(|e| mcp_err(format!("Failed to generate repo map: {e}")))?,
            Err(_) => {
                token.cancel();
                warn!(timeout_ms = timeout.as_millis() as u64, "repo map request timed out");
                return Err(mcp_err(format!(
                    "Repo map timed out after {} ms. Retry with a larger timeout_ms; files parsed so far are cached.",
                    timeout.as_millis()
                )));
            }
        };

        let json = serde_json::to_string_pretty(&map).map_err(|e| mcp_err(e.to_string()))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}
