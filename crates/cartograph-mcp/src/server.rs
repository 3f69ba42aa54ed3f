//! MCP server setup and lifecycle.
//!
//! Provides [`run_server`] which starts the stdio-based MCP server and
//! blocks until the client disconnects.

use std::path::PathBuf;

use cartograph_core::{CartographConfig, CartographError};
use rmcp::{model::*, tool_handler, transport::stdio, ServerHandler, ServiceExt};
use tracing::info;

use crate::tools::CartographServer;

const SERVER_INSTRUCTIONS: &str = "\
Cartograph produces compact, ranked maps of a source repository for use as context:\n\
- get_repo_map: the most important files and their definitions within a token budget. \
Pass focus_files for the files you are editing and mentioned_idents for names from the \
conversation to bias the ranking toward them.";

#[tool_handler]
impl ServerHandler for CartographServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "cartograph".to_string(),
                title: Some("Cartograph Repository Maps".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some("Cached, token-budgeted repository maps".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        }
    }
}

/// Start the MCP server on stdio transport.
///
/// This is called by the `cartograph mcp` CLI subcommand. It blocks until
/// the client closes stdin.
///
/// # Errors
///
/// Returns [`CartographError`] if the repository or its cache cannot be
/// opened, or the transport fails.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use cartograph_core::CartographConfig;
///
/// # async fn example() -> Result<(), cartograph_core::CartographError> {
/// cartograph_mcp::server::run_server(PathBuf::from("."), CartographConfig::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server(
    repo_path: PathBuf,
    config: CartographConfig,
) -> Result<(), CartographError> {
    let server = CartographServer::new(repo_path.clone(), config)?;
    info!(repo = %repo_path.display(), "starting MCP server on stdio");
    let service = server
        .serve(stdio())
        .await
        .map_err(|e| CartographError::Config(format!("MCP server failed to start: {e}")))?;

    service
        .waiting()
        .await
        .map_err(|e| CartographError::Config(format!("MCP server error: {e}")))?;

    Ok(())
}
