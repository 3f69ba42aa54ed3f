//! MCP server interface exposing repository maps to IDEs and agents.
//!
//! Implements a Model Context Protocol server using rmcp that exposes the
//! `get_repo_map` tool over stdio transport. The server keeps one
//! [`cartograph_repomap::RepoMapService`] alive for its whole lifetime, so
//! repeated calls reuse the in-memory graph as well as the on-disk caches.
//!
//! # Examples
//!
//! ```no_run
//! use std::path::PathBuf;
//! use cartograph_core::CartographConfig;
//!
//! # async fn example() -> Result<(), cartograph_core::CartographError> {
//! cartograph_mcp::server::run_server(PathBuf::from("."), CartographConfig::default()).await?;
//! # Ok(())
//! # }
//! ```

pub mod server;
pub mod tools;
