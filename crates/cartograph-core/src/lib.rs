//! Core types, configuration, and error handling for cartograph.
//!
//! This crate provides the shared foundation used by the other crates:
//! - [`CartographError`]: unified error type using `thiserror` and `miette`
//! - [`CartographConfig`]: configuration loaded from `.cartograph.toml`
//! - Shared types: [`OutputFormat`], [`FingerprintMode`]

mod config;
mod error;
mod types;

pub use config::{CacheConfig, CartographConfig, MapConfig, RankConfig, WalkConfig};
pub use error::CartographError;
pub use types::{FingerprintMode, OutputFormat};
