use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CartographError;
use crate::types::{FingerprintMode, OutputFormat};

/// Top-level configuration loaded from `.cartograph.toml`.
///
/// Supports layered resolution: CLI flags > local config > defaults.
///
/// # Examples
///
/// ```
/// use cartograph_core::CartographConfig;
///
/// let config = CartographConfig::default();
/// assert_eq!(config.map.max_tokens, 5000);
/// assert_eq!(config.rank.damping, 0.85);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CartographConfig {
    /// Map rendering settings.
    #[serde(default)]
    pub map: MapConfig,
    /// Importance ranking settings.
    #[serde(default)]
    pub rank: RankConfig,
    /// Cache location and invalidation settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Repository walking and parsing settings.
    #[serde(default)]
    pub walk: WalkConfig,
}

impl CartographConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Io`] if the file cannot be read,
    /// [`CartographError::Toml`] if the content is not valid TOML, or
    /// [`CartographError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cartograph_core::CartographConfig;
    /// use std::path::Path;
    ///
    /// let config = CartographConfig::from_file(Path::new(".cartograph.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, CartographError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Toml`] if parsing fails, or
    /// [`CartographError::Config`] if validation fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use cartograph_core::CartographConfig;
    ///
    /// let toml = r#"
    /// [map]
    /// max_tokens = 2048
    /// "#;
    /// let config = CartographConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.map.max_tokens, 2048);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, CartographError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that numeric settings are within usable ranges.
    ///
    /// # Errors
    ///
    /// Returns [`CartographError::Config`] naming the first invalid value.
    pub fn validate(&self) -> Result<(), CartographError> {
        let rank = &self.rank;
        if !(rank.damping > 0.0 && rank.damping < 1.0) {
            return Err(CartographError::Config(format!(
                "rank.damping must be in (0, 1), got {}",
                rank.damping
            )));
        }
        if rank.focus_boost <= 0.0 || rank.mention_boost <= 0.0 {
            return Err(CartographError::Config(
                "rank.focus_boost and rank.mention_boost must be positive".into(),
            ));
        }
        if rank.epsilon <= 0.0 {
            return Err(CartographError::Config(
                "rank.epsilon must be positive".into(),
            ));
        }
        if rank.max_iterations == 0 {
            return Err(CartographError::Config(
                "rank.max_iterations must be at least 1".into(),
            ));
        }
        if self.map.chars_per_token == 0 {
            return Err(CartographError::Config(
                "map.chars_per_token must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the cache directory for a repository root.
    ///
    /// Relative directories are interpreted against `repo_root`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::Path;
    /// use cartograph_core::CartographConfig;
    ///
    /// let config = CartographConfig::default();
    /// let dir = config.cache_dir_for(Path::new("/work/repo"));
    /// assert_eq!(dir, Path::new("/work/repo/.cartograph"));
    /// ```
    pub fn cache_dir_for(&self, repo_root: &Path) -> PathBuf {
        if self.cache.dir.is_absolute() {
            self.cache.dir.clone()
        } else {
            repo_root.join(&self.cache.dir)
        }
    }
}

/// Map rendering configuration.
///
/// # Examples
///
/// ```
/// use cartograph_core::{MapConfig, OutputFormat};
///
/// let config = MapConfig::default();
/// assert_eq!(config.max_tokens, 5000);
/// assert_eq!(config.chars_per_token, 4);
/// assert_eq!(config.format, OutputFormat::Text);
/// assert!(!config.enable_enhancement);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Default token budget when a request does not give one (default: 5000).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Characters per estimated token (default: 4).
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    /// Default content format.
    #[serde(default)]
    pub format: OutputFormat,
    /// Decorate definition lines with type/reference annotations.
    #[serde(default)]
    pub enable_enhancement: bool,
}

fn default_max_tokens() -> usize {
    5000
}

fn default_chars_per_token() -> usize {
    4
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            chars_per_token: default_chars_per_token(),
            format: OutputFormat::default(),
            enable_enhancement: false,
        }
    }
}

/// Personalized PageRank configuration.
///
/// # Examples
///
/// ```
/// use cartograph_core::RankConfig;
///
/// let config = RankConfig::default();
/// assert_eq!(config.focus_boost, 50.0);
/// assert_eq!(config.max_iterations, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankConfig {
    /// Probability of following an edge instead of restarting (default: 0.85).
    #[serde(default = "default_damping")]
    pub damping: f64,
    /// Personalization multiplier for focus files (default: 50).
    #[serde(default = "default_boost")]
    pub focus_boost: f64,
    /// Personalization multiplier for files defining a mentioned identifier (default: 50).
    #[serde(default = "default_boost")]
    pub mention_boost: f64,
    /// L1 delta below which iteration stops (default: 1e-9).
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Iteration cap (default: 100).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_damping() -> f64 {
    0.85
}

fn default_boost() -> f64 {
    50.0
}

fn default_epsilon() -> f64 {
    1e-9
}

fn default_max_iterations() -> usize {
    100
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            damping: default_damping(),
            focus_boost: default_boost(),
            mention_boost: default_boost(),
            epsilon: default_epsilon(),
            max_iterations: default_max_iterations(),
        }
    }
}

/// Cache configuration.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use cartograph_core::{CacheConfig, FingerprintMode};
///
/// let config = CacheConfig::default();
/// assert!(config.enabled);
/// assert_eq!(config.dir, PathBuf::from(".cartograph"));
/// assert_eq!(config.fingerprint, FingerprintMode::Metadata);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Persist the file and result tiers to disk (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Cache directory, relative to the repository root unless absolute.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// How unchanged files are detected.
    #[serde(default)]
    pub fingerprint: FingerprintMode,
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cartograph")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_cache_dir(),
            fingerprint: FingerprintMode::default(),
        }
    }
}

/// Repository walking configuration.
///
/// # Examples
///
/// ```
/// use cartograph_core::WalkConfig;
///
/// let config = WalkConfig::default();
/// assert_eq!(config.max_file_size, 1_048_576);
/// assert_eq!(config.workers, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkConfig {
    /// Files larger than this many bytes are not tracked (default: 1 MB).
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Parse worker threads; 0 uses the available parallelism.
    #[serde(default)]
    pub workers: usize,
}

fn default_max_file_size() -> u64 {
    1_048_576
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            workers: 0,
        }
    }
}
