use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TreeError};

/// Inserts larger than this are split into chunks.
pub const DEFAULT_SPLICE_CHUNK: usize = 10_000;

/// Coalescing interval for row-dimension recomputation.
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 100;

/// Tunables for the engine and the bundled directory fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of flat nodes inserted by a single splice.
    pub splice_chunk: usize,
    pub case_sensitive_search: bool,
    /// Directory fetcher: list directories before files.
    pub dirs_first: bool,
    /// Directory fetcher: include dot-files.
    pub show_hidden: bool,
    pub batch_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            splice_chunk: DEFAULT_SPLICE_CHUNK,
            case_sensitive_search: false,
            dirs_first: true,
            show_hidden: false,
            batch_interval_ms: DEFAULT_BATCH_INTERVAL_MS,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. Missing keys fall back to the defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let mut config: EngineConfig =
            toml::from_str(source).map_err(|err| TreeError::Config(err.to_string()))?;
        config.splice_chunk = config.splice_chunk.max(1);
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|err| TreeError::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_toml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = EngineConfig::from_toml_str("splice_chunk = 64\nshow_hidden = true\n").unwrap();
        assert_eq!(config.splice_chunk, 64);
        assert!(config.show_hidden);
        assert!(config.dirs_first);
        assert_eq!(config.batch_interval_ms, DEFAULT_BATCH_INTERVAL_MS);
    }

    #[test]
    fn test_zero_chunk_is_clamped() {
        let config = EngineConfig::from_toml_str("splice_chunk = 0").unwrap();
        assert_eq!(config.splice_chunk, 1);
    }

    #[test]
    fn test_invalid_document_is_config_error() {
        let err = EngineConfig::from_toml_str("splice_chunk = \"many\"").unwrap_err();
        assert!(matches!(err, TreeError::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, TreeError::Config(_)));
    }
}
