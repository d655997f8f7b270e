//! Capture configuration, loaded from JSON and overridden by CLI flags.

use std::path::{Path, PathBuf};

use ansicast_codec::{QuadtreeParams, Strategy};
use ansicast_grid::{TrailingChunkPolicy, DEFAULT_CHANNEL_CAPACITY};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Serialized form of [`TrailingChunkPolicy`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingChunk {
    #[default]
    Buffer,
    FlushOnLastRow,
}

impl From<TrailingChunk> for TrailingChunkPolicy {
    fn from(value: TrailingChunk) -> Self {
        match value {
            TrailingChunk::Buffer => TrailingChunkPolicy::Buffer,
            TrailingChunk::FlushOnLastRow => TrailingChunkPolicy::FlushOnLastRow,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub rows: u16,
    pub cols: u16,
    /// Largest quadtree leaf side, in cells.
    pub leaf_size: usize,
    /// Grids that may queue between parser and encoder.
    pub channel_capacity: usize,
    pub trailing_chunk: TrailingChunk,
    /// Strategies in registration order. Earlier entries win size ties.
    pub strategies: Vec<Strategy>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            rows: 24,
            cols: 80,
            leaf_size: QuadtreeParams::default().leaf_size,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            trailing_chunk: TrailingChunk::default(),
            strategies: Strategy::ALL.to_vec(),
        }
    }
}

impl CaptureConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rows == 0 || self.cols == 0 {
            return Err(ConfigError::Invalid("rows and cols must be non-zero"));
        }
        if self.leaf_size == 0 {
            return Err(ConfigError::Invalid("leaf_size must be non-zero"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be non-zero"));
        }
        if self.strategies.is_empty() {
            return Err(ConfigError::Invalid("at least one strategy is required"));
        }
        Ok(())
    }

    pub fn quadtree_params(&self) -> QuadtreeParams {
        QuadtreeParams {
            leaf_size: self.leaf_size,
        }
    }

    pub fn trailing_chunk_policy(&self) -> TrailingChunkPolicy {
        self.trailing_chunk.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::default();
        assert_eq!((config.rows, config.cols), (24, 80));
        assert_eq!(config.leaf_size, 4);
        assert_eq!(config.channel_capacity, 10);
        assert_eq!(config.trailing_chunk_policy(), TrailingChunkPolicy::Buffer);
        assert_eq!(config.strategies, Strategy::ALL.to_vec());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let file = write_config(
            r#"{ "rows": 30, "trailing_chunk": "flush_on_last_row", "strategies": ["rle", "delta_rle"] }"#,
        );
        let config = CaptureConfig::load(file.path()).unwrap();
        assert_eq!(config.rows, 30);
        assert_eq!(config.cols, 80);
        assert_eq!(
            config.trailing_chunk_policy(),
            TrailingChunkPolicy::FlushOnLastRow
        );
        assert_eq!(config.strategies, vec![Strategy::Rle, Strategy::DeltaRle]);
    }

    #[test]
    fn test_round_trip_json() {
        let config = CaptureConfig {
            leaf_size: 8,
            ..CaptureConfig::default()
        };
        let json = serde_json::to_string_pretty(&config).unwrap();
        let file = write_config(&json);
        assert_eq!(CaptureConfig::load(file.path()).unwrap(), config);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            r#"{ "rows": 0 }"#,
            r#"{ "leaf_size": 0 }"#,
            r#"{ "channel_capacity": 0 }"#,
            r#"{ "strategies": [] }"#,
        ];
        for case in cases {
            let file = write_config(case);
            assert!(
                matches!(CaptureConfig::load(file.path()), Err(ConfigError::Invalid(_))),
                "{case}"
            );
        }
    }

    #[test]
    fn test_rejects_unknown_fields_and_strategies() {
        for case in [r#"{ "colour": true }"#, r#"{ "strategies": ["lz4"] }"#] {
            let file = write_config(case);
            assert!(matches!(
                CaptureConfig::load(file.path()),
                Err(ConfigError::Parse { .. })
            ));
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            CaptureConfig::load(&missing),
            Err(ConfigError::Io { .. })
        ));
    }
}
