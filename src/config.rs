use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
}

/// Retry schedule for calls to the extraction service.
#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// Total elapsed budget across all attempts for one file.
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            factor: default_factor(),
            max_duration_ms: default_max_duration_ms(),
        }
    }
}

fn default_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    5_000
}
fn default_factor() -> f64 {
    1.5
}
fn default_max_duration_ms() -> u64 {
    30_000
}

/// Bounds for the adaptive chunk-size retry loop.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Starting chunk length in bytes, just under the store's 1 MiB field cap.
    #[serde(default = "default_max_len")]
    pub max_len: usize,
    /// Smallest chunk length worth retrying at.
    #[serde(default = "default_floor_len")]
    pub floor_len: usize,
    /// Abandon an attachment whose content would exceed this many segments.
    #[serde(default = "default_max_segments")]
    pub max_segments: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_len: default_max_len(),
            floor_len: default_floor_len(),
            max_segments: default_max_segments(),
        }
    }
}

fn default_max_len() -> usize {
    1_048_575
}
fn default_floor_len() -> usize {
    16_384
}
fn default_max_segments() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Text search configuration passed to `to_tsvector`.
    #[serde(default = "default_language")]
    pub language: String,
    /// `TABLESAMPLE SYSTEM` percentage for the straggler/re-index branch
    /// of the candidate query; 0 disables it.
    #[serde(default = "default_sample_percent")]
    pub sample_percent: u8,
    /// When true, the sampled branch reprocesses attachments that are
    /// already indexed instead of skipping them.
    #[serde(default)]
    pub resample_reindex: bool,
    /// Extracted text is cut to this many bytes before chunking.
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            sample_percent: default_sample_percent(),
            resample_reindex: false,
            max_content_bytes: default_max_content_bytes(),
        }
    }
}

fn default_language() -> String {
    "english".to_string()
}
fn default_sample_percent() -> u8 {
    10
}
fn default_max_content_bytes() -> usize {
    20 << 20
}

/// Load configuration from an optional TOML file; no file means all defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("read config file {}", path.display()))?;
            toml::from_str(&content).context("parse config file")?
        }
        None => Config::default(),
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_len == 0 {
        anyhow::bail!("chunking.max_len must be > 0");
    }
    if config.chunking.floor_len == 0 {
        anyhow::bail!("chunking.floor_len must be > 0");
    }
    if config.chunking.floor_len > config.chunking.max_len {
        anyhow::bail!("chunking.floor_len must not exceed chunking.max_len");
    }
    if config.chunking.max_segments == 0 {
        anyhow::bail!("chunking.max_segments must be > 0");
    }
    if config.indexing.sample_percent > 100 {
        anyhow::bail!("indexing.sample_percent must be in 0..=100");
    }
    if config.extraction.factor < 1.0 {
        anyhow::bail!("extraction.factor must be >= 1.0");
    }
    Ok(())
}
