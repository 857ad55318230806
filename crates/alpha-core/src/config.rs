// Run configuration for the alpha mining engine

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::AlphaError;

/// Full configuration surface for one mining run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Instrument identifier, e.g. "PLTR" or "2330.TW".
    pub ticker: String,
    /// Directory holding per-ticker OHLCV files.
    pub data_root: PathBuf,
    /// Directory where best-alpha artifacts are written.
    pub results_dir: PathBuf,

    pub train_steps: usize,
    pub batch_size: usize,
    pub max_formula_len: usize,

    pub embed_dim: usize,
    pub hidden_dim: usize,
    pub learning_rate: f32,
    pub weight_decay: f32,

    pub use_lord: bool,
    pub lord_decay_rate: f32,
    pub lord_num_iterations: usize,
    pub lord_target_keywords: Vec<String>,

    /// Signals with standard deviation below this are treated as degenerate.
    pub min_signal_std: f32,
    /// Reward assigned to invalid or degenerate formulas.
    pub sentinel_reward: f64,
    /// How often (in steps) to log stable-rank diagnostics. 0 disables.
    pub rank_report_every: usize,

    /// Optional RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ticker: "PLTR".to_string(),
            data_root: PathBuf::from("data"),
            results_dir: PathBuf::from("results"),
            train_steps: 1000,
            batch_size: 256,
            max_formula_len: 12,
            embed_dim: 64,
            hidden_dim: 128,
            learning_rate: 1e-3,
            weight_decay: 1e-2,
            use_lord: true,
            lord_decay_rate: 1e-3,
            lord_num_iterations: 5,
            lord_target_keywords: vec![
                "q_proj".to_string(),
                "k_proj".to_string(),
                "attn".to_string(),
            ],
            min_signal_std: 1e-4,
            sentinel_reward: -5.0,
            rank_report_every: 100,
            seed: None,
        }
    }
}

impl RunConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), AlphaError> {
        let fail = |msg: &str| Err(AlphaError::Configuration(msg.to_string()));
        if self.ticker.is_empty() {
            return fail("ticker must not be empty");
        }
        if self.train_steps == 0 {
            return fail("train_steps must be > 0");
        }
        if self.batch_size < 2 {
            return fail("batch_size must be >= 2 for advantage normalization");
        }
        if self.max_formula_len == 0 {
            return fail("max_formula_len must be > 0");
        }
        if self.embed_dim == 0 || self.hidden_dim == 0 {
            return fail("model dimensions must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_tiny_batch() {
        let config = RunConfig {
            batch_size: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_json() {
        let config = RunConfig {
            ticker: "OXY".to_string(),
            train_steps: 42,
            ..Default::default()
        };
        let raw = serde_json::to_string(&config).unwrap();
        let parsed: RunConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.ticker, "OXY");
        assert_eq!(parsed.train_steps, 42);
    }
}
