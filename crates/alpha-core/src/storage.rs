// Persisted artifacts: the best-alpha record per ticker and the mining
// progress log.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// The final artifact of a mining run: the highest-scoring formula seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BestAlpha {
    pub ticker: String,
    pub score: f64,
    /// Token indices of the winning formula; `None` if no formula ever
    /// produced a usable signal.
    pub formula: Option<Vec<usize>>,
}

impl BestAlpha {
    pub fn new(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            // f64::MIN rather than -inf: non-finite floats do not survive
            // a JSON round trip.
            score: f64::MIN,
            formula: None,
        }
    }

    /// Update with a candidate. Only strictly higher scores replace the
    /// record, so the score never decreases within a run.
    pub fn observe(&mut self, score: f64, formula: &[usize]) -> bool {
        if score > self.score {
            self.score = score;
            self.formula = Some(formula.to_vec());
            true
        } else {
            false
        }
    }

    pub fn artifact_path(results_dir: impl AsRef<Path>, ticker: &str) -> PathBuf {
        results_dir
            .as_ref()
            .join(format!("best_alpha_{}.json", ticker.replace('/', "_")))
    }

    pub fn exists(results_dir: impl AsRef<Path>, ticker: &str) -> bool {
        Self::artifact_path(results_dir, ticker).exists()
    }

    pub fn save(&self, results_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = Self::artifact_path(&results_dir, &self.ticker);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, raw)
            .with_context(|| format!("failed to write artifact: {}", path.display()))?;
        info!("Saved best alpha for {} to {}", self.ticker, path.display());
        Ok(path)
    }

    pub fn load(results_dir: impl AsRef<Path>, ticker: &str) -> Result<Self> {
        let path = Self::artifact_path(results_dir, ticker);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read artifact: {}", path.display()))?;
        let record = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse artifact: {}", path.display()))?;
        Ok(record)
    }
}

/// Append-only progress log for multi-ticker mining sessions.
pub struct MiningLog {
    path: PathBuf,
}

impl MiningLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn session_started(&self) -> Result<()> {
        self.append(&format!("--- Mining session started at {} ---", Utc::now()))
    }

    pub fn ticker_done(&self, ticker: &str, minutes: f64) -> Result<()> {
        self.append(&format!(
            "{}: Success | Duration: {:.2} min | Time: {}",
            ticker,
            minutes,
            Utc::now()
        ))
    }

    pub fn ticker_failed(&self, ticker: &str, err: &str) -> Result<()> {
        self.append(&format!("{}: Failed | Error: {} | Time: {}", ticker, err, Utc::now()))
    }

    fn append(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open mining log: {}", self.path.display()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_alpha_updates_monotonically() {
        let mut best = BestAlpha::new("TEST");
        assert!(best.observe(1.0, &[0, 1, 5]));
        assert!(!best.observe(0.5, &[2]));
        assert!(!best.observe(1.0, &[2]));
        assert!(best.observe(1.5, &[3, 4]));
        assert_eq!(best.score, 1.5);
        assert_eq!(best.formula.as_deref(), Some(&[3, 4][..]));
    }

    #[test]
    fn artifact_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut best = BestAlpha::new("PLTR");
        best.observe(0.42, &[0, 1, 5]);
        best.save(dir.path()).unwrap();
        assert!(BestAlpha::exists(dir.path(), "PLTR"));

        let loaded = BestAlpha::load(dir.path(), "PLTR").unwrap();
        assert_eq!(loaded.ticker, "PLTR");
        assert!((loaded.score - 0.42).abs() < 1e-12);
        assert_eq!(loaded.formula.as_deref(), Some(&[0, 1, 5][..]));
    }

    #[test]
    fn mining_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let log = MiningLog::new(dir.path().join("mining_progress.log"));
        log.session_started().unwrap();
        log.ticker_done("PLTR", 1.25).unwrap();
        log.ticker_failed("TGT", "no data").unwrap();

        let raw = std::fs::read_to_string(dir.path().join("mining_progress.log")).unwrap();
        assert_eq!(raw.lines().count(), 3);
        assert!(raw.contains("PLTR: Success"));
        assert!(raw.contains("TGT: Failed"));
    }
}
