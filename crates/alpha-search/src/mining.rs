// Mining orchestration: one ticker end to end, and sequential sessions
// over a ticker universe with skip-if-done resume.

use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{info, warn};

use alpha_core::{BestAlpha, MiningLog, RunConfig};
use alpha_data::load_market_data;

use crate::engine::AlphaEngine;

pub const MINING_LOG_FILE: &str = "mining_progress.log";

/// Mine a single ticker: load its history, run the search, persist the
/// best formula.
pub fn run_one(config: &RunConfig) -> Result<BestAlpha> {
    let data = load_market_data(&config.data_root, &config.ticker)
        .with_context(|| format!("loading market data for {}", config.ticker))?;
    let mut engine = AlphaEngine::new(config.clone(), data)?;
    engine.train()
}

/// Mine a universe of tickers sequentially. Tickers with an existing
/// artifact are skipped so an interrupted session resumes where it left
/// off; failures are logged and do not stop the sweep.
pub fn mine_all(base: &RunConfig, tickers: &[String]) -> Result<Vec<BestAlpha>> {
    let log = MiningLog::new(base.results_dir.join(MINING_LOG_FILE));
    log.session_started()?;

    let mut results = Vec::new();
    for ticker in tickers {
        if BestAlpha::exists(&base.results_dir, ticker) {
            info!("Skipping {}: artifact already exists", ticker);
            continue;
        }

        let mut config = base.clone();
        config.ticker = ticker.clone();

        let started = Instant::now();
        match run_one(&config) {
            Ok(best) => {
                let minutes = started.elapsed().as_secs_f64() / 60.0;
                log.ticker_done(ticker, minutes)?;
                results.push(best);
            }
            Err(err) => {
                warn!("Mining {} failed: {:#}", ticker, err);
                log.ticker_failed(ticker, &format!("{:#}", err))?;
            }
        }
    }

    Ok(results)
}
