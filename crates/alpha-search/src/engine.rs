// Policy-gradient search loop: sample formulas, score them against the
// backtest, and push the generator toward higher-scoring regions.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, info};

use alpha_core::{BestAlpha, RunConfig};
use alpha_data::MarketData;
use alpha_model::{AdamW, AlphaGpt, NewtonSchulzDecay, StableRankMonitor};

use crate::backtest::{signal_std, Backtest};
use crate::vm::StackVm;
use crate::vocab::Vocab;

/// Per-step diagnostics, mostly for logging and tests.
#[derive(Debug, Clone, Copy)]
pub struct StepStats {
    pub loss: f32,
    pub mean_reward: f64,
    pub best_score: f64,
}

pub struct AlphaEngine {
    config: RunConfig,
    data: MarketData,
    vm: StackVm,
    backtest: Backtest,
    model: AlphaGpt,
    opt: AdamW,
    lord: Option<NewtonSchulzDecay>,
    monitor: StableRankMonitor,
    rng: StdRng,
    best: BestAlpha,
}

impl AlphaEngine {
    pub fn new(config: RunConfig, data: MarketData) -> Result<Self> {
        config.validate()?;
        let vocab = Vocab::standard();
        if vocab.feature_count() > data.features.n_channels() {
            bail!(
                "feature tensor has {} channels but the vocabulary references {}",
                data.features.n_channels(),
                vocab.feature_count()
            );
        }
        if data.len() < 3 {
            bail!("not enough history for {}: {} steps", data.ticker, data.len());
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let model = AlphaGpt::new(
            vocab.len(),
            config.max_formula_len,
            config.embed_dim,
            config.hidden_dim,
            &mut rng,
        );
        let opt = AdamW::new(&model.params, config.learning_rate, config.weight_decay);
        let lord = config.use_lord.then(|| {
            NewtonSchulzDecay::new(
                config.lord_decay_rate,
                config.lord_num_iterations,
                config.lord_target_keywords.clone(),
            )
        });
        let monitor = StableRankMonitor::new(config.lord_target_keywords.clone());
        let best = BestAlpha::new(&data.ticker);

        Ok(Self {
            config,
            data,
            vm: StackVm::new(vocab),
            backtest: Backtest::new(),
            model,
            opt,
            lord,
            monitor,
            rng,
            best,
        })
    }

    pub fn best(&self) -> &BestAlpha {
        &self.best
    }

    pub fn vocab(&self) -> &Vocab {
        self.vm.vocab()
    }

    /// One full training step: sample, score, update.
    pub fn train_step(&mut self) -> StepStats {
        let batch = self
            .model
            .sample_batch(self.config.batch_size, &mut self.rng);

        // Interpret and score every formula. Order independence lets this
        // run across the batch; rewards stay index-aligned with tokens.
        let min_std = self.config.min_signal_std;
        let scores: Vec<Option<f64>> = batch
            .tokens
            .par_iter()
            .map(|formula| {
                let signal = self.vm.execute(formula, &self.data.features)?;
                if signal_std(&signal) < min_std {
                    return None;
                }
                let (score, _) = self.backtest.evaluate(
                    &signal,
                    &self.data.features,
                    self.data.target_ret.view(),
                );
                score.is_finite().then_some(score)
            })
            .collect();

        let mut rewards = Vec::with_capacity(scores.len());
        for (formula, score) in batch.tokens.iter().zip(scores.iter()) {
            match score {
                Some(score) => {
                    rewards.push(*score);
                    if self.best.observe(*score, formula) {
                        debug!(
                            "new best {:.4} for {}: {}",
                            score,
                            self.data.ticker,
                            self.vm.vocab().describe(formula)
                        );
                    }
                }
                None => rewards.push(self.config.sentinel_reward),
            }
        }

        let advantages = standardize_rewards(&rewards);
        let (loss, grads) = self.model.loss_and_grads(&batch.tokens, &advantages);
        self.opt.step(&mut self.model.params, &grads);
        if let Some(lord) = &self.lord {
            lord.step(&mut self.model.params);
        }

        let mean_reward = rewards.iter().sum::<f64>() / rewards.len() as f64;
        StepStats {
            loss,
            mean_reward,
            best_score: self.best.score,
        }
    }

    /// Run the configured number of steps and persist the best formula.
    pub fn train(&mut self) -> Result<BestAlpha> {
        info!(
            "Training alpha for {}: {} steps, batch {}, formula length {}",
            self.data.ticker,
            self.config.train_steps,
            self.config.batch_size,
            self.config.max_formula_len
        );

        for step in 0..self.config.train_steps {
            let stats = self.train_step();
            if step % 50 == 0 || step + 1 == self.config.train_steps {
                info!(
                    "step {}/{}: loss {:.4}, mean reward {:.4}, best {:.4}",
                    step + 1,
                    self.config.train_steps,
                    stats.loss,
                    stats.mean_reward,
                    stats.best_score
                );
            }
            if self.config.rank_report_every > 0 && step % self.config.rank_report_every == 0 {
                self.monitor.report(&self.model.params, step);
            }
        }

        self.best.save(&self.config.results_dir)?;
        info!(
            "{} completed. Best score: {:.4}",
            self.data.ticker, self.best.score
        );
        Ok(self.best.clone())
    }
}

/// Batch advantages: rewards centered on the batch mean and scaled by the
/// batch standard deviation.
pub fn standardize_rewards(rewards: &[f64]) -> Vec<f32> {
    let n = rewards.len() as f64;
    let mean = rewards.iter().sum::<f64>() / n;
    let var = rewards
        .iter()
        .map(|r| {
            let d = r - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = var.sqrt() + 1e-5;
    rewards.iter().map(|r| ((r - mean) / std) as f32).collect()
}
