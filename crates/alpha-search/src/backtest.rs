// Backtest evaluator: signal series -> risk-adjusted fitness score.
//
// Position sizing is a documented design choice: the signal is z-scored
// over the evaluation window and squashed with tanh into [-1, 1]. The
// score is a Sharpe-like mean-over-std of the per-step strategy returns,
// deterministic and finite for any non-degenerate signal.

use alpha_data::FeatureTensor;
use ndarray::{Array1, ArrayView1};

const STD_EPS: f64 = 1e-9;

pub struct Backtest;

impl Backtest {
    pub fn new() -> Self {
        Self
    }

    /// Score a signal against forward returns. The final step carries no
    /// valid forward return and is excluded from the aggregate.
    ///
    /// The feature tensor is part of the call contract for cost-aware
    /// scoring variants; the base score reads only the signal and the
    /// forward returns.
    pub fn evaluate(
        &self,
        signal: &Array1<f32>,
        _features: &FeatureTensor,
        target_ret: ArrayView1<'_, f32>,
    ) -> (f64, Vec<f32>) {
        let n = signal.len().min(target_ret.len());
        if n < 2 {
            return (0.0, Vec::new());
        }

        let positions = positions_from_signal(signal, n);

        let horizon = n - 1;
        let mut returns = Vec::with_capacity(horizon);
        for t in 0..horizon {
            returns.push(positions[t] * target_ret[t]);
        }

        let mean = returns.iter().map(|r| *r as f64).sum::<f64>() / horizon as f64;
        let var = returns
            .iter()
            .map(|r| {
                let d = *r as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / horizon as f64;
        let score = mean / (var.sqrt() + STD_EPS);

        (score, returns)
    }
}

impl Default for Backtest {
    fn default() -> Self {
        Self::new()
    }
}

fn positions_from_signal(signal: &Array1<f32>, n: usize) -> Vec<f32> {
    let mean = signal.iter().take(n).sum::<f32>() / n as f32;
    let var = signal
        .iter()
        .take(n)
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f32>()
        / n as f32;
    let std = var.sqrt() + STD_EPS as f32;
    signal
        .iter()
        .take(n)
        .map(|v| ((v - mean) / std).tanh())
        .collect()
}

/// Population standard deviation of a signal, used by the search loop to
/// screen out degenerate formulas before scoring.
pub fn signal_std(signal: &Array1<f32>) -> f32 {
    let n = signal.len();
    if n == 0 {
        return 0.0;
    }
    let mean = signal.sum() / n as f32;
    let var = signal
        .iter()
        .map(|v| {
            let d = v - mean;
            d * d
        })
        .sum::<f32>()
        / n as f32;
    var.sqrt()
}
