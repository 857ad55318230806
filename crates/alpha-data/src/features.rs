// Derived feature channels for the formula interpreter.
//
// Channel order is fixed and must match the feature half of the token
// vocabulary: ret, vol, v_chg, pv, trend.

use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1};

use crate::Ohlcv;

pub const FEATURE_CHANNELS: [&str; 5] = ["ret", "vol", "v_chg", "pv", "trend"];

const EPS: f64 = 1e-9;

/// Named numeric channels sharing one time axis, no missing values.
#[derive(Debug, Clone)]
pub struct FeatureTensor {
    pub names: Vec<String>,
    /// Shape `[channel, T]`.
    pub data: Array2<f32>,
}

impl FeatureTensor {
    pub fn channel(&self, idx: usize) -> ArrayView1<'_, f32> {
        self.data.row(idx)
    }

    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn len(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.data.ncols() == 0
    }
}

/// Raw per-instrument channels. Equity data rarely carries liquidity or
/// fdv, so those default to a large constant fill.
#[derive(Debug, Clone)]
pub struct RawChannels {
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
    pub liquidity: Vec<f64>,
    pub fdv: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct MarketData {
    pub ticker: String,
    pub raw: RawChannels,
    pub features: FeatureTensor,
    /// Per-step forward log return of close; last element is 0.
    pub target_ret: Array1<f32>,
}

impl MarketData {
    pub fn from_ohlcv(ticker: &str, ohlcv: &Ohlcv) -> Result<Self> {
        if ohlcv.is_empty() {
            bail!("empty OHLCV data for ticker {}", ticker);
        }
        let n = ohlcv.len();
        let volume = ohlcv.volume.clone().unwrap_or_else(|| vec![0.0; n]);
        let liquidity = ohlcv.liquidity.clone().unwrap_or_else(|| vec![1e9; n]);
        let fdv = ohlcv.fdv.clone().unwrap_or_else(|| vec![1e9; n]);

        let raw = RawChannels {
            open: ohlcv.open.clone(),
            high: ohlcv.high.clone(),
            low: ohlcv.low.clone(),
            close: ohlcv.close.clone(),
            volume,
            liquidity,
            fdv,
        };

        let features = compute_features(&raw);
        let target_ret = target_log_returns(&raw.close);

        Ok(Self {
            ticker: ticker.to_string(),
            raw,
            features,
            target_ret,
        })
    }

    pub fn len(&self) -> usize {
        self.raw.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.close.is_empty()
    }
}

fn pct_change(values: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    for t in 1..values.len() {
        let prev = values[t - 1];
        if prev.abs() > EPS {
            out[t] = values[t] / prev - 1.0;
        }
    }
    out
}

fn sma(values: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![0.0; values.len()];
    let mut sum = 0.0;
    for t in 0..values.len() {
        sum += values[t];
        if t >= window {
            sum -= values[t - window];
        }
        let count = (t + 1).min(window);
        out[t] = sum / count as f64;
    }
    out
}

/// Build the derived channel tensor in vocabulary order.
pub fn compute_features(raw: &RawChannels) -> FeatureTensor {
    let n = raw.close.len();
    let ret = pct_change(&raw.close);
    let v_chg = pct_change(&raw.volume);
    let pv: Vec<f64> = ret.iter().zip(raw.volume.iter()).map(|(r, v)| r * v).collect();

    let sma20 = sma(&raw.close, 20);
    let sma60 = sma(&raw.close, 60);
    let trend: Vec<f64> = sma20
        .iter()
        .zip(sma60.iter())
        .map(|(fast, slow)| if slow.abs() > EPS { fast / slow - 1.0 } else { 0.0 })
        .collect();

    let channels: [&[f64]; 5] = [&ret, &raw.volume, &v_chg, &pv, &trend];
    let mut data = Array2::<f32>::zeros((FEATURE_CHANNELS.len(), n));
    for (row, channel) in channels.iter().enumerate() {
        for (t, v) in channel.iter().enumerate() {
            let v = *v as f32;
            data[(row, t)] = if v.is_finite() { v } else { 0.0 };
        }
    }

    FeatureTensor {
        names: FEATURE_CHANNELS.iter().map(|s| s.to_string()).collect(),
        data,
    }
}

/// Next-period log returns; the final step has no future and is 0.
pub fn target_log_returns(close: &[f64]) -> Array1<f32> {
    let n = close.len();
    let mut out = Array1::<f32>::zeros(n);
    for t in 0..n.saturating_sub(1) {
        let ratio = close[t + 1] / (close[t] + EPS);
        out[t] = if ratio > 0.0 { ratio.ln() as f32 } else { 0.0 };
    }
    out
}
