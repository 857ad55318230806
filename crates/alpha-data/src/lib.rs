pub mod features;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use polars::prelude::*;
use tracing::info;

pub use features::{FeatureTensor, MarketData, RawChannels, FEATURE_CHANNELS};

#[derive(Debug, Clone)]
pub struct Ohlcv {
    pub timestamp: Option<Vec<i64>>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Option<Vec<f64>>,
    pub liquidity: Option<Vec<f64>>,
    pub fdv: Option<Vec<f64>>,
}

impl Ohlcv {
    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }
}

/// Forward-fill non-finite entries, then zero-fill whatever is left
/// (leading gaps). Every channel is total after this.
pub fn sanitize(values: &mut [f64]) {
    let mut last: Option<f64> = None;
    for v in values.iter_mut() {
        if v.is_finite() {
            last = Some(*v);
        } else {
            *v = last.unwrap_or(0.0);
        }
    }
}

fn candidate_paths(root: &Path, ticker: &str) -> Vec<PathBuf> {
    let stem = ticker.replace('.', "_");
    vec![
        root.join(format!("{stem}_5y.csv")),
        root.join(format!("{stem}.csv")),
        root.join(format!("{stem}_5y.parquet")),
        root.join(format!("{stem}.parquet")),
    ]
}

/// Load one instrument's historical series. Fatal if no file exists for
/// the ticker; data acquisition is a pre-run concern.
pub fn load_ticker(root: impl AsRef<Path>, ticker: &str) -> Result<Ohlcv> {
    let root = root.as_ref();
    for path in candidate_paths(root, ticker) {
        if path.exists() {
            info!("Loading {} data from {}", ticker, path.display());
            return load_file(&path);
        }
    }
    bail!(
        "no historical data found for ticker {} under {}",
        ticker,
        root.display()
    );
}

pub fn load_file(path: impl AsRef<Path>) -> Result<Ohlcv> {
    let path = path.as_ref();
    let df = match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open parquet file: {}", path.display()))?;
            ParquetReader::new(file).finish()?
        }
        _ => CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.into()))
            .with_context(|| format!("failed to open csv file: {}", path.display()))?
            .finish()?,
    };
    dataframe_to_ohlcv(&df)
}

fn dataframe_to_ohlcv(df: &DataFrame) -> Result<Ohlcv> {
    let timestamp = extract_timestamps(df)?;
    let open = find_series(df, &["open", "o"]).context("missing open column")?;
    let high = find_series(df, &["high", "h"]).context("missing high column")?;
    let low = find_series(df, &["low", "l"]).context("missing low column")?;
    let close = find_series(df, &["close", "c", "adj close"]).context("missing close column")?;
    let volume = find_series(df, &["volume", "vol", "v"]);
    let liquidity = find_series(df, &["liquidity", "liq"]);
    let fdv = find_series(df, &["fdv", "market_cap", "marketcap"]);

    let mut open = series_to_f64(&open)?;
    let mut high = series_to_f64(&high)?;
    let mut low = series_to_f64(&low)?;
    let mut close = series_to_f64(&close)?;
    let mut volume = match volume {
        Some(ref series) => Some(series_to_f64(series)?),
        None => None,
    };
    let liquidity = match liquidity {
        Some(ref series) => Some(series_to_f64(series)?),
        None => None,
    };
    let fdv = match fdv {
        Some(ref series) => Some(series_to_f64(series)?),
        None => None,
    };

    let n = close.len();
    if n == 0 {
        bail!("empty OHLCV data");
    }
    if open.len() != n || high.len() != n || low.len() != n {
        bail!("OHLC columns have mismatched lengths");
    }
    if let Some(ref vol) = volume {
        if vol.len() != n {
            bail!("volume column length does not match OHLC length");
        }
    }
    if let Some(ref ts) = timestamp {
        if ts.len() != n {
            bail!("timestamp column length does not match OHLC length");
        }
    }

    sanitize(&mut open);
    sanitize(&mut high);
    sanitize(&mut low);
    sanitize(&mut close);
    if let Some(vol) = volume.as_mut() {
        sanitize(vol);
    }

    Ok(Ohlcv {
        timestamp,
        open,
        high,
        low,
        close,
        volume,
        liquidity,
        fdv,
    })
}

fn series_to_f64(series: &Series) -> Result<Vec<f64>> {
    let casted = series.cast(&DataType::Float64)?;
    let chunked = casted.f64().context("series cast to f64 failed")?;
    Ok(chunked.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn find_series(df: &DataFrame, candidates: &[&str]) -> Option<Series> {
    for name in df.get_column_names() {
        let lower = name.to_ascii_lowercase();
        if candidates.iter().any(|c| lower == *c) {
            return df
                .column(name)
                .ok()
                .map(|col| col.as_materialized_series().clone());
        }
    }
    None
}

fn extract_timestamps(df: &DataFrame) -> Result<Option<Vec<i64>>> {
    let series = match find_series(df, &["timestamp", "time", "datetime", "date"]) {
        Some(s) => s,
        None => return Ok(None),
    };
    // Date columns may be strings in CSV exports; timestamps are optional
    // anyway, the time axis is positional.
    let casted = match series.cast(&DataType::Int64) {
        Ok(s) => s,
        Err(_) => return Ok(None),
    };
    let chunked = match casted.i64() {
        Ok(c) => c,
        Err(_) => return Ok(None),
    };
    Ok(Some(chunked.into_iter().map(|v| v.unwrap_or(0)).collect()))
}

/// Load and fully prepare one instrument: raw channels, derived feature
/// tensor, and forward log returns.
pub fn load_market_data(root: impl AsRef<Path>, ticker: &str) -> Result<MarketData> {
    let ohlcv = load_ticker(root, ticker)?;
    let data = MarketData::from_ohlcv(ticker, &ohlcv)?;
    info!(
        "Data ready for {}: {} steps, {} feature channels",
        ticker,
        data.len(),
        data.features.names.len()
    );
    Ok(data)
}
