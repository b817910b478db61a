//! CSV bar and signal loading.
//!
//! Bars: header `timestamp,open,high,low,close[,volume]`. Signals: header
//! `timestamp,signal`. Timestamps are RFC 3339 or `YYYY-MM-DD` (midnight UTC).
//!
//! Loading is strict about structure (every row must parse) and lenient
//! about content: bars that fail the OHLC sanity check are kept, since the
//! simulator reports them as data gaps.

use chrono::{DateTime, NaiveDate, Utc};
use paperlab_core::backtest::{ParseSignalError, PrecomputedSignals, Signal};
use paperlab_core::decimal::{parse_decimal, ArithmeticError};
use paperlab_core::domain::Bar;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error in {source_name}: {error}")]
    Csv { source_name: String, error: csv::Error },

    #[error("{source_name} line {line}: invalid timestamp '{value}'")]
    Timestamp {
        source_name: String,
        line: u64,
        value: String,
    },

    #[error("{source_name} line {line}: invalid {field}: {error}")]
    Number {
        source_name: String,
        line: u64,
        field: &'static str,
        error: ArithmeticError,
    },

    #[error("{source_name} line {line}: {error}")]
    Signal {
        source_name: String,
        line: u64,
        error: ParseSignalError,
    },

    #[error("{0} contains no rows")]
    Empty(String),

    #[error("cannot derive a symbol from {0}")]
    NoSymbol(PathBuf),
}

/// Bars for one symbol plus provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedBars {
    pub symbol: String,
    pub bars: Vec<Bar>,
    /// BLAKE3 over the parsed bars, for tying results to their data.
    pub dataset_hash: String,
}

#[derive(Debug, Deserialize)]
struct BarRow {
    timestamp: String,
    open: String,
    high: String,
    low: String,
    close: String,
    #[serde(default)]
    volume: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignalRow {
    timestamp: String,
    signal: String,
}

/// Symbol implied by a file name: `data/spy.csv` → `SPY`.
pub fn symbol_from_path(path: &Path) -> Result<String, LoadError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().to_uppercase())
        .ok_or_else(|| LoadError::NoSymbol(path.to_path_buf()))
}

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` date.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn open(path: &Path) -> Result<std::fs::File, LoadError> {
    std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load bars from a CSV file. The symbol defaults to the file stem.
pub fn load_bars_csv(path: &Path, symbol: Option<&str>) -> Result<LoadedBars, LoadError> {
    let symbol = match symbol {
        Some(s) => s.to_string(),
        None => symbol_from_path(path)?,
    };
    let bars = parse_bars(open(path)?, &path.display().to_string())?;
    debug!(%symbol, bars = bars.len(), path = %path.display(), "bars loaded");
    Ok(LoadedBars {
        dataset_hash: dataset_hash(&bars),
        symbol,
        bars,
    })
}

/// Parse bars from any CSV reader. Rows keep file order.
pub fn parse_bars<R: Read>(reader: R, source_name: &str) -> Result<Vec<Bar>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars = Vec::new();
    for record in rdr.deserialize::<BarRow>() {
        let row = record.map_err(|error| LoadError::Csv {
            source_name: source_name.to_string(),
            error,
        })?;
        // Header is line 1.
        let line = bars.len() as u64 + 2;
        let number = |field: &'static str, value: &str| -> Result<Decimal, LoadError> {
            parse_decimal(value).map_err(|error| LoadError::Number {
                source_name: source_name.to_string(),
                line,
                field,
                error,
            })
        };
        let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| LoadError::Timestamp {
            source_name: source_name.to_string(),
            line,
            value: row.timestamp.clone(),
        })?;
        let volume = match row.volume.as_deref().filter(|v| !v.is_empty()) {
            Some(v) => number("volume", v)?,
            None => Decimal::ZERO,
        };
        bars.push(Bar::new(
            timestamp,
            number("open", &row.open)?,
            number("high", &row.high)?,
            number("low", &row.low)?,
            number("close", &row.close)?,
            volume,
        ));
    }
    if bars.is_empty() {
        return Err(LoadError::Empty(source_name.to_string()));
    }
    Ok(bars)
}

/// Load a signal CSV and align it to `bars`.
pub fn load_signals_csv(path: &Path, bars: &[Bar]) -> Result<PrecomputedSignals, LoadError> {
    let by_time = parse_signals(open(path)?, &path.display().to_string())?;
    Ok(align_signals(bars, &by_time))
}

/// Parse `timestamp,signal` rows.
pub fn parse_signals<R: Read>(reader: R, source_name: &str) -> Result<BTreeMap<DateTime<Utc>, Signal>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut signals = BTreeMap::new();
    for (i, record) in rdr.deserialize::<SignalRow>().enumerate() {
        let line = i as u64 + 2;
        let row = record.map_err(|error| LoadError::Csv {
            source_name: source_name.to_string(),
            error,
        })?;
        let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| LoadError::Timestamp {
            source_name: source_name.to_string(),
            line,
            value: row.timestamp.clone(),
        })?;
        let signal = row.signal.parse::<Signal>().map_err(|error| LoadError::Signal {
            source_name: source_name.to_string(),
            line,
            error,
        })?;
        signals.insert(timestamp, signal);
    }
    Ok(signals)
}

/// One signal per bar, `Hold` where the file has none.
pub fn align_signals(bars: &[Bar], by_time: &BTreeMap<DateTime<Utc>, Signal>) -> PrecomputedSignals {
    let aligned: Vec<Signal> = bars
        .iter()
        .map(|b| by_time.get(&b.timestamp).copied().unwrap_or_default())
        .collect();
    let matched = bars.iter().filter(|b| by_time.contains_key(&b.timestamp)).count();
    if matched < by_time.len() {
        warn!(
            unmatched = by_time.len() - matched,
            "signals with no matching bar were ignored"
        );
    }
    PrecomputedSignals::new(aligned)
}

/// BLAKE3 over every bar field, in order.
pub fn dataset_hash(bars: &[Bar]) -> String {
    let mut hasher = blake3::Hasher::new();
    for bar in bars {
        hasher.update(bar.timestamp.to_rfc3339().as_bytes());
        for value in [bar.open, bar.high, bar.low, bar.close, bar.volume] {
            hasher.update(value.normalize().to_string().as_bytes());
            hasher.update(b",");
        }
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}
