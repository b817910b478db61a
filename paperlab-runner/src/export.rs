//! Export: trade tape and equity curve as CSV, the full report as JSON.
//!
//! All persisted reports include a `schema_version` field. Newer versions
//! are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use paperlab_core::backtest::EquityPoint;
use paperlab_core::decimal::{MoneyExt, MONEY_DP};
use paperlab_core::domain::Trade;

use crate::runner::{RunReport, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a report to pretty JSON.
pub fn export_json(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize RunReport to JSON")
}

/// Deserialize a report, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<RunReport> {
    let report: RunReport = serde_json::from_str(json).context("failed to deserialize RunReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Export fills as CSV, one row per trade.
///
/// Prices keep full precision; money columns are rounded for display.
pub fn export_trades_csv(trades: &[Trade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "trade_id",
        "order_id",
        "timestamp",
        "symbol",
        "side",
        "position_side",
        "quantity",
        "price",
        "reference_price",
        "commission",
        "slippage",
        "spread",
        "realized_pnl",
        "opens_position",
        "note",
        "tags",
    ])?;

    for t in trades {
        wtr.write_record([
            &t.id.0.to_string(),
            &t.order_id.0.to_string(),
            &t.timestamp.to_rfc3339(),
            &t.symbol,
            &format!("{:?}", t.side).to_lowercase(),
            &format!("{:?}", t.position_side).to_lowercase(),
            &t.quantity.normalize().to_string(),
            &t.price.normalize().to_string(),
            &t.reference_price.normalize().to_string(),
            &t.commission.round_display(MONEY_DP).to_string(),
            &t.slippage_applied.normalize().to_string(),
            &t.spread_applied.normalize().to_string(),
            &t.realized_pnl.round_display(MONEY_DP).to_string(),
            &t.opens_position.to_string(),
            &t.note,
            &t.tags.join(";"),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export an equity curve as CSV with timestamp and equity columns.
pub fn export_equity_csv(equity_curve: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "equity"])?;
    for point in equity_curve {
        wtr.write_record([
            &point.timestamp.to_rfc3339(),
            &point.equity.round_display(MONEY_DP).to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write `result.json`, `trades.csv` and `equity.csv` for one run into
/// `output_dir/<SYMBOL>/`. Returns the run directory.
pub fn save_artifacts(report: &RunReport, output_dir: &Path) -> Result<PathBuf> {
    let run_dir = output_dir.join(&report.result.symbol);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let write = |name: &str, contents: String| -> Result<()> {
        let path = run_dir.join(name);
        std::fs::write(&path, contents).with_context(|| format!("failed to write {}", path.display()))
    };
    write("result.json", export_json(report)?)?;
    write("trades.csv", export_trades_csv(&report.result.trades)?)?;
    write("equity.csv", export_equity_csv(&report.result.equity_curve)?)?;

    Ok(run_dir)
}

/// Load a report from a run directory's `result.json`.
pub fn load_artifacts(dir: &Path) -> Result<RunReport> {
    let path = dir.join("result.json");
    let json = std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

// ─── Text summary ───────────────────────────────────────────────────

/// Human-readable summary for terminal output.
pub fn summary_text(report: &RunReport) -> String {
    let r = &report.result;
    let s = &r.summary;
    let money = |d: rust_decimal::Decimal| d.round_display(MONEY_DP).to_string();
    let mut out = String::new();
    out.push_str(&format!("{} / {}  (seed {})\n", r.symbol, r.strategy, report.seed));
    out.push_str(&format!("  bars            {}\n", r.bars_processed));
    out.push_str(&format!("  final equity    {}\n", money(s.final_equity)));
    out.push_str(&format!("  total return    {}%\n", money(s.total_return_pct)));
    out.push_str(&format!("  buy & hold      {}%\n", money(s.buy_and_hold_return_pct)));
    out.push_str(&format!("  closed trades   {}\n", s.closed_trades));
    out.push_str(&format!("  win rate        {}%\n", money(s.win_rate_pct)));
    match s.profit_factor {
        Some(pf) => out.push_str(&format!("  profit factor   {}\n", money(pf))),
        None => out.push_str("  profit factor   n/a\n"),
    }
    out.push_str(&format!("  max drawdown    {}%\n", money(s.max_drawdown_pct)));
    match s.sharpe {
        Some(sharpe) => out.push_str(&format!("  sharpe          {sharpe:.2}\n")),
        None => out.push_str("  sharpe          n/a\n"),
    }
    out.push_str(&format!("  commissions     {}\n", money(s.total_commissions)));
    if !r.data_gaps.is_empty() {
        out.push_str(&format!("  data gaps       {}\n", r.data_gaps.len()));
    }
    if !r.warnings.is_empty() {
        out.push_str(&format!("  warnings        {}\n", r.warnings.len()));
    }
    if r.cancelled {
        out.push_str("  (cancelled before the last bar)\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::runner::{run_backtest, RunInput};
    use chrono::{Duration, TimeZone, Utc};
    use paperlab_core::backtest::CancelToken;
    use paperlab_core::domain::Bar;
    use rust_decimal_macros::dec;

    fn report() -> RunReport {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let bars = (0..5)
            .map(|i| {
                let p = dec!(100) + rust_decimal::Decimal::from(i);
                Bar::new(start + Duration::days(i), p, p, p, p, dec!(1))
            })
            .collect();
        let input = RunInput {
            symbol: "SPY".into(),
            bars,
            signals: None,
            dataset_hash: "abc".into(),
        };
        run_backtest(&RunConfig::default(), &input, &CancelToken::new()).unwrap()
    }

    #[test]
    fn json_round_trip() {
        let report = report();
        let json = export_json(&report).unwrap();
        assert_eq!(import_json(&json).unwrap(), report);
    }

    #[test]
    fn rejects_future_schema() {
        let mut report = report();
        report.schema_version = SCHEMA_VERSION + 1;
        let json = export_json(&report).unwrap();
        assert!(import_json(&json).is_err());
    }

    #[test]
    fn csv_has_header_and_rows() {
        let report = report();
        let trades = export_trades_csv(&report.result.trades).unwrap();
        let mut lines = trades.lines();
        assert!(lines.next().unwrap().starts_with("trade_id,order_id,timestamp"));
        assert_eq!(lines.count(), report.result.trades.len());

        let equity = export_equity_csv(&report.result.equity_curve).unwrap();
        assert_eq!(equity.lines().count(), report.result.equity_curve.len() + 1);
    }

    #[test]
    fn summary_mentions_symbol() {
        let text = summary_text(&report());
        assert!(text.starts_with("SPY / buy_and_hold"));
        assert!(text.contains("final equity"));
    }
}
