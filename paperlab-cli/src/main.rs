//! PaperLab CLI: backtests and live-style replays over CSV bars.
//!
//! Commands:
//! - `backtest`: run one symbol from a TOML config and a bar CSV
//! - `batch`: run many bar CSVs in parallel with per-symbol seeds
//! - `replay`: feed bars as price events to a trading session holding
//!   orders from a JSON file, optionally saving the session state

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use paperlab_core::backtest::CancelToken;
use paperlab_core::config::EngineConfig;
use paperlab_core::domain::{OrderId, OrderRequest, PriceSnapshot};
use paperlab_core::engine::{EventReport, SessionSnapshot, TradingSession};
use paperlab_runner::data_loader::load_bars_csv;
use paperlab_runner::{load_input, run_backtest, run_batch, save_artifacts, summary_text, RunConfig};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "paperlab", about = "PaperLab: paper-trading engine and bar-by-bar backtester")]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest one symbol.
    Backtest {
        /// Path to a TOML run config. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bar CSV: timestamp,open,high,low,close[,volume].
        #[arg(long)]
        bars: PathBuf,

        /// Symbol. Defaults to the bar file name.
        #[arg(long)]
        symbol: Option<String>,

        /// Override the config seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Write result.json, trades.csv and equity.csv here.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Backtest several bar files in parallel, one account each.
    Batch {
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bar CSV files; each file name is its symbol.
        #[arg(required = true)]
        bars: Vec<PathBuf>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Replay bars against a session holding orders from a JSON file.
    Replay {
        #[arg(long)]
        bars: PathBuf,

        /// JSON array of orders (see `ReplayOrder`).
        #[arg(long)]
        orders: PathBuf,

        #[arg(long)]
        symbol: Option<String>,

        /// Starting cash.
        #[arg(long, default_value = "100000")]
        capital: Decimal,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// TOML run config; only its [engine] section is used.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Resume from a saved session instead of starting fresh.
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Save the final session state as JSON.
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

/// One entry of a replay order file.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplayOrder {
    Single {
        order: OrderRequest,
    },
    Oco {
        first: OrderRequest,
        second: OrderRequest,
    },
    Bracket {
        entry: OrderRequest,
        stop_loss: OrderRequest,
        #[serde(default)]
        take_profit: Option<OrderRequest>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Backtest {
            config,
            bars,
            symbol,
            seed,
            output_dir,
        } => run_backtest_cmd(config.as_deref(), &bars, symbol.as_deref(), seed, output_dir.as_deref()),
        Commands::Batch {
            config,
            bars,
            output_dir,
        } => run_batch_cmd(config.as_deref(), &bars, output_dir.as_deref()),
        Commands::Replay {
            bars,
            orders,
            symbol,
            capital,
            seed,
            config,
            resume,
            save,
        } => run_replay_cmd(ReplayArgs {
            bars,
            orders,
            symbol,
            capital,
            seed,
            config,
            resume,
            save,
        }),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(p) => RunConfig::load(p).with_context(|| format!("loading config {}", p.display())),
        None => Ok(RunConfig::default()),
    }
}

fn run_backtest_cmd(
    config_path: Option<&Path>,
    bars: &Path,
    symbol: Option<&str>,
    seed: Option<u64>,
    output_dir: Option<&Path>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(seed) = seed {
        config.backtest.seed = seed;
    }
    let input = load_input(&config, bars, symbol).with_context(|| format!("loading {}", bars.display()))?;
    let report = run_backtest(&config, &input, &CancelToken::new())
        .with_context(|| format!("backtesting {}", input.symbol))?;

    print!("{}", summary_text(&report));
    if let Some(dir) = output_dir {
        let run_dir = save_artifacts(&report, dir)?;
        println!("Artifacts saved to: {}", run_dir.display());
    }
    Ok(())
}

fn run_batch_cmd(config_path: Option<&Path>, bars: &[PathBuf], output_dir: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let inputs = bars
        .iter()
        .map(|path| load_input(&config, path, None).with_context(|| format!("loading {}", path.display())))
        .collect::<Result<Vec<_>>>()?;

    let mut failed = 0;
    for (symbol, outcome) in run_batch(&config, &inputs, &CancelToken::new()) {
        match outcome {
            Ok(report) => {
                print!("{}", summary_text(&report));
                if let Some(dir) = output_dir {
                    save_artifacts(&report, dir)?;
                }
            }
            Err(err) => {
                failed += 1;
                eprintln!("{symbol}: {err}");
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} runs failed", inputs.len());
    }
    Ok(())
}

struct ReplayArgs {
    bars: PathBuf,
    orders: PathBuf,
    symbol: Option<String>,
    capital: Decimal,
    seed: u64,
    config: Option<PathBuf>,
    resume: Option<PathBuf>,
    save: Option<PathBuf>,
}

fn run_replay_cmd(args: ReplayArgs) -> Result<()> {
    let loaded = load_bars_csv(&args.bars, args.symbol.as_deref())
        .with_context(|| format!("loading {}", args.bars.display()))?;
    let orders_json = std::fs::read_to_string(&args.orders)
        .with_context(|| format!("reading {}", args.orders.display()))?;
    let orders: Vec<ReplayOrder> = serde_json::from_str(&orders_json).context("parsing replay orders")?;

    let mut session = match &args.resume {
        Some(path) => {
            let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            let snapshot: SessionSnapshot = serde_json::from_str(&json).context("parsing saved session")?;
            TradingSession::restore(snapshot, args.seed)?
        }
        None => {
            let engine: EngineConfig = load_config(args.config.as_deref())?.engine;
            TradingSession::new(engine, args.capital, args.seed)?
        }
    };

    let Some(first) = loaded.bars.first() else {
        bail!("{} has no bars", args.bars.display());
    };
    // Orders are placed once the first bar's open is known.
    session.observe_price(&loaded.symbol, first.open);
    for order in orders {
        let placed: Result<Vec<OrderId>, _> = match order {
            ReplayOrder::Single { order } => session.submit(order, first.timestamp).map(|id| vec![id]),
            ReplayOrder::Oco { first: a, second: b } => {
                session.submit_oco(a, b, first.timestamp).map(|(a, b)| vec![a, b])
            }
            ReplayOrder::Bracket {
                entry,
                stop_loss,
                take_profit,
            } => session
                .submit_bracket(entry, stop_loss, take_profit, first.timestamp)
                .map(|ids| [Some(ids.entry), Some(ids.stop_loss), ids.take_profit].into_iter().flatten().collect()),
        };
        match placed {
            Ok(ids) => info!(?ids, "orders placed"),
            Err(err) => warn!(error = %err, "order rejected at submission"),
        }
    }

    let mut fills = 0;
    for bar in &loaded.bars {
        let snapshot: PriceSnapshot = bar.snapshot();
        match session.on_price(&loaded.symbol, &snapshot, bar.timestamp) {
            Ok(report) => {
                fills += report.fills.len();
                print_event(&report);
            }
            Err(err) => warn!(at = %bar.timestamp, error = %err, "bar skipped"),
        }
    }

    let equity = session.equity()?;
    println!(
        "{} bars, {fills} fills, cash {}, equity {}",
        loaded.bars.len(),
        session.account().cash.round_dp(2),
        equity.round_dp(2)
    );

    if let Some(path) = &args.save {
        let json = serde_json::to_string_pretty(&session.snapshot()).context("serializing session")?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
        println!("Session saved to: {}", path.display());
    }
    Ok(())
}

fn print_event(report: &EventReport) {
    for t in &report.fills {
        println!(
            "{}  {:?} {:?} {} {} @ {}  pnl {}",
            t.timestamp.format("%Y-%m-%d %H:%M"),
            t.side,
            t.position_side,
            t.quantity,
            t.symbol,
            t.price.round_dp(4),
            t.realized_pnl.round_dp(2)
        );
    }
    for r in &report.rejected {
        println!("  rejected {}: {}", r.order_id, r.failure.message);
    }
    for w in &report.warnings {
        println!("  warning: {w:?}");
    }
}
