//! CLI definition and dispatch.

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::openai_adapter::{OpenAiAdapter, OpenAiConfig};
use crate::adapters::standard_indicators::StandardIndicators;
use crate::domain::advisory::AdvisorRole;
use crate::domain::backtest::{BacktestConfig, BacktestMode, BacktestResult};
use crate::domain::budget::{BudgetLimits, TierPricing};
use crate::domain::config_validation::{
    parse_timestamp, validate_backtest_config, validate_governor_config, validate_llm_config,
    validate_pipeline_config, validate_portfolio_config, validate_signal_config,
};
use crate::domain::error::TradeloomError;
use crate::domain::execution::{ExecutionConfig, PortfolioConfig};
use crate::domain::governor::{Governor, GovernorConfig};
use crate::domain::orchestrator::{Orchestrator, PipelineConfig};
use crate::domain::prompts::PromptLimits;
use crate::domain::retry::RetryPolicy;
use crate::domain::signal_engine::{SignalConfig, SignalEngine, SignalStrategy};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::MarketDataPort;
use crate::ports::persistence_port::PersistencePort;
use crate::ports::report_port::ReportPort;
use crate::service::{EvaluationMode, ServiceConfig, TradingService, restore_budget};

#[derive(Parser, Debug)]
#[command(name = "tradeloom", about = "Candle-to-decision trading core and backtester")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay historical candles through the decision pipeline
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Report directory (default: reports/<run_id>)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        symbol: Option<String>,
        /// rule or advisory
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Decide on the latest candle of a symbol
    Evaluate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        symbol: Option<String>,
        /// live or backtest_step
        #[arg(long, default_value = "live")]
        mode: String,
        /// Use the advisory pipeline instead of the rules
        #[arg(long)]
        advisory: bool,
        /// backtest_step only: decide against this run's open position
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Print the latest portfolio snapshot of a run
    Snapshot {
        #[arg(short, long)]
        config: PathBuf,
        /// Defaults to the live run
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    init_tracing();
    match cli.command {
        Command::Backtest {
            config,
            output,
            symbol,
            mode,
            dry_run,
        } => run_backtest(&config, output.as_ref(), symbol.as_deref(), mode.as_deref(), dry_run),
        Command::Evaluate {
            config,
            symbol,
            mode,
            advisory,
            run_id,
        } => run_evaluate(&config, symbol.as_deref(), &mode, advisory, run_id.as_deref()),
        Command::Snapshot { config, run_id } => run_snapshot(&config, run_id.as_deref()),
        Command::Validate { config } => run_validate(&config),
    }
}

/// `RUST_LOG` filter on stderr, `warn` when unset.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = TradeloomError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

fn fail(err: TradeloomError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

fn runtime() -> Result<tokio::runtime::Runtime, TradeloomError> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TradeloomError {
    TradeloomError::ConfigInvalid {
        section: section.into(),
        key: key.into(),
        reason: reason.into(),
    }
}

fn required_timestamp(
    adapter: &dyn ConfigPort,
    key: &str,
    end_of_day: bool,
) -> Result<chrono::DateTime<chrono::Utc>, TradeloomError> {
    let raw = adapter
        .get_string("backtest", key)
        .ok_or_else(|| TradeloomError::ConfigMissing {
            section: "backtest".into(),
            key: key.into(),
        })?;
    parse_timestamp(&raw, end_of_day)
        .ok_or_else(|| invalid("backtest", key, "expected YYYY-MM-DD or RFC 3339"))
}

fn count(adapter: &dyn ConfigPort, section: &str, key: &str, default: i64) -> usize {
    adapter.get_int(section, key, default).max(0) as usize
}

fn millis(adapter: &dyn ConfigPort, key: &str, default: u64) -> Duration {
    Duration::from_millis(adapter.get_int("retry", key, default as i64).max(0) as u64)
}

fn configured_mode(adapter: &dyn ConfigPort) -> Result<BacktestMode, TradeloomError> {
    match adapter.get_string("backtest", "mode") {
        Some(mode) => mode.parse().map_err(|e: String| invalid("backtest", "mode", e)),
        None => Ok(BacktestMode::Rule),
    }
}

pub fn build_backtest_config(adapter: &dyn ConfigPort) -> Result<BacktestConfig, TradeloomError> {
    let symbol = adapter
        .get_string("backtest", "symbol")
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| TradeloomError::ConfigMissing {
            section: "backtest".into(),
            key: "symbol".into(),
        })?;

    Ok(BacktestConfig {
        symbol: symbol.trim().to_string(),
        timeframe: adapter
            .get_string("backtest", "timeframe")
            .unwrap_or_else(|| "1h".to_string()),
        start: required_timestamp(adapter, "start", false)?,
        end: required_timestamp(adapter, "end", true)?,
        mode: configured_mode(adapter)?,
        max_advisory_calls: count(adapter, "backtest", "max_advisory_calls", 100),
        warmup_candles: count(adapter, "backtest", "warmup_candles", 0),
        risk_free_rate: adapter.get_double("backtest", "risk_free_rate", 0.0),
        portfolio: build_portfolio_config(adapter),
    })
}

pub fn build_portfolio_config(adapter: &dyn ConfigPort) -> PortfolioConfig {
    PortfolioConfig {
        initial_capital: adapter.get_double("portfolio", "initial_capital", 10_000.0),
        max_position_fraction: adapter.get_double("portfolio", "max_position_fraction", 0.25),
        allow_scale_in: adapter.get_bool("portfolio", "allow_scale_in", false),
        execution: ExecutionConfig {
            commission_per_trade: adapter.get_double("portfolio", "commission_per_trade", 0.0),
            commission_pct: adapter.get_double("portfolio", "commission_pct", 0.0),
            slippage_pct: adapter.get_double("portfolio", "slippage_pct", 0.0),
        },
    }
}

pub fn build_signal_config(adapter: &dyn ConfigPort) -> Result<SignalConfig, TradeloomError> {
    let defaults = SignalConfig::default();
    let strategy = match adapter.get_string("signal", "strategy") {
        Some(s) => s
            .parse::<SignalStrategy>()
            .map_err(|e| invalid("signal", "strategy", e))?,
        None => defaults.strategy,
    };
    let period = |key: &str, default: usize| count(adapter, "signal", key, default as i64);

    Ok(SignalConfig {
        strategy,
        macd_fast: period("macd_fast", defaults.macd_fast),
        macd_slow: period("macd_slow", defaults.macd_slow),
        macd_signal: period("macd_signal", defaults.macd_signal),
        rsi_period: period("rsi_period", defaults.rsi_period),
        rsi_overbought: adapter.get_double("signal", "rsi_overbought", defaults.rsi_overbought),
        rsi_oversold: adapter.get_double("signal", "rsi_oversold", defaults.rsi_oversold),
        ema_fast: period("ema_fast", defaults.ema_fast),
        ema_slow: period("ema_slow", defaults.ema_slow),
        ema_trend: period("ema_trend", defaults.ema_trend),
        bollinger_period: period("bollinger_period", defaults.bollinger_period),
        bollinger_mult_x100: (adapter.get_double(
            "signal",
            "bollinger_mult",
            defaults.bollinger_mult_x100 as f64 / 100.0,
        ) * 100.0)
            .round() as u32,
        volume_period: period("volume_period", defaults.volume_period),
        volume_multiple: adapter.get_double("signal", "volume_multiple", defaults.volume_multiple),
        lookback_candles: period("lookback_candles", defaults.lookback_candles),
    })
}

pub fn build_pipeline_config(adapter: &dyn ConfigPort) -> Result<PipelineConfig, TradeloomError> {
    let defaults = PipelineConfig::default();
    let advisors = match adapter.get_string("pipeline", "advisors") {
        Some(_) => adapter
            .get_list("pipeline", "advisors")
            .iter()
            .map(|name| name.parse::<AdvisorRole>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid("pipeline", "advisors", e))?,
        None => defaults.advisors,
    };
    let prompt_defaults = PromptLimits::default();

    Ok(PipelineConfig {
        threshold_low: adapter.get_double("pipeline", "threshold_low", defaults.threshold_low),
        threshold_high: adapter.get_double("pipeline", "threshold_high", defaults.threshold_high),
        advisors,
        prompts: PromptLimits {
            advisor_max_tokens: adapter
                .get_int(
                    "pipeline",
                    "advisor_max_tokens",
                    prompt_defaults.advisor_max_tokens as i64,
                )
                .max(1) as u32,
            stage_max_tokens: adapter
                .get_int(
                    "pipeline",
                    "stage_max_tokens",
                    prompt_defaults.stage_max_tokens as i64,
                )
                .max(1) as u32,
            temperature: adapter.get_double(
                "pipeline",
                "temperature",
                prompt_defaults.temperature as f64,
            ) as f32,
        },
    })
}

pub fn build_budget_limits(adapter: &dyn ConfigPort) -> BudgetLimits {
    let defaults = BudgetLimits::default();
    BudgetLimits {
        daily_token_limit: adapter
            .get_int("budget", "daily_token_limit", defaults.daily_token_limit as i64)
            .max(0) as u64,
        daily_cost_limit: adapter.get_double("budget", "daily_cost_limit", defaults.daily_cost_limit),
    }
}

pub fn build_governor_config(adapter: &dyn ConfigPort) -> GovernorConfig {
    let defaults = GovernorConfig::default();
    let retry = RetryPolicy::default();
    let pricing = |tier: &str, fallback: TierPricing| TierPricing {
        input_per_1k: adapter.get_double("budget", &format!("{tier}_input_per_1k"), fallback.input_per_1k),
        output_per_1k: adapter.get_double(
            "budget",
            &format!("{tier}_output_per_1k"),
            fallback.output_per_1k,
        ),
    };

    GovernorConfig {
        retry: RetryPolicy {
            max_attempts: adapter
                .get_int("retry", "max_attempts", retry.max_attempts as i64)
                .max(1) as u32,
            base_delay: millis(adapter, "base_delay_ms", retry.base_delay.as_millis() as u64),
            rate_limit_base_delay: millis(
                adapter,
                "rate_limit_base_delay_ms",
                retry.rate_limit_base_delay.as_millis() as u64,
            ),
            max_delay: millis(adapter, "max_delay_ms", retry.max_delay.as_millis() as u64),
            timeout: Duration::from_secs(
                adapter
                    .get_int("retry", "timeout_secs", retry.timeout.as_secs() as i64)
                    .max(1) as u64,
            ),
        },
        cheap: pricing("cheap", defaults.cheap),
        strong: pricing("strong", defaults.strong),
    }
}

pub fn build_service_config(adapter: &dyn ConfigPort) -> ServiceConfig {
    let defaults = ServiceConfig::default();
    ServiceConfig {
        timeframe: adapter
            .get_string("backtest", "timeframe")
            .unwrap_or(defaults.timeframe),
        live_run_id: adapter
            .get_string("portfolio", "run_id")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.live_run_id),
        portfolio: build_portfolio_config(adapter),
        max_advisory_calls: count(
            adapter,
            "backtest",
            "max_advisory_calls",
            defaults.max_advisory_calls as i64,
        ),
        warmup_candles: count(adapter, "backtest", "warmup_candles", 0),
        risk_free_rate: adapter.get_double("backtest", "risk_free_rate", defaults.risk_free_rate),
    }
}

/// CSV files when `[data] csv_dir` is set, otherwise the SQLite candle table.
fn build_data_port(adapter: &dyn ConfigPort) -> Result<Box<dyn MarketDataPort>, TradeloomError> {
    if let Some(dir) = adapter.get_string("data", "csv_dir") {
        return Ok(Box::new(CsvAdapter::new(PathBuf::from(dir))));
    }

    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::sqlite_adapter::SqliteAdapter;
        Ok(Box::new(SqliteAdapter::from_config(adapter)?))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        Err(TradeloomError::ConfigMissing {
            section: "data".into(),
            key: "csv_dir".into(),
        })
    }
}

fn build_persistence(adapter: &dyn ConfigPort) -> Result<Box<dyn PersistencePort>, TradeloomError> {
    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::sqlite_adapter::SqliteAdapter;
        Ok(Box::new(SqliteAdapter::from_config(adapter)?))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = adapter;
        Err(TradeloomError::Database {
            reason: "sqlite feature is required for run persistence".into(),
        })
    }
}

fn build_orchestrator(
    adapter: &dyn ConfigPort,
    persistence: &dyn PersistencePort,
) -> Result<Orchestrator, TradeloomError> {
    validate_llm_config(adapter)?;
    let completion = Arc::new(OpenAiAdapter::new(OpenAiConfig::from_config(adapter)?));
    let ledger = restore_budget(persistence, build_budget_limits(adapter), Utc::now())?;
    let governor = Governor::new(completion, ledger, build_governor_config(adapter));
    Ok(Orchestrator::new(
        Arc::new(governor),
        build_pipeline_config(adapter)?,
    ))
}

fn build_service(adapter: &dyn ConfigPort, advisory: bool) -> Result<TradingService, TradeloomError> {
    let signal = build_signal_config(adapter)?;
    let indicators = StandardIndicators::new(signal.required_indicators());
    let persistence = build_persistence(adapter)?;
    let orchestrator = if advisory {
        Some(build_orchestrator(adapter, persistence.as_ref())?)
    } else {
        None
    };
    let service = TradingService::new(
        build_data_port(adapter)?,
        Box::new(indicators),
        persistence,
        SignalEngine::new(signal),
        build_service_config(adapter),
    );
    Ok(match orchestrator {
        Some(orchestrator) => service.with_orchestrator(orchestrator),
        None => service,
    })
}

fn validate_all(adapter: &dyn ConfigPort, advisory: bool) -> Result<(), TradeloomError> {
    validate_signal_config(adapter)?;
    validate_pipeline_config(adapter)?;
    validate_governor_config(adapter)?;
    if advisory {
        validate_llm_config(adapter)?;
    }
    Ok(())
}

fn run_backtest(
    config_path: &PathBuf,
    output_path: Option<&PathBuf>,
    symbol_override: Option<&str>,
    mode_override: Option<&str>,
    dry_run: bool,
) -> ExitCode {
    // Stage 1: Load config and apply overrides
    eprintln!("Loading config from {}", config_path.display());
    let mut adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Some(symbol) = symbol_override {
        adapter.set("backtest", "symbol", symbol);
    }
    if let Some(mode) = mode_override {
        adapter.set("backtest", "mode", mode);
    }

    // Stage 2: Validate
    if let Err(e) = validate_backtest_config(&adapter) {
        return fail(e);
    }
    let bt_config = match build_backtest_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    let advisory = bt_config.mode == BacktestMode::Advisory;
    if let Err(e) = validate_all(&adapter, advisory) {
        return fail(e);
    }

    if dry_run {
        return print_plan(&adapter, &bt_config);
    }

    // Stage 3: Wire the service and replay
    let service = match build_service(&adapter, advisory) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => return fail(e),
    };

    eprintln!(
        "Running {} backtest: {} ({}) {} to {}",
        bt_config.mode, bt_config.symbol, bt_config.timeframe, bt_config.start, bt_config.end
    );
    let result = match rt.block_on(service.run_backtest(
        &bt_config.symbol,
        bt_config.start,
        bt_config.end,
        bt_config.mode,
    )) {
        Ok(r) => r,
        Err(e) => return fail(e),
    };

    // Stage 4: Console summary and report
    print_summary(&result);

    let output = output_path
        .cloned()
        .unwrap_or_else(|| Path::new("reports").join(&result.run_id));
    match CsvReportAdapter::new().write(&result, &output.display().to_string()) {
        Ok(()) => {
            eprintln!("\nReport written to: {}", output.display());
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn print_plan(adapter: &dyn ConfigPort, bt_config: &BacktestConfig) -> ExitCode {
    let signal = match build_signal_config(adapter) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    eprintln!("Config validated successfully");
    eprintln!("\nBacktest:");
    eprintln!("  symbol:    {} ({})", bt_config.symbol, bt_config.timeframe);
    eprintln!("  range:     {} to {}", bt_config.start, bt_config.end);
    eprintln!("  mode:      {}", bt_config.mode);
    eprintln!("  capital:   {:.2}", bt_config.portfolio.initial_capital);
    if bt_config.mode == BacktestMode::Advisory {
        eprintln!("  advisory call cap: {}", bt_config.max_advisory_calls);
    }
    eprintln!("\nSignal strategy: {}", signal.strategy);
    eprintln!("  history needed: {} candles", signal.min_history());
    eprintln!("  evaluation window: {} candles", signal.lookback());

    let mut indicators: Vec<String> = signal
        .required_indicators()
        .iter()
        .map(|i| i.to_string())
        .collect();
    indicators.sort();
    eprintln!("\nIndicators to compute:");
    for ind in &indicators {
        eprintln!("  {}", ind);
    }

    eprintln!("\nDry run complete: configuration is valid");
    ExitCode::SUCCESS
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    eprintln!("\n=== Results: {} ===", result.run_id);
    eprintln!("Final Equity:     {:.2}", result.final_snapshot.total_equity);
    eprintln!("Total Return:     {:.2}%", m.total_return * 100.0);
    eprintln!("Annualized:       {:.2}%", m.annualized_return * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", m.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", m.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", m.max_drawdown * 100.0);
    eprintln!("Total Trades:     {}", m.total_trades());
    eprintln!("Win Rate:         {:.1}%", m.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", m.profit_factor);
    if result.mode == BacktestMode::Advisory {
        eprintln!(
            "Advisory Calls:   {} (${:.4})",
            result.advisory_invocations, result.advisory_cost
        );
    }
}

fn run_evaluate(
    config_path: &PathBuf,
    symbol_override: Option<&str>,
    mode: &str,
    advisory_flag: bool,
    run_id: Option<&str>,
) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let mode: EvaluationMode = match mode.parse() {
        Ok(m) => m,
        Err(reason) => {
            eprintln!("error: {reason}");
            return ExitCode::from(2);
        }
    };
    if run_id.is_some() && mode != EvaluationMode::BacktestStep {
        eprintln!("error: --run-id only applies to backtest_step evaluation");
        return ExitCode::from(2);
    }
    let symbol = match symbol_override
        .map(str::to_string)
        .or_else(|| adapter.get_string("backtest", "symbol"))
    {
        Some(s) => s,
        None => {
            eprintln!("error: symbol is required (use --symbol or set [backtest] symbol)");
            return ExitCode::from(2);
        }
    };
    let advisory = match configured_mode(&adapter) {
        Ok(m) => advisory_flag || m == BacktestMode::Advisory,
        Err(e) => return fail(e),
    };

    if let Err(e) = validate_portfolio_config(&adapter).and_then(|_| validate_all(&adapter, advisory)) {
        return fail(e);
    }
    let service = match build_service(&adapter, advisory) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => return fail(e),
    };

    eprintln!("Evaluating {} ({})", symbol, mode);
    let evaluation = match run_id {
        Some(run_id) => rt.block_on(service.evaluate_step(&symbol, Utc::now(), Some(run_id))),
        None => rt.block_on(service.evaluate(&symbol, mode)),
    };
    let decision = match evaluation {
        Ok(d) => d,
        Err(e) => return fail(e),
    };
    eprintln!(
        "{} {} (confidence {:.2}, approved: {}): {}",
        decision.action(),
        decision.symbol(),
        decision.confidence(),
        decision.approved(),
        decision.reasoning()
    );
    match serde_json::to_string_pretty(&decision) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(TradeloomError::Io(std::io::Error::other(e.to_string()))),
    }
}

fn run_snapshot(config_path: &PathBuf, run_id: Option<&str>) -> ExitCode {
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    let service = match build_service(&adapter, false) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    let run_id = run_id
        .map(str::to_string)
        .unwrap_or_else(|| service.config().live_run_id.clone());
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => return fail(e),
    };

    let snapshot = match rt.block_on(service.get_portfolio_snapshot(&run_id)) {
        Ok(s) => s,
        Err(e) => return fail(e),
    };
    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(TradeloomError::Io(std::io::Error::other(e.to_string()))),
    }
}

fn run_validate(config_path: &PathBuf) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let advisory = match configured_mode(&adapter) {
        Ok(m) => m == BacktestMode::Advisory,
        Err(e) => return fail(e),
    };
    let checks: [(&str, fn(&dyn ConfigPort) -> Result<(), TradeloomError>); 5] = [
        ("backtest", validate_backtest_config),
        ("signal", validate_signal_config),
        ("pipeline", validate_pipeline_config),
        ("budget/retry", validate_governor_config),
        ("llm", validate_llm_config),
    ];
    for (name, check) in checks {
        if name == "llm" && !advisory {
            eprintln!("  {:<14} skipped (rule mode)", name);
            continue;
        }
        match check(&adapter) {
            Ok(()) => eprintln!("  {:<14} ok", name),
            Err(e) => {
                eprintln!("  {:<14} FAILED", name);
                return fail(e);
            }
        }
    }

    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}
