//! Configuration validation.
//!
//! Every section is checked before anything is built from it, so a bad value
//! fails with the section and key that caused it.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::domain::advisory::AdvisorRole;
use crate::domain::backtest::BacktestMode;
use crate::domain::error::TradeloomError;
use crate::domain::signal_engine::SignalStrategy;
use crate::ports::config_port::ConfigPort;

/// Accepts RFC 3339 or `YYYY-MM-DD`. A bare date is the start of that day,
/// or its last second when `end_of_day` is set.
pub fn parse_timestamp(value: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)?
    } else {
        NaiveTime::MIN
    };
    Some(date.and_time(time).and_utc())
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TradeloomError {
    TradeloomError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> TradeloomError {
    TradeloomError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn require_string(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, TradeloomError> {
    match config.get_string(section, key) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(missing(section, key)),
    }
}

fn non_negative(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), TradeloomError> {
    let value = config.get_double(section, key, 0.0);
    if value < 0.0 {
        return Err(invalid(section, key, format!("{key} must be non-negative")));
    }
    Ok(())
}

fn positive_int(config: &dyn ConfigPort, section: &str, key: &str, default: i64) -> Result<i64, TradeloomError> {
    let value = config.get_int(section, key, default);
    if value < 1 {
        return Err(invalid(section, key, format!("{key} must be at least 1")));
    }
    Ok(value)
}

/// `[backtest]` and `[portfolio]`.
pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), TradeloomError> {
    require_string(config, "backtest", "symbol")?;
    validate_dates(config)?;
    validate_mode(config)?;
    validate_risk_free_rate(config)?;
    if config.get_int("backtest", "warmup_candles", 0) < 0 {
        return Err(invalid("backtest", "warmup_candles", "warmup_candles must be non-negative"));
    }
    if config.get_int("backtest", "max_advisory_calls", 0) < 0 {
        return Err(invalid(
            "backtest",
            "max_advisory_calls",
            "max_advisory_calls must be non-negative",
        ));
    }
    validate_portfolio_config(config)
}

pub fn validate_portfolio_config(config: &dyn ConfigPort) -> Result<(), TradeloomError> {
    let capital = config.get_double("portfolio", "initial_capital", 10_000.0);
    if capital <= 0.0 {
        return Err(invalid("portfolio", "initial_capital", "initial_capital must be positive"));
    }
    let fraction = config.get_double("portfolio", "max_position_fraction", 0.25);
    if fraction <= 0.0 || fraction > 1.0 {
        return Err(invalid(
            "portfolio",
            "max_position_fraction",
            "max_position_fraction must be in (0, 1]",
        ));
    }
    non_negative(config, "portfolio", "commission_per_trade")?;
    non_negative(config, "portfolio", "commission_pct")?;
    non_negative(config, "portfolio", "slippage_pct")?;
    Ok(())
}

fn validate_dates(config: &dyn ConfigPort) -> Result<(), TradeloomError> {
    let start = require_string(config, "backtest", "start")?;
    let end = require_string(config, "backtest", "end")?;
    let start = parse_timestamp(&start, false)
        .ok_or_else(|| invalid("backtest", "start", "expected YYYY-MM-DD or RFC 3339"))?;
    let end = parse_timestamp(&end, true)
        .ok_or_else(|| invalid("backtest", "end", "expected YYYY-MM-DD or RFC 3339"))?;
    if start >= end {
        return Err(invalid("backtest", "start", "start must be before end"));
    }
    Ok(())
}

fn validate_mode(config: &dyn ConfigPort) -> Result<(), TradeloomError> {
    if let Some(mode) = config.get_string("backtest", "mode") {
        mode.parse::<BacktestMode>()
            .map_err(|e| invalid("backtest", "mode", e))?;
    }
    Ok(())
}

fn validate_risk_free_rate(config: &dyn ConfigPort) -> Result<(), TradeloomError> {
    let value = config.get_double("backtest", "risk_free_rate", 0.0);
    if !(0.0..1.0).contains(&value) {
        return Err(invalid("backtest", "risk_free_rate", "risk_free_rate must be between 0 and 1"));
    }
    Ok(())
}

/// `[signal]`.
pub fn validate_signal_config(config: &dyn ConfigPort) -> Result<(), TradeloomError> {
    if let Some(strategy) = config.get_string("signal", "strategy") {
        strategy
            .parse::<SignalStrategy>()
            .map_err(|e| invalid("signal", "strategy", e))?;
    }

    let macd_fast = positive_int(config, "signal", "macd_fast", 12)?;
    let macd_slow = positive_int(config, "signal", "macd_slow", 26)?;
    positive_int(config, "signal", "macd_signal", 9)?;
    if macd_fast >= macd_slow {
        return Err(invalid("signal", "macd_fast", "macd_fast must be below macd_slow"));
    }

    let ema_fast = positive_int(config, "signal", "ema_fast", 12)?;
    let ema_slow = positive_int(config, "signal", "ema_slow", 26)?;
    positive_int(config, "signal", "ema_trend", 50)?;
    if ema_fast >= ema_slow {
        return Err(invalid("signal", "ema_fast", "ema_fast must be below ema_slow"));
    }

    positive_int(config, "signal", "rsi_period", 14)?;
    let oversold = config.get_double("signal", "rsi_oversold", 30.0);
    let overbought = config.get_double("signal", "rsi_overbought", 70.0);
    if !(0.0 < oversold && oversold < overbought && overbought < 100.0) {
        return Err(invalid(
            "signal",
            "rsi_overbought",
            "expected 0 < rsi_oversold < rsi_overbought < 100",
        ));
    }

    positive_int(config, "signal", "bollinger_period", 20)?;
    if config.get_double("signal", "bollinger_mult", 2.0) <= 0.0 {
        return Err(invalid("signal", "bollinger_mult", "bollinger_mult must be positive"));
    }
    positive_int(config, "signal", "volume_period", 20)?;
    if config.get_double("signal", "volume_multiple", 1.5) <= 0.0 {
        return Err(invalid("signal", "volume_multiple", "volume_multiple must be positive"));
    }
    positive_int(config, "signal", "lookback_candles", 250)?;
    Ok(())
}

/// `[pipeline]`.
pub fn validate_pipeline_config(config: &dyn ConfigPort) -> Result<(), TradeloomError> {
    let low = config.get_double("pipeline", "threshold_low", 60.0);
    let high = config.get_double("pipeline", "threshold_high", 80.0);
    if !(0.0..=100.0).contains(&low) {
        return Err(invalid("pipeline", "threshold_low", "threshold_low must be within 0-100"));
    }
    if !(0.0..=100.0).contains(&high) || high < low {
        return Err(invalid(
            "pipeline",
            "threshold_high",
            "threshold_high must be within threshold_low-100",
        ));
    }
    if config.get_string("pipeline", "advisors").is_some() {
        let advisors = config.get_list("pipeline", "advisors");
        if advisors.is_empty() {
            return Err(invalid("pipeline", "advisors", "at least one advisor is required"));
        }
        for name in &advisors {
            name.parse::<AdvisorRole>()
                .map_err(|e| invalid("pipeline", "advisors", e))?;
        }
    }
    Ok(())
}

/// `[budget]` and `[retry]`.
pub fn validate_governor_config(config: &dyn ConfigPort) -> Result<(), TradeloomError> {
    if config.get_int("budget", "daily_token_limit", 0) < 0 {
        return Err(invalid("budget", "daily_token_limit", "daily_token_limit must be non-negative"));
    }
    for key in [
        "daily_cost_limit",
        "cheap_input_per_1k",
        "cheap_output_per_1k",
        "strong_input_per_1k",
        "strong_output_per_1k",
    ] {
        non_negative(config, "budget", key)?;
    }

    positive_int(config, "retry", "max_attempts", 3)?;
    for key in ["base_delay_ms", "rate_limit_base_delay_ms", "max_delay_ms"] {
        if config.get_int("retry", key, 0) < 0 {
            return Err(invalid("retry", key, format!("{key} must be non-negative")));
        }
    }
    positive_int(config, "retry", "timeout_secs", 30)?;
    Ok(())
}

/// `[llm]`; only needed when the advisory path is used.
pub fn validate_llm_config(config: &dyn ConfigPort) -> Result<(), TradeloomError> {
    let base_url = require_string(config, "llm", "base_url")?;
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        return Err(invalid("llm", "base_url", "base_url must be an http(s) URL"));
    }
    require_string(config, "llm", "cheap_model")?;
    require_string(config, "llm", "strong_model")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use chrono::TimeZone;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    const BACKTEST: &str = "[backtest]\nsymbol = BTCUSDT\nstart = 2024-01-01\nend = 2024-03-31\n";

    #[test]
    fn parse_timestamp_accepts_dates_and_rfc3339() {
        assert_eq!(
            parse_timestamp("2024-01-02", false),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );
        assert_eq!(
            parse_timestamp("2024-01-02", true),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 23, 59, 59).unwrap())
        );
        assert_eq!(
            parse_timestamp("2024-01-02T05:00:00+01:00", false),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 4, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("02/01/2024", false), None);
    }

    mod backtest {
        use super::*;

        #[test]
        fn valid_backtest_config_passes() {
            let config = make_config(
                r#"
[backtest]
symbol = BTCUSDT
timeframe = 1h
start = 2024-01-01
end = 2024-03-31
mode = advisory
max_advisory_calls = 50
warmup_candles = 60
risk_free_rate = 0.04

[portfolio]
initial_capital = 10000
max_position_fraction = 0.5
commission_pct = 0.1
slippage_pct = 0.05
"#,
            );
            assert!(validate_backtest_config(&config).is_ok());
        }

        #[test]
        fn missing_symbol_fails() {
            let config = make_config("[backtest]\nstart = 2024-01-01\nend = 2024-03-31\n");
            let err = validate_backtest_config(&config).unwrap_err();
            assert!(matches!(err, TradeloomError::ConfigMissing { key, .. } if key == "symbol"));
        }

        #[test]
        fn missing_end_fails() {
            let config = make_config("[backtest]\nsymbol = BTCUSDT\nstart = 2024-01-01\n");
            let err = validate_backtest_config(&config).unwrap_err();
            assert!(matches!(err, TradeloomError::ConfigMissing { key, .. } if key == "end"));
        }

        #[test]
        fn invalid_start_format_fails() {
            let config =
                make_config("[backtest]\nsymbol = BTCUSDT\nstart = 2024/01/01\nend = 2024-03-31\n");
            let err = validate_backtest_config(&config).unwrap_err();
            assert!(matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "start"));
        }

        #[test]
        fn start_after_end_fails() {
            let config =
                make_config("[backtest]\nsymbol = BTCUSDT\nstart = 2024-05-01\nend = 2024-03-31\n");
            let err = validate_backtest_config(&config).unwrap_err();
            assert!(matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "start"));
        }

        #[test]
        fn same_day_range_is_valid() {
            let config =
                make_config("[backtest]\nsymbol = BTCUSDT\nstart = 2024-01-01\nend = 2024-01-01\n");
            assert!(validate_backtest_config(&config).is_ok());
        }

        #[test]
        fn unknown_mode_fails() {
            let config = make_config(&format!("{BACKTEST}mode = gut_feeling\n"));
            let err = validate_backtest_config(&config).unwrap_err();
            assert!(matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "mode"));
        }

        #[test]
        fn risk_free_rate_out_of_range_fails() {
            let config = make_config(&format!("{BACKTEST}risk_free_rate = 1.5\n"));
            let err = validate_backtest_config(&config).unwrap_err();
            assert!(
                matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "risk_free_rate")
            );
        }

        #[test]
        fn negative_warmup_fails() {
            let config = make_config(&format!("{BACKTEST}warmup_candles = -1\n"));
            let err = validate_backtest_config(&config).unwrap_err();
            assert!(
                matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "warmup_candles")
            );
        }
    }

    mod portfolio {
        use super::*;

        #[test]
        fn initial_capital_zero_fails() {
            let config = make_config("[portfolio]\ninitial_capital = 0\n");
            let err = validate_portfolio_config(&config).unwrap_err();
            assert!(
                matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "initial_capital")
            );
        }

        #[test]
        fn fraction_above_one_fails() {
            let config = make_config("[portfolio]\nmax_position_fraction = 1.5\n");
            let err = validate_portfolio_config(&config).unwrap_err();
            assert!(
                matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "max_position_fraction")
            );
        }

        #[test]
        fn negative_commission_fails() {
            let config = make_config("[portfolio]\ncommission_pct = -0.1\n");
            let err = validate_portfolio_config(&config).unwrap_err();
            assert!(
                matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "commission_pct")
            );
        }

        #[test]
        fn empty_section_uses_defaults() {
            let config = make_config("[portfolio]\n");
            assert!(validate_portfolio_config(&config).is_ok());
        }
    }

    mod signal {
        use super::*;

        #[test]
        fn defaults_are_valid() {
            assert!(validate_signal_config(&make_config("[signal]\n")).is_ok());
        }

        #[test]
        fn unknown_strategy_fails() {
            let config = make_config("[signal]\nstrategy = astrology\n");
            let err = validate_signal_config(&config).unwrap_err();
            assert!(matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "strategy"));
        }

        #[test]
        fn fast_ema_must_be_faster() {
            let config = make_config("[signal]\nema_fast = 30\nema_slow = 20\n");
            let err = validate_signal_config(&config).unwrap_err();
            assert!(matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "ema_fast"));
        }

        #[test]
        fn zero_period_fails() {
            let config = make_config("[signal]\nrsi_period = 0\n");
            let err = validate_signal_config(&config).unwrap_err();
            assert!(matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "rsi_period"));
        }

        #[test]
        fn inverted_rsi_levels_fail() {
            let config = make_config("[signal]\nrsi_oversold = 80\nrsi_overbought = 20\n");
            assert!(validate_signal_config(&config).is_err());
        }
    }

    mod pipeline {
        use super::*;

        #[test]
        fn thresholds_must_be_ordered() {
            let config = make_config("[pipeline]\nthreshold_low = 80\nthreshold_high = 60\n");
            let err = validate_pipeline_config(&config).unwrap_err();
            assert!(
                matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "threshold_high")
            );
        }

        #[test]
        fn unknown_advisor_fails() {
            let config = make_config("[pipeline]\nadvisors = technical, astrologer\n");
            let err = validate_pipeline_config(&config).unwrap_err();
            assert!(matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "advisors"));
        }

        #[test]
        fn advisor_subset_passes() {
            let config = make_config("[pipeline]\nadvisors = technical, risk\n");
            assert!(validate_pipeline_config(&config).is_ok());
        }
    }

    mod governor {
        use super::*;

        #[test]
        fn zero_attempts_fails() {
            let config = make_config("[retry]\nmax_attempts = 0\n");
            let err = validate_governor_config(&config).unwrap_err();
            assert!(matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "max_attempts"));
        }

        #[test]
        fn negative_cost_limit_fails() {
            let config = make_config("[budget]\ndaily_cost_limit = -1\n");
            let err = validate_governor_config(&config).unwrap_err();
            assert!(
                matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "daily_cost_limit")
            );
        }

        #[test]
        fn llm_requires_base_url() {
            let config = make_config("[llm]\ncheap_model = a\nstrong_model = b\n");
            let err = validate_llm_config(&config).unwrap_err();
            assert!(matches!(err, TradeloomError::ConfigMissing { key, .. } if key == "base_url"));
        }

        #[test]
        fn llm_rejects_non_http_url() {
            let config =
                make_config("[llm]\nbase_url = ftp://x\ncheap_model = a\nstrong_model = b\n");
            let err = validate_llm_config(&config).unwrap_err();
            assert!(matches!(err, TradeloomError::ConfigInvalid { key, .. } if key == "base_url"));
        }
    }
}
