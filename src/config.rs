use crate::errors::{EstimationError, EstimationResult};
use crate::estimator::types::{PipelineConfig, TargetQuery, DEFAULT_DISCOUNT_RATE};
use crate::models::digital::DEFAULT_DSTRIKE_DIVISOR;
use crate::models::strike_curve::DEFAULT_STRIKE_WINDOW;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::str::FromStr;

/// Hour of day used when TARGET_EXPIRATION is a bare date.
const DEFAULT_EXPIRATION_HOUR_UTC: u32 = 8;

/// What one run computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Strike and time interpolation across all traded expirations.
    Surface,
    /// Strike interpolation on the traded expiration equal to the target.
    Expiry,
    /// Several strikes of one traded expiration plus their ranges.
    Ladder,
}

impl FromStr for Mode {
    type Err = EstimationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "surface" => Ok(Self::Surface),
            "expiry" => Ok(Self::Expiry),
            "ladder" => Ok(Self::Ladder),
            other => Err(EstimationError::Config(format!(
                "MODE: expected surface, expiry or ladder, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl FromStr for OutputFormat {
    type Err = EstimationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(EstimationError::Config(format!(
                "OUTPUT_FORMAT: expected text or json, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub query: TargetQuery,
    pub pipeline: PipelineConfig,
    pub deribit_base_url: String,
    pub http_timeout_secs: u64,
    /// Zero runs once and exits.
    pub poll_interval_secs: u64,
    pub mode: Mode,
    /// Ladder mode only. Empty means the target strike alone.
    pub ladder_strikes: Vec<u64>,
    pub output_format: OutputFormat,
    pub curve_samples: usize,
}

impl AppConfig {
    pub fn from_env() -> EstimationResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EstimationResult<Self> {
        let env_var = |key: &str| {
            lookup(key).ok_or_else(|| EstimationError::Config(format!("missing env var: {key}")))
        };
        let env_var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let coin = env_var_or("COIN", "BTC").to_uppercase();

        let strike = parse_value::<u64>("TARGET_STRIKE", &env_var("TARGET_STRIKE")?)?;
        if strike == 0 {
            return Err(EstimationError::Config("TARGET_STRIKE: must be positive".into()));
        }

        let expiration = parse_expiration(&env_var("TARGET_EXPIRATION")?)
            .map_err(|e| EstimationError::Config(format!("TARGET_EXPIRATION: {e}")))?;

        let discount_rate = parse_value::<f64>(
            "DISCOUNT_RATE",
            &env_var_or("DISCOUNT_RATE", &DEFAULT_DISCOUNT_RATE.to_string()),
        )?;

        let strike_window = parse_value::<f64>(
            "STRIKE_WINDOW",
            &env_var_or("STRIKE_WINDOW", &DEFAULT_STRIKE_WINDOW.to_string()),
        )?;
        if !(strike_window > 0.0 && strike_window < 1.0) {
            return Err(EstimationError::Config(format!(
                "STRIKE_WINDOW: must be in (0, 1), got {strike_window}"
            )));
        }

        let dstrike_divisor = parse_value::<f64>(
            "DSTRIKE_DIVISOR",
            &env_var_or("DSTRIKE_DIVISOR", &DEFAULT_DSTRIKE_DIVISOR.to_string()),
        )?;
        if !(dstrike_divisor.is_finite() && dstrike_divisor > 0.0) {
            return Err(EstimationError::Config(format!(
                "DSTRIKE_DIVISOR: must be positive, got {dstrike_divisor}"
            )));
        }

        let http_timeout_secs =
            parse_value::<u64>("HTTP_TIMEOUT_SECS", &env_var_or("HTTP_TIMEOUT_SECS", "10"))?;
        let poll_interval_secs =
            parse_value::<u64>("POLL_INTERVAL_SECS", &env_var_or("POLL_INTERVAL_SECS", "0"))?;
        let curve_samples = parse_value::<usize>("CURVE_SAMPLES", &env_var_or("CURVE_SAMPLES", "100"))?;

        let mode = env_var_or("MODE", "surface").parse::<Mode>()?;
        let output_format = env_var_or("OUTPUT_FORMAT", "text").parse::<OutputFormat>()?;

        let ladder_strikes = match lookup("LADDER_STRIKES") {
            Some(list) => parse_strike_list(&list)?,
            None => Vec::new(),
        };

        Ok(Self {
            query: TargetQuery::new(coin, strike, expiration),
            pipeline: PipelineConfig {
                discount_rate,
                strike_window,
                dstrike_divisor,
            },
            deribit_base_url: env_var_or("DERIBIT_BASE_URL", "https://www.deribit.com/api/v2"),
            http_timeout_secs,
            poll_interval_secs,
            mode,
            ladder_strikes,
            output_format,
            curve_samples,
        })
    }

    /// Strikes for ladder mode, always including the target strike.
    pub fn ladder(&self) -> Vec<u64> {
        let mut strikes = self.ladder_strikes.clone();
        if !strikes.contains(&self.query.strike) {
            strikes.push(self.query.strike);
        }
        strikes
    }
}

fn parse_value<T>(key: &str, raw: &str) -> EstimationResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| EstimationError::Config(format!("{key}: {e}")))
}

/// Comma-separated positive integers, e.g. `25000,26000,27000`.
fn parse_strike_list(raw: &str) -> EstimationResult<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| match parse_value::<u64>("LADDER_STRIKES", s)? {
            0 => Err(EstimationError::Config("LADDER_STRIKES: strikes must be positive".into())),
            k => Ok(k),
        })
        .collect()
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SSZ`, `YYYY-MM-DD HH:MM` (UTC) and a bare
/// `YYYY-MM-DD`, which is taken at 08:00 UTC.
pub fn parse_expiration(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(DEFAULT_EXPIRATION_HOUR_UTC, 0, 0) {
            return Ok(dt.and_utc());
        }
    }

    Err(format!("unrecognised date/time {raw:?}"))
}
