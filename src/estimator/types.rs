use crate::errors::{EstimationError, EstimationResult};
use crate::models::binary::BinaryPrice;
use crate::models::digital::DEFAULT_DSTRIKE_DIVISOR;
use crate::models::expiration_curve::ExpirationCurve;
use crate::models::strike_curve::DEFAULT_STRIKE_WINDOW;
use crate::models::year_fraction;
use chrono::{DateTime, Utc};
use smallvec::SmallVec;

/// Default annual risk-free rate used for discounting.
pub const DEFAULT_DISCOUNT_RATE: f64 = 0.0525;

// ── Inputs ──

/// The caller's question: P(coin >= strike at expiration)?
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TargetQuery {
    pub coin: String,
    pub strike: u64,
    pub expiration: DateTime<Utc>,
}

impl TargetQuery {
    pub fn new(coin: impl Into<String>, strike: u64, expiration: DateTime<Utc>) -> Self {
        Self {
            coin: coin.into(),
            strike,
            expiration,
        }
    }

    /// Years from `as_of` to the target expiration. Fails unless it lies in the future
    /// and the strike is positive.
    pub fn time_to_expiration(&self, as_of: DateTime<Utc>) -> EstimationResult<f64> {
        if self.strike == 0 {
            return Err(EstimationError::InvalidQuery("strike must be positive".into()));
        }
        let t = year_fraction(as_of, self.expiration);
        if t <= 0.0 {
            return Err(EstimationError::InvalidQuery(format!(
                "expiration {} is not after {as_of}",
                self.expiration
            )));
        }
        Ok(t)
    }
}

/// Numerical parameters of the pipeline. Passed explicitly, never global.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PipelineConfig {
    pub discount_rate: f64,
    /// Half-width of the strike window as a fraction of the target strike.
    pub strike_window: f64,
    /// Call-spread width is spot / dstrike_divisor.
    pub dstrike_divisor: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            discount_rate: DEFAULT_DISCOUNT_RATE,
            strike_window: DEFAULT_STRIKE_WINDOW,
            dstrike_divisor: DEFAULT_DSTRIKE_DIVISOR,
        }
    }
}

// ── Outputs ──

/// How the strike curve of one traded expiration contributed to an estimate.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ExpirationDetail {
    pub expiration: DateTime<Utc>,
    pub time_to_expiration: f64,
    pub quotes_in_window: usize,
    /// Interpolated dollar call price at the target strike.
    pub call_price_at_strike: f64,
    pub digital_value: f64,
    pub probability: f64,
}

/// A traded expiration left out for lack of quotes near the strike.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SkippedExpiration {
    pub expiration: DateTime<Utc>,
    pub quotes_in_window: usize,
}

/// Warning-level label for a result outside its meaningful range.
/// Values are reported unclamped alongside these labels.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// A probability outside [0, 1]. `expiration` is None for the final estimate.
    ProbabilityOutOfRange {
        expiration: Option<DateTime<Utc>>,
        value: f64,
    },
    YesPriceOutOfRange { value: f64, upper: f64 },
    NoPriceOutOfRange { value: f64, upper: f64 },
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProbabilityOutOfRange { expiration: Some(exp), value } => {
                write!(f, "probability {value:.4} at {exp} outside [0, 1]")
            }
            Self::ProbabilityOutOfRange { expiration: None, value } => {
                write!(f, "probability {value:.4} outside [0, 1]")
            }
            Self::YesPriceOutOfRange { value, upper } => {
                write!(f, "YES price {value:.4} outside [0, {upper:.4}]")
            }
            Self::NoPriceOutOfRange { value, upper } => {
                write!(f, "NO price {value:.4} outside [0, {upper:.4}]")
            }
        }
    }
}

pub type Anomalies = SmallVec<[Anomaly; 4]>;

/// Label `probability` if it is outside [0, 1].
pub fn check_probability(
    anomalies: &mut Anomalies,
    probability: f64,
    expiration: Option<DateTime<Utc>>,
) {
    if !(0.0..=1.0).contains(&probability) {
        let anomaly = Anomaly::ProbabilityOutOfRange {
            expiration,
            value: probability,
        };
        tracing::warn!(%anomaly, "out-of-range result");
        anomalies.push(anomaly);
    }
}

/// Label either leg of `prices` that falls outside [0, e^(-rT)].
pub fn check_prices(anomalies: &mut Anomalies, prices: &BinaryPrice) {
    if prices.is_within_bounds() {
        return;
    }
    if !prices.yes_within_bounds() {
        let anomaly = Anomaly::YesPriceOutOfRange {
            value: prices.yes,
            upper: prices.discount_factor,
        };
        tracing::warn!(%anomaly, "out-of-range result");
        anomalies.push(anomaly);
    }
    if !prices.no_within_bounds() {
        let anomaly = Anomaly::NoPriceOutOfRange {
            value: prices.no,
            upper: prices.discount_factor,
        };
        tracing::warn!(%anomaly, "out-of-range result");
        anomalies.push(anomaly);
    }
}

/// Answer to a `TargetQuery`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ProbabilityEstimate {
    pub query: TargetQuery,
    pub spot: f64,
    pub as_of: DateTime<Utc>,
    pub time_to_expiration: f64,
    /// Undiscounted risk-neutral probability of finishing at or above the strike.
    pub probability: f64,
    pub prices: BinaryPrice,
    pub expirations: Vec<ExpirationDetail>,
    pub skipped: Vec<SkippedExpiration>,
    pub anomalies: Anomalies,
    /// Fitted time curve; None when the target was a traded expiration.
    #[serde(skip)]
    pub curve: Option<ExpirationCurve>,
}

impl ProbabilityEstimate {
    #[inline]
    pub fn has_anomalies(&self) -> bool {
        !self.anomalies.is_empty()
    }
}
