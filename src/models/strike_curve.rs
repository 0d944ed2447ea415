use crate::errors::{CurveStage, EstimationError, EstimationResult};
use crate::models::quadratic::QuadraticSpline;
use crate::models::Curve;
use std::collections::btree_map::{BTreeMap, Entry};

/// Default half-width of the strike window: quotes within ±30% of the target strike.
pub const DEFAULT_STRIKE_WINDOW: f64 = 0.3;

/// One call quote for a single expiration, as published by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Quote {
    pub strike: u64,
    /// Mark price in units of the underlying (multiply by spot for dollars).
    pub mark_price: f64,
}

/// Inclusive strike range used to select quotes.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct StrikeWindow {
    pub lower: f64,
    pub upper: f64,
}

impl StrikeWindow {
    /// `[K·(1 - width), K·(1 + width)]`.
    pub fn around(strike: f64, width: f64) -> Self {
        Self {
            lower: strike * (1.0 - width),
            upper: strike * (1.0 + width),
        }
    }

    /// Smallest window that is at least `around(k, width)` for every strike given.
    /// Returns None for an empty strike list.
    pub fn covering(strikes: &[u64], width: f64) -> Option<Self> {
        let lo = strikes.iter().min()?;
        let hi = strikes.iter().max()?;
        Some(Self {
            lower: *lo as f64 * (1.0 - width),
            upper: *hi as f64 * (1.0 + width),
        })
    }

    #[inline]
    pub fn contains(&self, strike: f64) -> bool {
        self.lower <= strike && strike <= self.upper
    }
}

/// Keep the quotes inside `window` and convert them to dollar prices.
///
/// Output is sorted by strike with one entry per strike (first quote wins).
/// Quotes with a negative or non-finite mark are dropped.
pub fn filter_quotes(quotes: &[Quote], window: StrikeWindow, spot: f64) -> Vec<(f64, f64)> {
    let mut by_strike: BTreeMap<u64, f64> = BTreeMap::new();

    for q in quotes {
        if !q.mark_price.is_finite() || q.mark_price < 0.0 {
            tracing::debug!(strike = q.strike, mark = q.mark_price, "dropping unusable quote");
            continue;
        }
        if q.strike == 0 || !window.contains(q.strike as f64) {
            continue;
        }
        match by_strike.entry(q.strike) {
            Entry::Vacant(slot) => {
                slot.insert(q.mark_price * spot);
            }
            Entry::Occupied(_) => {
                tracing::debug!(strike = q.strike, "duplicate strike in chain, keeping first quote");
            }
        }
    }

    by_strike
        .into_iter()
        .map(|(strike, dollars)| (strike as f64, dollars))
        .collect()
}

/// Dollar call price as a function of strike for one expiration.
#[derive(Debug, Clone, PartialEq)]
pub struct StrikeCurve {
    strikes: Vec<f64>,
    spline: QuadraticSpline,
}

impl StrikeCurve {
    /// Filter `quotes` to `window`, price them in dollars and fit the curve.
    ///
    /// Fails with `InsufficientData` when fewer than three strikes survive the filter;
    /// no fit is attempted in that case.
    pub fn from_quotes(quotes: &[Quote], window: StrikeWindow, spot: f64) -> EstimationResult<Self> {
        if !spot.is_finite() || spot <= 0.0 {
            return Err(EstimationError::InvalidSpotPrice(spot));
        }

        let (strikes, prices): (Vec<f64>, Vec<f64>) =
            filter_quotes(quotes, window, spot).into_iter().unzip();

        let spline = QuadraticSpline::fit(&strikes, &prices, CurveStage::Strike)?;

        Ok(Self { strikes, spline })
    }

    /// Number of quotes the curve was fitted on.
    #[inline]
    pub fn len(&self) -> usize {
        self.strikes.len()
    }
}

impl Curve for StrikeCurve {
    #[inline]
    fn evaluate(&self, strike: f64) -> f64 {
        self.spline.evaluate(strike)
    }

    fn domain(&self) -> (f64, f64) {
        self.spline.domain()
    }
}
