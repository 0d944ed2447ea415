use super::types::{check_prices, check_probability, Anomalies};
use super::Estimator;
use crate::errors::{EstimationError, EstimationResult};
use crate::feeds::snapshot::MarketSnapshot;
use crate::models::binary::BinaryPrice;
use crate::models::digital::validate_spot;
use crate::models::strike_curve::{StrikeCurve, StrikeWindow};
use crate::models::{discount_factor, year_fraction, Curve};
use chrono::{DateTime, Utc};

/// ITM probability at one strike of a ladder.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct LadderRung {
    pub strike: u64,
    pub call_price: f64,
    pub probability: f64,
    pub prices: BinaryPrice,
}

/// P(lower <= S_T < upper), the difference of two rung probabilities.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct RangeProbability {
    pub lower: u64,
    pub upper: u64,
    pub probability: f64,
}

/// Probabilities for several strikes of one traded expiration, all read off a
/// single strike curve.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct StrikeLadder {
    pub coin: String,
    pub expiration: DateTime<Utc>,
    pub spot: f64,
    pub as_of: DateTime<Utc>,
    pub time_to_expiration: f64,
    pub quotes_in_window: usize,
    /// Ascending by strike.
    pub rungs: Vec<LadderRung>,
    /// Every pair of rungs, lower strike first.
    pub ranges: Vec<RangeProbability>,
    pub anomalies: Anomalies,
}

impl Estimator {
    /// Probabilities at every strike in `strikes` for the traded `expiration`.
    ///
    /// The strike curve is fitted on the window covering the whole ladder, so every
    /// rung shares the same quotes. Duplicate strikes are collapsed.
    pub fn ladder(
        &self,
        market: &MarketSnapshot,
        expiration: DateTime<Utc>,
        strikes: &[u64],
    ) -> EstimationResult<StrikeLadder> {
        let spot = validate_spot(market.spot)?;

        let mut strikes = strikes.to_vec();
        strikes.sort_unstable();
        strikes.dedup();

        if strikes.first() == Some(&0) {
            return Err(EstimationError::InvalidQuery("ladder strikes must be positive".into()));
        }
        let window = StrikeWindow::covering(&strikes, self.config.strike_window)
            .ok_or_else(|| EstimationError::InvalidQuery("empty strike ladder".into()))?;

        let time_to_expiration = year_fraction(market.as_of, expiration);
        if time_to_expiration <= 0.0 {
            return Err(EstimationError::InvalidQuery(format!(
                "expiration {expiration} is not after {}",
                market.as_of
            )));
        }

        let quotes = market.quotes(expiration).ok_or_else(|| {
            EstimationError::InvalidQuery(format!("no {} options expire at {expiration}", market.coin))
        })?;
        let curve = StrikeCurve::from_quotes(quotes, window, spot)?;
        let df = discount_factor(time_to_expiration, self.config.discount_rate);

        let mut anomalies = Anomalies::new();
        let mut rungs = Vec::with_capacity(strikes.len());

        for &strike in &strikes {
            let k = strike as f64;
            let digital = self.digital.extract(
                &curve,
                k,
                spot,
                time_to_expiration,
                self.config.discount_rate,
            )?;
            let prices = BinaryPrice::from_present_value(digital.digital_value, df);

            check_probability(&mut anomalies, digital.probability, Some(expiration));
            check_prices(&mut anomalies, &prices);

            rungs.push(LadderRung {
                strike,
                call_price: curve.evaluate(k),
                probability: digital.probability,
                prices,
            });
        }

        let ranges = range_probabilities(&rungs);

        tracing::info!(
            coin = %market.coin,
            %expiration,
            rungs = rungs.len(),
            quotes = curve.len(),
            "strike ladder complete"
        );

        Ok(StrikeLadder {
            coin: market.coin.clone(),
            expiration,
            spot,
            as_of: market.as_of,
            time_to_expiration,
            quotes_in_window: curve.len(),
            rungs,
            ranges,
            anomalies,
        })
    }
}

/// All pairwise `p_i - p_j` for `i < j` on rungs sorted by strike.
fn range_probabilities(rungs: &[LadderRung]) -> Vec<RangeProbability> {
    let mut ranges = Vec::with_capacity(rungs.len() * rungs.len().saturating_sub(1) / 2);
    for (i, low) in rungs.iter().enumerate() {
        for high in &rungs[i + 1..] {
            ranges.push(RangeProbability {
                lower: low.strike,
                upper: high.strike,
                probability: low.probability - high.probability,
            });
        }
    }
    ranges
}
