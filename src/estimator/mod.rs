pub mod ladder;
pub mod types;

use crate::errors::{EstimationError, EstimationResult};
use crate::feeds::snapshot::MarketSnapshot;
use crate::models::binary::BinaryPrice;
use crate::models::digital::{validate_spot, DigitalExtractor};
use crate::models::expiration_curve::{ExpirationCurve, ProbabilityPoint};
use crate::models::quadratic::MIN_POINTS;
use crate::models::strike_curve::{Quote, StrikeCurve, StrikeWindow};
use crate::models::{discount_factor, year_fraction, Curve};
use chrono::{DateTime, Utc};
use types::*;

/// Probability-estimation pipeline.
///
///   quotes ─filter─▶ strike curve ─digital─▶ P(expiration) ─fit─▶ expiration curve ─▶ P(target)
///
/// Stateless: every call re-derives both curves from the snapshot it is given, and all
/// times are measured from `snapshot.as_of`, so identical inputs give identical output.
#[derive(Debug, Clone, Copy)]
pub struct Estimator {
    config: PipelineConfig,
    digital: DigitalExtractor,
}

impl Estimator {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            digital: DigitalExtractor::new(config.dstrike_divisor),
        }
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Probability at an arbitrary (strike, expiration) via both interpolations.
    ///
    /// Traded expirations with fewer than three quotes in the strike window are
    /// skipped and listed in `skipped`; the time fit then needs three of the rest.
    pub fn estimate(
        &self,
        query: &TargetQuery,
        market: &MarketSnapshot,
    ) -> EstimationResult<ProbabilityEstimate> {
        let spot = validate_spot(market.spot)?;
        let time_to_expiration = query.time_to_expiration(market.as_of)?;
        let strike = query.strike as f64;
        let window = StrikeWindow::around(strike, self.config.strike_window);

        let mut anomalies = Anomalies::new();
        let mut expirations = Vec::new();
        let mut skipped = Vec::new();

        for (expiration, quotes) in market.chains() {
            let t = year_fraction(market.as_of, expiration);
            if t <= 0.0 {
                tracing::debug!(%expiration, "expiration already passed, ignoring");
                continue;
            }

            match self.expiration_detail(quotes, window, strike, spot, expiration, t) {
                Ok(detail) => {
                    check_probability(&mut anomalies, detail.probability, Some(expiration));
                    expirations.push(detail);
                }
                Err(EstimationError::InsufficientData { available, .. }) => {
                    tracing::warn!(
                        %expiration,
                        quotes = available,
                        required = MIN_POINTS,
                        "too few quotes near strike, skipping expiration"
                    );
                    skipped.push(SkippedExpiration {
                        expiration,
                        quotes_in_window: available,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let curve = ExpirationCurve::fit(expirations.iter().map(|d| ProbabilityPoint {
            expiration: d.expiration,
            time_to_expiration: d.time_to_expiration,
            probability: d.probability,
        }))?;

        let (first_t, last_t) = curve.domain();
        if time_to_expiration < first_t || time_to_expiration > last_t {
            tracing::debug!(
                target_t = time_to_expiration,
                first_t,
                last_t,
                "target expiration outside traded range, extrapolating"
            );
        }

        let probability = curve.probability_at(time_to_expiration);
        if !probability.is_finite() {
            return Err(EstimationError::NonFinite(format!(
                "probability at t={time_to_expiration}"
            )));
        }
        check_probability(&mut anomalies, probability, None);

        let prices =
            BinaryPrice::from_probability(probability, time_to_expiration, self.config.discount_rate);
        check_prices(&mut anomalies, &prices);

        tracing::info!(
            coin = %query.coin,
            strike = query.strike,
            expiration = %query.expiration,
            probability,
            yes = prices.yes,
            no = prices.no,
            curve_points = curve.points().len(),
            expirations_skipped = skipped.len(),
            "estimate complete"
        );

        Ok(ProbabilityEstimate {
            query: query.clone(),
            spot,
            as_of: market.as_of,
            time_to_expiration,
            probability,
            prices,
            expirations,
            skipped,
            anomalies,
            curve: Some(curve),
        })
    }

    /// Probability for a target that is itself a traded expiration, read straight
    /// off that expiration's strike curve with no time interpolation.
    pub fn estimate_expiry(
        &self,
        query: &TargetQuery,
        market: &MarketSnapshot,
    ) -> EstimationResult<ProbabilityEstimate> {
        let spot = validate_spot(market.spot)?;
        let time_to_expiration = query.time_to_expiration(market.as_of)?;
        let quotes = market.quotes(query.expiration).ok_or_else(|| {
            EstimationError::InvalidQuery(format!(
                "no {} options expire at {}",
                query.coin, query.expiration
            ))
        })?;

        let strike = query.strike as f64;
        let window = StrikeWindow::around(strike, self.config.strike_window);
        let detail =
            self.expiration_detail(quotes, window, strike, spot, query.expiration, time_to_expiration)?;

        let mut anomalies = Anomalies::new();
        check_probability(&mut anomalies, detail.probability, None);

        let df = discount_factor(time_to_expiration, self.config.discount_rate);
        let prices = BinaryPrice::from_present_value(detail.digital_value, df);
        check_prices(&mut anomalies, &prices);

        tracing::info!(
            coin = %query.coin,
            strike = query.strike,
            expiration = %query.expiration,
            probability = detail.probability,
            quotes = detail.quotes_in_window,
            "single-expiration estimate complete"
        );

        Ok(ProbabilityEstimate {
            query: query.clone(),
            spot,
            as_of: market.as_of,
            time_to_expiration,
            probability: detail.probability,
            prices,
            expirations: vec![detail],
            skipped: Vec::new(),
            anomalies,
            curve: None,
        })
    }

    /// Strike curve + digital extraction for one expiration.
    fn expiration_detail(
        &self,
        quotes: &[Quote],
        window: StrikeWindow,
        strike: f64,
        spot: f64,
        expiration: DateTime<Utc>,
        time_to_expiration: f64,
    ) -> EstimationResult<ExpirationDetail> {
        let curve = StrikeCurve::from_quotes(quotes, window, spot)?;
        let digital = self.digital.extract(
            &curve,
            strike,
            spot,
            time_to_expiration,
            self.config.discount_rate,
        )?;

        Ok(ExpirationDetail {
            expiration,
            time_to_expiration,
            quotes_in_window: curve.len(),
            call_price_at_strike: curve.evaluate(strike),
            digital_value: digital.digital_value,
            probability: digital.probability,
        })
    }
}

impl Default for Estimator {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CurveStage;
    use chrono::{Duration, TimeZone};
    use statrs::distribution::{ContinuousCDF, Normal};

    const RATE: f64 = 0.0525;
    const VOL: f64 = 0.5;

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 9, 1, 8, 0, 0).unwrap()
    }

    fn d1_d2(spot: f64, strike: f64, t: f64) -> (f64, f64) {
        let vol_sqrt_t = VOL * t.sqrt();
        let d1 = ((spot / strike).ln() + (RATE + 0.5 * VOL * VOL) * t) / vol_sqrt_t;
        (d1, d1 - vol_sqrt_t)
    }

    /// Black-Scholes call marks in units of the underlying.
    fn bs_chain(spot: f64, t: f64, strikes: impl Iterator<Item = u64>) -> Vec<Quote> {
        let n = Normal::new(0.0, 1.0).unwrap();
        strikes
            .map(|k| {
                let kf = k as f64;
                let (d1, d2) = d1_d2(spot, kf, t);
                let call = spot * n.cdf(d1) - kf * (-RATE * t).exp() * n.cdf(d2);
                Quote { strike: k, mark_price: call / spot }
            })
            .collect()
    }

    fn bs_probability(spot: f64, strike: f64, t: f64) -> f64 {
        let n = Normal::new(0.0, 1.0).unwrap();
        n.cdf(d1_d2(spot, strike, t).1)
    }

    fn bs_snapshot(spot: f64, days: &[i64]) -> MarketSnapshot {
        let now = as_of();
        MarketSnapshot::from_chains(
            "BTC",
            Some(spot),
            now,
            days.iter().map(|&d| {
                let t = d as f64 / 365.0;
                (now + Duration::days(d), bs_chain(spot, t, (15_000..=40_000).step_by(500)))
            }),
        )
    }

    #[test]
    fn test_recovers_black_scholes_probability() {
        let spot = 26_000.0;
        let market = bs_snapshot(spot, &[7, 14, 30, 60, 90]);
        let query = TargetQuery::new("BTC", 27_000, as_of() + Duration::days(45));

        let est = Estimator::default().estimate(&query, &market).unwrap();
        let want = bs_probability(spot, 27_000.0, 45.0 / 365.0);

        assert!(
            (est.probability - want).abs() < 0.02,
            "estimated {}, Black-Scholes {want}",
            est.probability
        );
        assert_eq!(est.expirations.len(), 5);
        assert!(est.skipped.is_empty());
        assert!(!est.has_anomalies(), "{:?}", est.anomalies);
    }

    #[test]
    fn test_per_expiration_probabilities_match_black_scholes() {
        let spot = 26_000.0;
        let market = bs_snapshot(spot, &[14, 30, 60]);
        let query = TargetQuery::new("BTC", 26_000, as_of() + Duration::days(20));

        let est = Estimator::default().estimate(&query, &market).unwrap();
        for detail in &est.expirations {
            let want = bs_probability(spot, 26_000.0, detail.time_to_expiration);
            assert!(
                (detail.probability - want).abs() < 0.02,
                "at {}: {} vs {want}",
                detail.expiration,
                detail.probability
            );
        }
    }

    #[test]
    fn test_idempotent() {
        let market = bs_snapshot(26_000.0, &[7, 30, 90]);
        let query = TargetQuery::new("BTC", 28_000, as_of() + Duration::days(50));
        let estimator = Estimator::default();

        let a = estimator.estimate(&query, &market).unwrap();
        let b = estimator.estimate(&query, &market).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.probability.to_bits(), b.probability.to_bits());
    }

    #[test]
    fn test_prices_sum_to_discount_factor() {
        let market = bs_snapshot(26_000.0, &[7, 30, 90]);
        let query = TargetQuery::new("BTC", 25_000, as_of() + Duration::days(40));
        let est = Estimator::default().estimate(&query, &market).unwrap();

        let df = (-RATE * est.time_to_expiration).exp();
        assert!((est.prices.yes + est.prices.no - df).abs() <= 2.0 * f64::EPSILON);
    }

    #[test]
    fn test_too_few_quotes_is_insufficient_data() {
        let now = as_of();
        let quotes = vec![
            Quote { strike: 25_000, mark_price: 0.13 },
            Quote { strike: 26_000, mark_price: 0.1 },
        ];
        let market = MarketSnapshot::from_chains(
            "BTC",
            Some(26_500.0),
            now,
            vec![
                (now + Duration::days(7), quotes.clone()),
                (now + Duration::days(14), quotes.clone()),
                (now + Duration::days(30), quotes),
            ],
        );
        let query = TargetQuery::new("BTC", 26_000, now + Duration::days(10));

        let err = Estimator::default().estimate(&query, &market).unwrap_err();
        assert!(matches!(err, EstimationError::InsufficientData { available: 0, .. }), "got {err}");

        let query = TargetQuery::new("BTC", 26_000, now + Duration::days(7));
        let err = Estimator::default().estimate_expiry(&query, &market).unwrap_err();
        assert!(matches!(
            err,
            EstimationError::InsufficientData { stage: CurveStage::Strike, available: 2, .. }
        ));
    }

    #[test]
    fn test_sparse_expiration_skipped() {
        let spot = 26_000.0;
        let mut market = bs_snapshot(spot, &[7, 30, 60, 90]);
        let lonely = as_of() + Duration::days(3);
        market.add_quote(lonely, Quote { strike: 26_000, mark_price: 0.02 });

        let query = TargetQuery::new("BTC", 26_000, as_of() + Duration::days(20));
        let est = Estimator::default().estimate(&query, &market).unwrap();
        assert_eq!(est.expirations.len(), 4);
        assert_eq!(est.skipped, vec![SkippedExpiration { expiration: lonely, quotes_in_window: 1 }]);
    }

    #[test]
    fn test_zero_spot_rejected() {
        let mut market = bs_snapshot(26_000.0, &[7, 30, 90]);
        market.spot = Some(0.0);
        let query = TargetQuery::new("BTC", 26_000, as_of() + Duration::days(20));
        let err = Estimator::default().estimate(&query, &market).unwrap_err();
        assert!(matches!(err, EstimationError::InvalidSpotPrice(s) if s == 0.0));

        market.spot = None;
        let err = Estimator::default().estimate_expiry(&query, &market).unwrap_err();
        assert!(matches!(err, EstimationError::InvalidSpotPrice(_)));
    }

    #[test]
    fn test_expired_chains_ignored() {
        let spot = 26_000.0;
        let mut market = bs_snapshot(spot, &[7, 30, 90]);
        let stale = as_of() - Duration::days(1);
        for q in bs_chain(spot, 0.01, (20_000..=30_000).step_by(1_000)) {
            market.add_quote(stale, q);
        }
        let query = TargetQuery::new("BTC", 26_000, as_of() + Duration::days(20));
        let est = Estimator::default().estimate(&query, &market).unwrap();
        assert!(est.expirations.iter().all(|d| d.expiration > as_of()));
        assert!(est.skipped.is_empty());
    }

    #[test]
    fn test_single_expiration_matches_strike_stage() {
        let spot = 26_000.0;
        let market = bs_snapshot(spot, &[7, 30, 90]);
        let exp = as_of() + Duration::days(30);
        let query = TargetQuery::new("BTC", 27_000, exp);
        let estimator = Estimator::default();

        let direct = estimator.estimate_expiry(&query, &market).unwrap();
        let want = bs_probability(spot, 27_000.0, 30.0 / 365.0);
        assert!((direct.probability - want).abs() < 0.02, "{} vs {want}", direct.probability);
        assert!(direct.curve.is_none());
        assert!((direct.prices.yes - direct.expirations[0].digital_value).abs() < 1e-15);

        let interpolated = estimator.estimate(&query, &market).unwrap();
        assert!((interpolated.probability - direct.probability).abs() < 1e-9);

        let untraded = TargetQuery::new("BTC", 27_000, exp + Duration::hours(1));
        assert!(matches!(
            estimator.estimate_expiry(&untraded, &market),
            Err(EstimationError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_noisy_chain_flags_out_of_range() {
        let now = as_of();
        // Price rising with strike: the digital comes out negative.
        let inverted: Vec<Quote> = (0..5)
            .map(|i| Quote { strike: 24_000 + 1_000 * i, mark_price: 0.05 + 0.01 * i as f64 })
            .collect();
        let market = MarketSnapshot::from_chains("BTC", Some(26_000.0), now, vec![(now + Duration::days(7), inverted)]);
        let query = TargetQuery::new("BTC", 26_000, now + Duration::days(7));

        let est = Estimator::default().estimate_expiry(&query, &market).unwrap();
        assert!(est.probability < 0.0);
        assert!(est.anomalies.iter().any(|a| matches!(a, Anomaly::ProbabilityOutOfRange { .. })));
        assert!(est.anomalies.iter().any(|a| matches!(a, Anomaly::YesPriceOutOfRange { .. })));
        assert!(est.anomalies.iter().any(|a| matches!(a, Anomaly::NoPriceOutOfRange { .. })));
    }
}
