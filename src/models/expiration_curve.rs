use crate::errors::{CurveStage, EstimationResult};
use crate::models::quadratic::QuadraticSpline;
use crate::models::Curve;
use chrono::{DateTime, Utc};
use std::collections::btree_map::{BTreeMap, Entry};

/// Share of the sampled time range appended past the last expiration when sampling.
const SAMPLE_OVERHANG: f64 = 0.2;

/// ITM probability at one traded expiration.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ProbabilityPoint {
    pub expiration: DateTime<Utc>,
    /// Years from the snapshot time to `expiration`.
    pub time_to_expiration: f64,
    pub probability: f64,
}

/// Probability as a function of time to expiration, one knot per traded expiration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpirationCurve {
    points: Vec<ProbabilityPoint>,
    spline: QuadraticSpline,
}

impl ExpirationCurve {
    /// Fit through the given points. Points sharing an expiration are collapsed to
    /// the first one seen; at least three distinct expirations are required.
    pub fn fit(points: impl IntoIterator<Item = ProbabilityPoint>) -> EstimationResult<Self> {
        let mut by_expiration: BTreeMap<DateTime<Utc>, ProbabilityPoint> = BTreeMap::new();

        for point in points {
            match by_expiration.entry(point.expiration) {
                Entry::Vacant(slot) => {
                    slot.insert(point);
                }
                Entry::Occupied(_) => {
                    tracing::debug!(expiration = %point.expiration, "duplicate expiration dropped");
                }
            }
        }

        let points: Vec<ProbabilityPoint> = by_expiration.into_values().collect();
        let times: Vec<f64> = points.iter().map(|p| p.time_to_expiration).collect();
        let probs: Vec<f64> = points.iter().map(|p| p.probability).collect();

        let spline = QuadraticSpline::fit(&times, &probs, CurveStage::Expiration)?;

        Ok(Self { points, spline })
    }

    /// Interpolated (or extrapolated) probability at `time_to_expiration` years.
    #[inline]
    pub fn probability_at(&self, time_to_expiration: f64) -> f64 {
        self.spline.evaluate(time_to_expiration)
    }

    /// Distinct points the curve was fitted on, ordered by expiration.
    pub fn points(&self) -> &[ProbabilityPoint] {
        &self.points
    }

    /// `n` evenly spaced `(t, p)` pairs from t = 0 to 20% past the last expiration.
    pub fn samples(&self, n: usize) -> Vec<(f64, f64)> {
        let (min_t, max_t) = self.spline.domain();
        let end = max_t + (max_t - min_t) * SAMPLE_OVERHANG;

        match n {
            0 => Vec::new(),
            1 => vec![(0.0, self.probability_at(0.0))],
            _ => {
                let step = end / (n - 1) as f64;
                (0..n)
                    .map(|i| {
                        let t = step * i as f64;
                        (t, self.probability_at(t))
                    })
                    .collect()
            }
        }
    }
}

impl Curve for ExpirationCurve {
    #[inline]
    fn evaluate(&self, time_to_expiration: f64) -> f64 {
        self.probability_at(time_to_expiration)
    }

    fn domain(&self) -> (f64, f64) {
        self.spline.domain()
    }
}
