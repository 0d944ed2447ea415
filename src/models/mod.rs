pub mod quadratic;
pub mod strike_curve;
pub mod digital;
pub mod expiration_curve;
pub mod binary;

use chrono::{DateTime, Utc};

/// Seconds in the 365-day year used for every time-to-expiration.
pub const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// Every fitted curve in the pipeline implements this trait.
/// evaluate() must be a pure function of `x` and must accept any real `x`,
/// continuing the fit outside the sampled range instead of failing.
pub trait Curve: Send + Sync {
    fn evaluate(&self, x: f64) -> f64;

    /// Smallest and largest sampled abscissa.
    fn domain(&self) -> (f64, f64);
}

/// Year fraction from `from` to `to`. Negative when `to` is in the past.
#[inline]
pub fn year_fraction(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_YEAR
}

/// exp(-r·t): present value of $1 paid at `t`.
#[inline]
pub fn discount_factor(time_to_expiration: f64, discount_rate: f64) -> f64 {
    (-discount_rate * time_to_expiration).exp()
}
