use crate::errors::{EstimationError, EstimationResult};
use crate::models::{discount_factor, Curve};

/// Default ratio of spot price to call-spread width.
pub const DEFAULT_DSTRIKE_DIVISOR: f64 = 10_000.0;

/// Digital option value from a call-price curve.
///
/// A call spread long `K - dK/2`, short `K + dK/2`, scaled by `1/dK`, pays ~$1 when
/// `S_T >= K`. Its price is a centered finite difference of the call curve:
///
/// D(K) = (C(K - dK/2) - C(K + dK/2)) / dK  ≈  -dC/dK  =  e^(-rT) · P(S_T >= K)
///
/// with `dK = spot / divisor`. D is a present value; the ITM probability is D · e^(rT).
/// No clamping: noisy or extrapolated curves can give values outside [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct DigitalExtractor {
    dstrike_divisor: f64,
}

/// Result of one extraction at one strike.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct DigitalEstimate {
    pub strike: f64,
    pub dstrike: f64,
    /// Present value of $1 paid if ITM.
    pub digital_value: f64,
    /// Undiscounted risk-neutral probability of finishing at or above the strike.
    pub probability: f64,
}

impl DigitalExtractor {
    pub fn new(dstrike_divisor: f64) -> Self {
        Self { dstrike_divisor }
    }

    /// Width of the call spread for a given spot.
    pub fn dstrike(&self, spot: f64) -> EstimationResult<f64> {
        let spot = validate_spot(Some(spot))?;
        let dstrike = spot / self.dstrike_divisor;
        if !dstrike.is_finite() || dstrike <= 0.0 {
            return Err(EstimationError::InvalidQuery(format!(
                "strike increment {dstrike} from divisor {}",
                self.dstrike_divisor
            )));
        }
        Ok(dstrike)
    }

    /// Discounted digital value at `strike`.
    pub fn digital_value(&self, curve: &dyn Curve, strike: f64, spot: f64) -> EstimationResult<f64> {
        let dstrike = self.dstrike(spot)?;
        let half = 0.5 * dstrike;
        let value = (curve.evaluate(strike - half) - curve.evaluate(strike + half)) / dstrike;

        if !value.is_finite() {
            return Err(EstimationError::NonFinite(format!("digital value at strike {strike}")));
        }
        Ok(value)
    }

    /// Digital value and undiscounted probability at `strike`.
    pub fn extract(
        &self,
        curve: &dyn Curve,
        strike: f64,
        spot: f64,
        time_to_expiration: f64,
        discount_rate: f64,
    ) -> EstimationResult<DigitalEstimate> {
        let dstrike = self.dstrike(spot)?;
        let digital_value = self.digital_value(curve, strike, spot)?;
        let probability = digital_value / discount_factor(time_to_expiration, discount_rate);

        Ok(DigitalEstimate {
            strike,
            dstrike,
            digital_value,
            probability,
        })
    }
}

impl Default for DigitalExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_DSTRIKE_DIVISOR)
    }
}

/// Spot price must be present, finite and strictly positive.
/// Zero is how the index endpoint signals an upstream failure.
pub fn validate_spot(spot: Option<f64>) -> EstimationResult<f64> {
    match spot {
        Some(s) if s.is_finite() && s > 0.0 => Ok(s),
        Some(s) => Err(EstimationError::InvalidSpotPrice(s)),
        None => Err(EstimationError::InvalidSpotPrice(0.0)),
    }
}
