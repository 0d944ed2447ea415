use crate::models::discount_factor;

/// YES/NO prices of a $1 binary contract on "S_T >= K".
///
/// price_yes = p · e^(-rT)
/// price_no  = e^(-rT) - price_yes
///
/// Both legs are present values, so they sum to e^(-rT), not 1.
/// Nothing is clamped; see `is_within_bounds`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct BinaryPrice {
    pub yes: f64,
    pub no: f64,
    pub discount_factor: f64,
}

impl BinaryPrice {
    /// Price from an undiscounted ITM probability.
    pub fn from_probability(probability: f64, time_to_expiration: f64, discount_rate: f64) -> Self {
        let df = discount_factor(time_to_expiration, discount_rate);
        Self::from_present_value(probability * df, df)
    }

    /// Price from an already discounted YES value (a digital option value).
    pub fn from_present_value(yes: f64, discount_factor: f64) -> Self {
        Self {
            yes,
            no: discount_factor - yes,
            discount_factor,
        }
    }

    #[inline]
    pub fn yes_within_bounds(&self) -> bool {
        (0.0..=self.discount_factor).contains(&self.yes)
    }

    #[inline]
    pub fn no_within_bounds(&self) -> bool {
        (0.0..=self.discount_factor).contains(&self.no)
    }

    /// Both legs inside [0, e^(-rT)].
    #[inline]
    pub fn is_within_bounds(&self) -> bool {
        self.yes_within_bounds() && self.no_within_bounds()
    }
}
