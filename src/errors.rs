/// Failure modes of one probability query.
/// Every variant is local to the query that raised it. The estimator never returns
/// a partial estimate:
/// - core variants describe inputs the math cannot be run on
/// - boundary variants describe the market-data fetch or startup configuration
#[derive(Debug, thiserror::Error)]
pub enum EstimationError {
    #[error("insufficient data for {stage} curve: {available} usable points, {required} required")]
    InsufficientData {
        stage: CurveStage,
        available: usize,
        required: usize,
    },

    #[error("invalid spot price: {0}")]
    InvalidSpotPrice(f64),

    #[error("degenerate curve: {0}")]
    DegenerateCurve(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("non-finite result: {0}")]
    NonFinite(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("exchange API error: {status} {body}")]
    ExchangeApi { status: u16, body: String },

    #[error("config error: {0}")]
    Config(String),
}

/// Which of the two chained interpolations a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveStage {
    Strike,
    Expiration,
}

impl std::fmt::Display for CurveStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strike => write!(f, "strike"),
            Self::Expiration => write!(f, "expiration"),
        }
    }
}

impl EstimationError {
    /// Errors raised by the data layer that a polling caller may retry.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::ExchangeApi { .. })
    }
}

impl From<reqwest::Error> for EstimationError {
    fn from(e: reqwest::Error) -> Self {
        EstimationError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for EstimationError {
    fn from(e: serde_json::Error) -> Self {
        EstimationError::Parse(e.to_string())
    }
}

pub type EstimationResult<T> = Result<T, EstimationError>;
