/// Ordered list of feature names.
/// This order MUST match the column order the models were trained on and the
/// order stored in every scaler artifact. Any change here is a breaking change
/// for trained artifacts.
pub const FEATURE_NAMES: &[&str] = &["Close", "MA_20", "MA_50", "Volatility"];

/// Number of input features per timestep.
pub const FEATURE_COUNT: usize = 4;

/// Number of timesteps in one model input window.
pub const SEQUENCE_LENGTH: usize = 120;

/// Moving-average periods.
pub const SHORT_MA_PERIOD: usize = 20;
pub const LONG_MA_PERIOD: usize = 50;

/// Rolling standard deviation period for the volatility feature.
pub const VOLATILITY_PERIOD: usize = 20;

/// Rows consumed before every rolling statistic is defined.
pub const WARMUP_ROWS: usize = LONG_MA_PERIOD - 1;

/// Column index of the close price; predictions are read back from this slot.
pub const CLOSE_INDEX: usize = 0;

/// Feature columns, in training order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Close,
    ShortMovingAverage,
    LongMovingAverage,
    Volatility,
}

impl Feature {
    pub const ALL: [Feature; FEATURE_COUNT] = [
        Feature::Close,
        Feature::ShortMovingAverage,
        Feature::LongMovingAverage,
        Feature::Volatility,
    ];

    pub fn index(&self) -> usize {
        match self {
            Feature::Close => 0,
            Feature::ShortMovingAverage => 1,
            Feature::LongMovingAverage => 2,
            Feature::Volatility => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        FEATURE_NAMES[self.index()]
    }
}

/// Checks a scaler's stored feature names against the training order.
pub fn matches_training_order(names: &[String]) -> bool {
    names.len() == FEATURE_NAMES.len()
        && names
            .iter()
            .zip(FEATURE_NAMES.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}
