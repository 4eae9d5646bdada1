pub mod architecture;
pub mod explanation;
pub mod feature_registry;
pub mod forecast;
pub mod scaler;

pub use architecture::{Architecture, ArtifactFile, ArtifactKey};
pub use explanation::{ExplainPrecision, Explanation, FeatureAttribution};
pub use forecast::{ForecastReport, Horizon, HorizonForecast};
pub use scaler::MinMaxScaler;
