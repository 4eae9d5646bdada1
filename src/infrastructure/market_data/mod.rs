pub mod csv_provider;
pub mod mock;

pub use csv_provider::CsvMarketDataProvider;
pub use mock::MockMarketDataProvider;
