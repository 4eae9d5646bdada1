pub mod artifacts;
pub mod cache;
pub mod market_data;
pub mod observability;
