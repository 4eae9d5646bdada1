// Market data processing modules
pub mod feature_builder;
pub mod history_source;
