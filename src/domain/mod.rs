// Market data domain
pub mod market;

// Models, features and forecast types
pub mod ml;

// Port interfaces
pub mod ports;

// Input integrity checks
pub mod validation;

// Domain-specific error types
pub mod errors;
