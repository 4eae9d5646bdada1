pub mod types;

pub use types::{Candle, Quote};
