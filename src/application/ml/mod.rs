pub mod layers;
pub mod networks;
pub mod predictor;
pub mod registry;
pub mod weights;
