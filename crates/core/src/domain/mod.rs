pub mod recommendation;
pub mod signal;

pub use recommendation::{classify, PredictionState, RecommendationRecord};
pub use signal::{Signal, SignalCode};
