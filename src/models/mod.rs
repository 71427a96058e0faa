//! Risk scoring: factor combination and the external model capability

pub mod combiner;
pub mod inference;
pub mod loader;
pub mod scorer;

pub use combiner::{CombinerWeights, RiskFactorCombiner, RiskFactors};
pub use inference::OnnxScorer;
pub use loader::ModelLoader;
pub use scorer::{HeuristicScorer, ResilientScorer, RiskScorer, ScoreOutcome, ScoreSource};
