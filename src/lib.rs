pub mod chem;
pub mod distribution;
pub mod peaks;
pub mod progress;
pub mod render;
pub mod scorer;
pub mod search;
pub mod text;

pub use crate::distribution::{
    DistributionError, DistributionParams, IsotopeDistributionEngine, DEFAULT_MERGE_DISTANCE,
};
pub use crate::peaks::{AbundancePoint, IsotopeDistribution};
pub use crate::progress::ProgressToken;
pub use crate::render::{ContinuousSpectrum, RenderParams, SpectrumRenderer, SpectrumSample};
pub use crate::scorer::{combined_pick, distance, identify, IdentifyMatch, ScoreType};
pub use crate::search::{CompositionConstraints, CompositionSearch, CountConstraint};
