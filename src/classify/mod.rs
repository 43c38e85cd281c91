//! False-positive classification of candidate regions.
//!
//! The fitted model is loaded once per process and is read-only for every
//! run. Training never happens on the per-image path.

mod features;
mod filter;
mod model;

pub use features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
pub use filter::{
    ClassificationResult, FalsePositiveFilter, ModelPolicy, ModelStatus, ProbabilitySource,
    DEFAULT_DECISION_THRESHOLD,
};
pub use model::{
    synthetic_training_set, train_baseline, LogisticModel, ModelArtifact, TrainingParams,
    BASELINE_SEED, MODEL_FORMAT_VERSION,
};
