use serde::{Deserialize, Serialize};
use std::path::Path;

use super::features::FeatureVector;
use super::model::LogisticModel;
use crate::detect::CandidateRegion;
use crate::error::{CoreError, CoreResult, ModelError};
use crate::CandidateId;

pub const DEFAULT_DECISION_THRESHOLD: f64 = 0.5;

/// What to do with candidates when the classifier artifact is unusable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelPolicy {
    /// Keep every candidate (probability 1).
    #[default]
    FailOpen,
    /// Discard every candidate (probability 0).
    FailClosed,
}

impl ModelPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_open" | "open" => Some(ModelPolicy::FailOpen),
            "fail_closed" | "closed" => Some(ModelPolicy::FailClosed),
            _ => None,
        }
    }

    fn probability(&self) -> f64 {
        match self {
            ModelPolicy::FailOpen => 1.0,
            ModelPolicy::FailClosed => 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "policy", rename_all = "snake_case")]
pub enum ProbabilitySource {
    Model,
    Policy(ModelPolicy),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub candidate_id: CandidateId,
    /// In [0, 1].
    pub probability: f64,
    pub keep: bool,
    pub features: FeatureVector,
    pub source: ProbabilitySource,
}

/// Classifier state for a run, as recorded in run metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    Loaded { fingerprint: String, samples: usize },
    Unavailable { policy: ModelPolicy, error: ModelError },
}

/// False-positive filter: a fitted model (or a recorded failure) plus the
/// decision threshold and the policy applied when the model is unavailable.
#[derive(Clone, Debug)]
pub struct FalsePositiveFilter {
    model: Result<LogisticModel, ModelError>,
    policy: ModelPolicy,
    threshold: f64,
    status: ModelStatus,
}

impl FalsePositiveFilter {
    pub fn new(
        model: Result<LogisticModel, ModelError>,
        policy: ModelPolicy,
        threshold: f64,
    ) -> CoreResult<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(CoreError::config(format!(
                "classifier decision_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        let status = match &model {
            Ok(m) => ModelStatus::Loaded {
                fingerprint: m.fingerprint(),
                samples: m.samples(),
            },
            Err(e) => {
                log::warn!("{}; applying {:?}", CoreError::model(e.clone()), policy);
                ModelStatus::Unavailable {
                    policy,
                    error: e.clone(),
                }
            }
        };
        Ok(Self {
            model,
            policy,
            threshold,
            status,
        })
    }

    /// Load the artifact at `path`; failures are resolved by `policy`.
    pub fn from_path(path: &Path, policy: ModelPolicy, threshold: f64) -> CoreResult<Self> {
        Self::new(LogisticModel::load(path), policy, threshold)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn policy(&self) -> ModelPolicy {
        self.policy
    }

    pub fn status(&self) -> &ModelStatus {
        &self.status
    }

    /// The artifact failure the policy is standing in for, if any.
    pub fn model_error(&self) -> Option<CoreError> {
        self.model.as_ref().err().cloned().map(CoreError::model)
    }

    pub fn classify(&self, candidate: &CandidateRegion) -> ClassificationResult {
        let features = FeatureVector::from_candidate(candidate);
        let (probability, source) = match &self.model {
            Ok(model) => (model.predict(&features), ProbabilitySource::Model),
            Err(_) => (
                self.policy.probability(),
                ProbabilitySource::Policy(self.policy),
            ),
        };
        ClassificationResult {
            candidate_id: candidate.id,
            probability,
            keep: probability >= self.threshold,
            features,
            source,
        }
    }
}
