//! Standardized logistic model and its on-disk artifact.
//!
//! The artifact is plain JSON: format version, ordered feature names, scaler
//! statistics and weights. Anything that does not match the compiled feature
//! schema is rejected as incompatible rather than coerced.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use super::features::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
use crate::error::ModelError;

pub const MODEL_FORMAT_VERSION: u32 = 1;
pub const BASELINE_SEED: u64 = 42;
const BASELINE_SAMPLES: usize = 400;

/// Gradient-descent parameters.
#[derive(Clone, Debug)]
pub struct TrainingParams {
    pub learning_rate: f64,
    pub iterations: usize,
    /// Strength of the L2 penalty, per sample.
    pub l2: f64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            iterations: 1000,
            l2: 1.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub features: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub samples: usize,
}

/// Fitted classifier. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct LogisticModel {
    mean: [f64; FEATURE_COUNT],
    scale: [f64; FEATURE_COUNT],
    weights: [f64; FEATURE_COUNT],
    bias: f64,
    samples: usize,
}

impl LogisticModel {
    /// Fit on labelled rows (`true` = genuine encroachment).
    pub fn train(
        rows: &[FeatureVector],
        labels: &[bool],
        params: &TrainingParams,
    ) -> std::result::Result<Self, ModelError> {
        if rows.is_empty() {
            return Err(ModelError::Training {
                reason: "no training rows".to_string(),
            });
        }
        if rows.len() != labels.len() {
            return Err(ModelError::Training {
                reason: format!("{} rows but {} labels", rows.len(), labels.len()),
            });
        }
        if rows
            .iter()
            .any(|r| r.as_array().iter().any(|v| !v.is_finite()))
        {
            return Err(ModelError::Training {
                reason: "non-finite feature value".to_string(),
            });
        }

        let n = rows.len() as f64;
        let mut mean = [0.0; FEATURE_COUNT];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row.as_array()) {
                *m += v / n;
            }
        }
        let mut scale = [0.0; FEATURE_COUNT];
        for row in rows {
            for ((s, m), v) in scale.iter_mut().zip(mean).zip(row.as_array()) {
                *s += (v - m) * (v - m) / n;
            }
        }
        for s in scale.iter_mut() {
            *s = s.sqrt();
            if *s < f64::EPSILON {
                *s = 1.0;
            }
        }

        let standardized: Vec<[f64; FEATURE_COUNT]> = rows
            .iter()
            .map(|r| standardize(&r.as_array(), &mean, &scale))
            .collect();

        let mut weights = [0.0; FEATURE_COUNT];
        let mut bias = 0.0;
        let penalty = params.l2 / n;
        for _ in 0..params.iterations {
            let mut grad_w = [0.0; FEATURE_COUNT];
            let mut grad_b = 0.0;
            for (x, &label) in standardized.iter().zip(labels) {
                let err = sigmoid(dot(&weights, x) + bias) - if label { 1.0 } else { 0.0 };
                for (g, xi) in grad_w.iter_mut().zip(x) {
                    *g += err * xi;
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(grad_w) {
                *w -= params.learning_rate * (g / n + penalty * *w);
            }
            bias -= params.learning_rate * grad_b / n;
        }

        Ok(Self {
            mean,
            scale,
            weights,
            bias,
            samples: rows.len(),
        })
    }

    /// Probability that the features describe a genuine encroachment.
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        let x = standardize(&features.as_array(), &self.mean, &self.scale);
        let p = sigmoid(dot(&self.weights, &x) + self.bias);
        if p.is_nan() {
            0.0
        } else {
            p.clamp(0.0, 1.0)
        }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn to_artifact(&self) -> ModelArtifact {
        ModelArtifact {
            format_version: MODEL_FORMAT_VERSION,
            features: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            mean: self.mean.to_vec(),
            scale: self.scale.to_vec(),
            weights: self.weights.to_vec(),
            bias: self.bias,
            samples: self.samples,
        }
    }

    pub fn from_artifact(artifact: ModelArtifact) -> std::result::Result<Self, ModelError> {
        if artifact.format_version != MODEL_FORMAT_VERSION {
            return Err(ModelError::Incompatible {
                reason: format!(
                    "format_version {} (expected {})",
                    artifact.format_version, MODEL_FORMAT_VERSION
                ),
            });
        }
        if artifact.features != FEATURE_NAMES {
            return Err(ModelError::Incompatible {
                reason: format!(
                    "feature schema {:?} (expected {:?})",
                    artifact.features, FEATURE_NAMES
                ),
            });
        }
        let mean = fixed(&artifact.mean, "mean")?;
        let scale = fixed(&artifact.scale, "scale")?;
        let weights = fixed(&artifact.weights, "weights")?;
        if scale.iter().any(|s| *s <= 0.0) {
            return Err(ModelError::Incompatible {
                reason: "scale entries must be positive".to_string(),
            });
        }
        if !artifact.bias.is_finite() {
            return Err(ModelError::Incompatible {
                reason: "bias is not finite".to_string(),
            });
        }
        Ok(Self {
            mean,
            scale,
            weights,
            bias: artifact.bias,
            samples: artifact.samples,
        })
    }

    /// Load a model artifact from disk.
    pub fn load(path: &Path) -> std::result::Result<Self, ModelError> {
        if !path.exists() {
            return Err(ModelError::Missing {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ModelError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let artifact: ModelArtifact =
            serde_json::from_str(&raw).map_err(|e| ModelError::Incompatible {
                reason: format!("{}: {}", path.display(), e),
            })?;
        let model = Self::from_artifact(artifact)?;
        log::info!("loaded classifier model from {}", path.display());
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("failed to create {}: {}", parent.display(), e))?;
            }
        }
        let json = serde_json::to_string_pretty(&self.to_artifact())?;
        std::fs::write(path, json)
            .map_err(|e| anyhow!("failed to write model {}: {}", path.display(), e))?;
        log::info!("saved classifier model to {}", path.display());
        Ok(())
    }

    /// SHA-256 over the serialized artifact, hex encoded.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(&self.to_artifact()).unwrap_or_default();
        hex::encode(Sha256::digest(bytes))
    }
}

/// Seeded synthetic rows: larger, stronger, less elongated changes are genuine.
pub fn synthetic_training_set(seed: u64, n: usize) -> (Vec<FeatureVector>, Vec<bool>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(n);
    let mut labels = Vec::with_capacity(n);
    for _ in 0..n {
        let area = rng.gen_range(50..5000) as f64;
        let magnitude = rng.gen_range(0.0..255.0);
        let aspect_ratio = rng.gen_range(1.0..8.0);
        let logit = 0.001 * (area - 500.0) + 0.02 * (magnitude - 30.0)
            - 0.25 * (aspect_ratio - 1.0)
            + 0.5 * gaussian(&mut rng);
        rows.push(FeatureVector {
            area_pixels: area,
            magnitude,
            aspect_ratio,
        });
        labels.push(logit > 0.0);
    }
    (rows, labels)
}

/// Fit the baseline model on the seeded synthetic set.
pub fn train_baseline(seed: u64) -> std::result::Result<LogisticModel, ModelError> {
    let (rows, labels) = synthetic_training_set(seed, BASELINE_SAMPLES);
    let positives = labels.iter().filter(|&&l| l).count();
    log::info!(
        "training baseline classifier on {} synthetic rows ({} positive)",
        rows.len(),
        positives
    );
    LogisticModel::train(&rows, &labels, &TrainingParams::default())
}

fn gaussian(rng: &mut StdRng) -> f64 {
    // Box-Muller; u1 kept away from zero for ln.
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn fixed(values: &[f64], field: &str) -> std::result::Result<[f64; FEATURE_COUNT], ModelError> {
    if values.len() != FEATURE_COUNT || values.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::Incompatible {
            reason: format!(
                "{} must hold {} finite values, got {:?}",
                field, FEATURE_COUNT, values
            ),
        });
    }
    let mut out = [0.0; FEATURE_COUNT];
    out.copy_from_slice(values);
    Ok(out)
}

fn standardize(
    x: &[f64; FEATURE_COUNT],
    mean: &[f64; FEATURE_COUNT],
    scale: &[f64; FEATURE_COUNT],
) -> [f64; FEATURE_COUNT] {
    let mut out = [0.0; FEATURE_COUNT];
    for i in 0..FEATURE_COUNT {
        out[i] = (x[i] - mean[i]) / scale[i];
    }
    out
}

fn dot(a: &[f64; FEATURE_COUNT], b: &[f64; FEATURE_COUNT]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fv(area: f64, magnitude: f64, aspect_ratio: f64) -> FeatureVector {
        FeatureVector {
            area_pixels: area,
            magnitude,
            aspect_ratio,
        }
    }

    #[test]
    fn baseline_is_deterministic() {
        let a = train_baseline(BASELINE_SEED).unwrap();
        let b = train_baseline(BASELINE_SEED).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn baseline_separates_obvious_cases() {
        let model = train_baseline(BASELINE_SEED).unwrap();
        let strong = model.predict(&fv(2000.0, 200.0, 1.0));
        let faint = model.predict(&fv(60.0, 10.0, 7.0));
        assert!(strong > 0.9, "strong={}", strong);
        assert!(faint < 0.1, "faint={}", faint);
        assert!((0.0..=1.0).contains(&strong) && (0.0..=1.0).contains(&faint));
    }

    #[test]
    fn artifact_round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("models").join("baseline.json");
        let model = train_baseline(7).unwrap();
        model.save(&path).unwrap();
        let loaded = LogisticModel::load(&path).unwrap();
        let probe = fv(800.0, 120.0, 2.0);
        assert_eq!(model.predict(&probe), loaded.predict(&probe));
    }

    #[test]
    fn missing_artifact_is_reported() {
        let err = LogisticModel::load(Path::new("/nonexistent/model.json")).unwrap_err();
        assert!(matches!(err, ModelError::Missing { .. }));
    }

    #[test]
    fn schema_mismatch_is_incompatible() {
        let mut artifact = train_baseline(1).unwrap().to_artifact();
        artifact.features = vec!["area_pixels".into(), "magnitude".into()];
        let err = LogisticModel::from_artifact(artifact).unwrap_err();
        assert!(matches!(err, ModelError::Incompatible { .. }));

        let mut artifact = train_baseline(1).unwrap().to_artifact();
        artifact.format_version = 99;
        assert!(LogisticModel::from_artifact(artifact).is_err());
    }

    #[test]
    fn garbage_file_is_incompatible() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = LogisticModel::load(&path).unwrap_err();
        assert!(matches!(err, ModelError::Incompatible { .. }));
    }

    #[test]
    fn training_rejects_bad_input() {
        let params = TrainingParams::default();
        assert!(LogisticModel::train(&[], &[], &params).is_err());
        assert!(LogisticModel::train(&[fv(1.0, 1.0, 1.0)], &[true, false], &params).is_err());
        assert!(LogisticModel::train(&[fv(f64::NAN, 1.0, 1.0)], &[true], &params).is_err());
    }
}
