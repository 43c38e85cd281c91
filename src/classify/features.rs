use serde::{Deserialize, Serialize};

use crate::detect::CandidateRegion;

/// Ordered feature schema. Model artifacts must list exactly these names.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = ["area_pixels", "magnitude", "aspect_ratio"];
pub const FEATURE_COUNT: usize = 3;

/// Features the classifier sees for one candidate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub area_pixels: f64,
    pub magnitude: f64,
    /// Long side over short side of the bbox.
    pub aspect_ratio: f64,
}

impl FeatureVector {
    pub fn from_candidate(candidate: &CandidateRegion) -> Self {
        Self {
            area_pixels: candidate.area_pixels as f64,
            magnitude: candidate.magnitude,
            aspect_ratio: candidate.bbox.aspect_ratio(),
        }
    }

    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [self.area_pixels, self.magnitude, self.aspect_ratio]
    }
}
