use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, Stage};
use crate::CandidateId;

/// Axis-aligned box in pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Long side over short side; 1.0 for squares.
    pub fn aspect_ratio(&self) -> f64 {
        let long = self.width.max(self.height).max(1) as f64;
        let short = self.width.min(self.height).max(1) as f64;
        long / short
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub x: f64,
    pub y: f64,
}

/// A contiguous area of detected pixel change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateRegion {
    pub id: CandidateId,
    pub bbox: BoundingBox,
    /// Pixel count of the region (not the bbox area).
    pub area_pixels: u32,
    pub centroid: Centroid,
    /// Mean absolute intensity delta inside the region.
    pub magnitude: f64,
}

impl CandidateRegion {
    /// Validating constructor for regions built outside the extractor.
    pub fn new(
        id: CandidateId,
        bbox: BoundingBox,
        area_pixels: u32,
        centroid: Centroid,
        magnitude: f64,
    ) -> CoreResult<Self> {
        if area_pixels == 0 {
            return Err(CoreError::input(Stage::Extract, "candidate area must be > 0"));
        }
        if !magnitude.is_finite() || magnitude < 0.0 {
            return Err(CoreError::input(
                Stage::Extract,
                format!("candidate magnitude must be finite and >= 0, got {}", magnitude),
            ));
        }
        Ok(Self {
            id,
            bbox,
            area_pixels,
            centroid,
            magnitude,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_is_orientation_free() {
        let wide = BoundingBox {
            x: 0,
            y: 0,
            width: 40,
            height: 10,
        };
        let tall = BoundingBox {
            width: 10,
            height: 40,
            ..wide
        };
        assert_eq!(wide.aspect_ratio(), 4.0);
        assert_eq!(tall.aspect_ratio(), 4.0);
    }

    #[test]
    fn rejects_empty_or_negative_regions() {
        let bbox = BoundingBox {
            x: 0,
            y: 0,
            width: 1,
            height: 1,
        };
        let c = Centroid { x: 0.0, y: 0.0 };
        assert!(CandidateRegion::new(CandidateId(0), bbox, 0, c, 1.0).is_err());
        assert!(CandidateRegion::new(CandidateId(0), bbox, 1, c, -1.0).is_err());
        assert!(CandidateRegion::new(CandidateId(0), bbox, 1, c, 0.0).is_ok());
    }
}
