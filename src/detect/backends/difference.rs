use serde::{Deserialize, Serialize};

use crate::detect::backend::CandidateExtractor;
use crate::detect::components::{label_regions, RegionStats};
use crate::detect::morphology::BinaryMask;
use crate::detect::result::{BoundingBox, CandidateRegion, Centroid};
use crate::error::{CoreError, CoreResult};
use crate::imagery::ImagePair;
use crate::CandidateId;

pub const DEFAULT_DIFF_THRESHOLD: u8 = 30;
pub const DEFAULT_MORPH_KERNEL: u32 = 3;
pub const DEFAULT_MIN_AREA: u32 = 200;
pub const DEFAULT_MAX_CANDIDATES: usize = 256;

/// Extraction tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Pixels whose absolute difference exceeds this are "changed".
    pub diff_threshold: u8,
    /// Side of the square structuring element; 0 or 1 disables morphology.
    pub morph_kernel: u32,
    /// Regions with fewer pixels are discarded.
    pub min_area: u32,
    /// Upper bound on emitted regions; the largest are kept.
    pub max_candidates: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            diff_threshold: DEFAULT_DIFF_THRESHOLD,
            morph_kernel: DEFAULT_MORPH_KERNEL,
            min_area: DEFAULT_MIN_AREA,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

impl ExtractionSettings {
    pub fn validate(&self) -> CoreResult<()> {
        if self.min_area == 0 {
            return Err(CoreError::config("extraction.min_area must be at least 1"));
        }
        if self.max_candidates == 0 {
            return Err(CoreError::config(
                "extraction.max_candidates must be at least 1",
            ));
        }
        if self.morph_kernel > 64 {
            return Err(CoreError::config(format!(
                "extraction.morph_kernel must be <= 64, got {}",
                self.morph_kernel
            )));
        }
        Ok(())
    }
}

/// Absolute-difference extractor: diff, threshold, close/open, label.
#[derive(Clone, Debug, Default)]
pub struct DifferenceExtractor {
    settings: ExtractionSettings,
}

impl DifferenceExtractor {
    pub fn new(settings: ExtractionSettings) -> CoreResult<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &ExtractionSettings {
        &self.settings
    }
}

impl CandidateExtractor for DifferenceExtractor {
    fn name(&self) -> &'static str {
        "abs-diff"
    }

    fn extract(&self, pair: &ImagePair) -> CoreResult<Vec<CandidateRegion>> {
        let (w, h) = pair.dimensions();
        let (width, height) = (w as usize, h as usize);
        let before = pair.before().as_raw();
        let after = pair.after().as_raw();

        let delta: Vec<u8> = before
            .iter()
            .zip(after)
            .map(|(&b, &a)| b.abs_diff(a))
            .collect();

        let mask = BinaryMask::threshold(&delta, width, height, self.settings.diff_threshold)?;
        if mask.count() == 0 {
            log::debug!("no pixels above threshold {}", self.settings.diff_threshold);
            return Ok(Vec::new());
        }

        let kernel = self.settings.morph_kernel;
        let cleaned = mask.close(kernel).open(kernel);

        let mut regions: Vec<RegionStats> = label_regions(&cleaned, &delta)
            .into_iter()
            .filter(|r| r.pixels >= self.settings.min_area.max(1) as u64)
            .collect();
        let labelled = regions.len();

        regions.sort_by(canonical_order);
        if regions.len() > self.settings.max_candidates {
            log::warn!(
                "{} regions exceed max_candidates={}, keeping the largest",
                regions.len(),
                self.settings.max_candidates
            );
            // Stable sort keeps canonical order among equal areas.
            regions.sort_by(|a, b| b.pixels.cmp(&a.pixels));
            regions.truncate(self.settings.max_candidates);
            regions.sort_by(canonical_order);
        }

        let candidates = regions
            .iter()
            .enumerate()
            .map(|(idx, r)| to_candidate(CandidateId(idx as u32), r))
            .collect::<Vec<_>>();

        log::info!(
            "extracted {} candidate changes ({} regions >= min_area {})",
            candidates.len(),
            labelled,
            self.settings.min_area
        );
        Ok(candidates)
    }
}

fn canonical_order(a: &RegionStats, b: &RegionStats) -> std::cmp::Ordering {
    (a.min_y, a.min_x, a.pixels).cmp(&(b.min_y, b.min_x, b.pixels))
}

fn to_candidate(id: CandidateId, r: &RegionStats) -> CandidateRegion {
    let pixels = r.pixels as f64;
    CandidateRegion {
        id,
        bbox: BoundingBox {
            x: r.min_x as u32,
            y: r.min_y as u32,
            width: (r.max_x - r.min_x + 1) as u32,
            height: (r.max_y - r.min_y + 1) as u32,
        },
        area_pixels: r.pixels as u32,
        centroid: Centroid {
            x: r.sum_x as f64 / pixels,
            y: r.sum_y as f64 / pixels,
        },
        magnitude: r.sum_delta as f64 / pixels,
    }
}
