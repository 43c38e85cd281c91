use crate::detect::result::CandidateRegion;
use crate::error::CoreResult;
use crate::imagery::ImagePair;

/// Candidate extractor trait.
///
/// Implementations turn a pixel-aligned image pair into candidate regions.
/// Output must be in canonical order (bbox top, bbox left, area) with ids
/// assigned in that order, so identical inputs give identical sequences.
pub trait CandidateExtractor: Send {
    /// Extractor identifier, recorded in logs.
    fn name(&self) -> &'static str;

    /// Extract candidate regions from a before/after pair.
    ///
    /// Identical images must yield an empty sequence. Every returned region
    /// has `area_pixels >= min_area` and a non-negative magnitude.
    fn extract(&self, pair: &ImagePair) -> CoreResult<Vec<CandidateRegion>>;
}
