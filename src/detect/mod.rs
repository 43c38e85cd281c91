//! Change detection: turns an aligned image pair into candidate regions.

mod backend;
mod backends;
mod components;
mod morphology;
mod result;

pub use backend::CandidateExtractor;
pub use backends::{DifferenceExtractor, ExtractionSettings};
pub use morphology::BinaryMask;
pub use result::{BoundingBox, CandidateRegion, Centroid};
