pub mod difference;

pub use difference::{DifferenceExtractor, ExtractionSettings};
