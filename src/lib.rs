//! Corridor Watch
//!
//! Detection-to-decision core for right-of-way encroachment monitoring.
//!
//! # Architecture
//!
//! A run takes a pixel-aligned before/after image pair and moves through
//! fixed stages:
//!
//! 1. **Extract**: absolute difference, threshold, morphology, region labelling.
//! 2. **Classify**: a fitted logistic model drops likely false positives.
//! 3. **Geolocate**: optional corridor distance per candidate.
//! 4. **Comply**: setback check (compliant / violation / unknown).
//! 5. **Score**: deterministic multi-component threat score and level.
//! 6. **Dispatch**: alerts and tickets for results above configured levels.
//! 7. **Report**: the result set and run metadata handed to a report sink.
//!
//! Input and config errors abort a run. Collaborator failures (geolocation,
//! alerting, ticketing, reporting) are recorded as degraded stages instead.
//!
//! # Module Structure
//!
//! - `imagery`: image loading and pair alignment checks
//! - `detect`: candidate extraction
//! - `classify`: false-positive model and filter
//! - `compliance`, `scoring`: decision logic
//! - `geo`: corridor geometry and the geolocation collaborator
//! - `dispatch`, `storage`, `report`: collaborators and their defaults
//! - `pipeline`: the orchestrator

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod classify;
pub mod compliance;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod geo;
pub mod imagery;
pub mod pipeline;
pub mod report;
pub mod scoring;
pub mod storage;

pub use classify::{ClassificationResult, FalsePositiveFilter, ModelPolicy, ModelStatus};
pub use compliance::{ComplianceChecker, ComplianceState, ComplianceStatus};
pub use config::EngineConfig;
pub use dispatch::{DispatchRecord, DispatchSettings, Dispatcher, LogNotifier, Notifier, TicketSink};
pub use detect::{BoundingBox, CandidateExtractor, CandidateRegion, Centroid, DifferenceExtractor};
pub use error::{CoreError, CoreResult, ModelError, Stage, StageFailure};
pub use geo::{Corridor, GeoContext, GeoPoint, GeoReference, Geolocator, PlanarGeolocator};
pub use imagery::{ImageIdentifier, ImagePair, LumaImage};
pub use pipeline::{Pipeline, RunOutcome, RunRequest, RunStage};
pub use report::{JsonReportWriter, PersistedArtifact, ReportSink, RunReport};
pub use scoring::{ThreatAssessment, ThreatLevel, ThreatScorer};
pub use storage::{
    InMemoryWorkOrderStore, SqliteWorkOrderStore, TicketId, WorkOrder, WorkOrderStatus,
    WorkOrderStore,
};

// -------------------- Identifiers --------------------

/// Run identifier: hex digest of the compared images and the run inputs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Same images, timestamp, type and geospatial context => same id.
    pub fn derive(
        before: &ImageIdentifier,
        after: &ImageIdentifier,
        timestamp_s: u64,
        encroachment_type: EncroachmentType,
        geo: &GeoContext,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(before.sha256.as_bytes());
        hasher.update(b"|");
        hasher.update(after.sha256.as_bytes());
        hasher.update(b"|");
        hasher.update(timestamp_s.to_le_bytes());
        hasher.update(b"|");
        hasher.update(encroachment_type.as_str().as_bytes());
        hasher.update(b"|");
        geo.digest_into(&mut hasher);
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Index of a candidate in canonical extraction order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub u32);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// -------------------- Encroachment Types --------------------

/// Closed set of encroachment categories; anything else is `Unknown`.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EncroachmentType {
    Vegetation,
    Structure,
    Excavation,
    Vehicle,
    Road,
    Equipment,
    Water,
    #[default]
    Unknown,
}

impl EncroachmentType {
    pub const ALL: [EncroachmentType; 8] = [
        EncroachmentType::Vegetation,
        EncroachmentType::Structure,
        EncroachmentType::Excavation,
        EncroachmentType::Vehicle,
        EncroachmentType::Road,
        EncroachmentType::Equipment,
        EncroachmentType::Water,
        EncroachmentType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EncroachmentType::Vegetation => "vegetation",
            EncroachmentType::Structure => "structure",
            EncroachmentType::Excavation => "excavation",
            EncroachmentType::Vehicle => "vehicle",
            EncroachmentType::Road => "road",
            EncroachmentType::Equipment => "equipment",
            EncroachmentType::Water => "water",
            EncroachmentType::Unknown => "unknown",
        }
    }

    /// Exact (case-insensitive) match, `None` for unrecognised labels.
    pub fn lookup(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|t| t.as_str() == label)
    }

    /// Lenient parse: unrecognised labels fall back to `Unknown`.
    pub fn parse(label: &str) -> Self {
        Self::lookup(label).unwrap_or_else(|| {
            log::warn!("unrecognised encroachment type '{}', using unknown", label);
            EncroachmentType::Unknown
        })
    }
}

impl fmt::Display for EncroachmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -------------------- Detection Results --------------------

/// One surviving candidate's full assessment. Never mutated after assembly;
/// a later run produces new results rather than updating these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub run_id: RunId,
    pub timestamp_s: u64,
    pub candidate: CandidateRegion,
    pub classification: ClassificationResult,
    pub compliance: ComplianceStatus,
    pub assessment: ThreatAssessment,
    pub encroachment_type: EncroachmentType,
    pub geocoordinates: Option<GeoPoint>,
    /// Collaborator failures hit while producing this result.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<StageFailure>,
}

impl DetectionResult {
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// One-line description used for alerts and tickets.
    pub fn headline(&self) -> String {
        let distance = match self.compliance.distance_meters {
            Some(d) => format!("{:.1}m", d),
            None => "unknown distance".to_string(),
        };
        format!(
            "Encroachment {} detected: score {:.1} level {} at {} ({:?})",
            self.encroachment_type,
            self.assessment.score,
            self.assessment.level,
            distance,
            self.compliance.state
        )
    }
}

/// Run-level facts reported alongside the results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: RunId,
    pub timestamp_s: u64,
    pub before: ImageIdentifier,
    pub after: ImageIdentifier,
    pub extractor: String,
    pub candidates_extracted: usize,
    pub candidates_kept: usize,
    pub candidates_discarded: usize,
    /// Classifier verdicts for the discarded candidates, in extraction order.
    #[serde(default)]
    pub discarded: Vec<ClassificationResult>,
    pub model: ModelStatus,
    /// Alert and ticket actions taken, in result order.
    pub dispatched: Vec<DispatchRecord>,
}

pub fn now_s() -> anyhow::Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(sha: &str) -> ImageIdentifier {
        ImageIdentifier {
            label: "x".to_string(),
            sha256: sha.to_string(),
        }
    }

    fn derive(ts: u64, kind: EncroachmentType, geo: &GeoContext) -> RunId {
        RunId::derive(&id("aa"), &id("bb"), ts, kind, geo)
    }

    #[test]
    fn run_id_is_deterministic() {
        let geo = GeoContext::default();
        let a = derive(1_700_000_000, EncroachmentType::Road, &geo);
        let b = derive(1_700_000_000, EncroachmentType::Road, &geo);
        let c = derive(1_700_000_001, EncroachmentType::Road, &geo);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn run_id_covers_type_and_geo_context() {
        let ts = 1_700_000_000;
        let none = GeoContext::default();
        let base = derive(ts, EncroachmentType::Road, &none);
        assert_ne!(base, derive(ts, EncroachmentType::Structure, &none));

        let site = GeoContext {
            site: Some(GeoPoint::new(-97.0, 35.0).unwrap()),
            ..GeoContext::default()
        };
        let surveyed = GeoContext {
            site_distance_meters: Some(12.0),
            ..GeoContext::default()
        };
        let georef = GeoContext {
            georeference: Some(
                GeoReference::new(GeoPoint::new(-97.0, 35.0).unwrap(), 1e-5, -1e-5).unwrap(),
            ),
            ..GeoContext::default()
        };
        let ids = [
            base,
            derive(ts, EncroachmentType::Road, &site),
            derive(ts, EncroachmentType::Road, &surveyed),
            derive(ts, EncroachmentType::Road, &georef),
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn encroachment_type_parsing() {
        assert_eq!(EncroachmentType::parse("Structure"), EncroachmentType::Structure);
        assert_eq!(EncroachmentType::parse(" vehicle "), EncroachmentType::Vehicle);
        assert_eq!(EncroachmentType::parse("ufo"), EncroachmentType::Unknown);
        assert_eq!(EncroachmentType::lookup("ufo"), None);
        for t in EncroachmentType::ALL {
            assert_eq!(EncroachmentType::lookup(t.as_str()), Some(t));
        }
    }
}
