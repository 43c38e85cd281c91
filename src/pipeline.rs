//! Run orchestration: extract, classify, geolocate, comply, score, dispatch,
//! report.
//!
//! Input and config errors abort the run before anything is dispatched or
//! written. Collaborator failures become [`StageFailure`] records and the run
//! carries on with the affected value treated as unknown.

use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::classify::{ClassificationResult, FalsePositiveFilter};
use crate::compliance::ComplianceChecker;
use crate::config::EngineConfig;
use crate::detect::{CandidateExtractor, CandidateRegion, DifferenceExtractor};
use crate::dispatch::{DispatchRecord, Dispatcher, Notifier, TicketSink};
use crate::error::{CoreResult, Stage, StageFailure};
use crate::geo::{GeoContext, GeoPoint, Geolocator, PlanarGeolocator};
use crate::imagery::ImagePair;
use crate::report::{PersistedArtifact, ReportSink, RunReport};
use crate::scoring::{ScoringInput, ThreatScorer};
use crate::{DetectionResult, EncroachmentType, RunId, RunMetadata};

/// Run state transitions, in order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Extracted,
    Classified,
    Geolocated,
    Scored,
    Dispatched,
    Reported,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Extracted => "extracted",
            RunStage::Classified => "classified",
            RunStage::Geolocated => "geolocated",
            RunStage::Scored => "scored",
            RunStage::Dispatched => "dispatched",
            RunStage::Reported => "reported",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One before/after comparison.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub pair: ImagePair,
    pub encroachment_type: EncroachmentType,
    pub geo: GeoContext,
    pub timestamp_s: u64,
}

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub artifact: Option<PersistedArtifact>,
    pub report_failure: Option<StageFailure>,
}

impl RunOutcome {
    pub fn run_id(&self) -> &RunId {
        &self.report.metadata.run_id
    }

    pub fn results(&self) -> &[DetectionResult] {
        &self.report.results
    }

    /// Every collaborator failure recorded during the run.
    pub fn degraded(&self) -> Vec<&StageFailure> {
        self.report
            .results
            .iter()
            .flat_map(|r| r.degraded.iter())
            .chain(self.report.metadata.dispatched.iter().flat_map(|d| d.failures.iter()))
            .chain(self.report_failure.iter())
            .collect()
    }
}

struct Progress<'a> {
    run_id: &'a RunId,
    current: Option<RunStage>,
    observer: &'a mut dyn FnMut(RunStage),
}

impl<'a> Progress<'a> {
    fn advance(&mut self, next: RunStage, detail: String) {
        match self.current {
            Some(prev) => log::info!("run {}: {} -> {} ({})", self.run_id, prev, next, detail),
            None => log::info!("run {}: {} ({})", self.run_id, next, detail),
        }
        self.current = Some(next);
        (self.observer)(next);
    }
}

struct Located {
    candidate: CandidateRegion,
    classification: ClassificationResult,
    coordinate: Option<GeoPoint>,
    distance_meters: Option<f64>,
    failures: Vec<StageFailure>,
}

pub struct Pipeline {
    extractor: Box<dyn CandidateExtractor>,
    filter: FalsePositiveFilter,
    compliance: ComplianceChecker,
    scorer: ThreatScorer,
    geolocator: Option<Box<dyn Geolocator>>,
    dispatcher: Dispatcher,
    reporter: Option<Box<dyn ReportSink>>,
}

impl Pipeline {
    /// Stages arrive already validated by their own constructors.
    pub fn new(
        extractor: Box<dyn CandidateExtractor>,
        filter: FalsePositiveFilter,
        compliance: ComplianceChecker,
        scorer: ThreatScorer,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            extractor,
            filter,
            compliance,
            scorer,
            geolocator: Some(Box::new(PlanarGeolocator)),
            dispatcher,
            reporter: None,
        }
    }

    /// Build from validated config. The classifier artifact is loaded here,
    /// once; an unusable artifact is resolved by the configured policy.
    pub fn from_config(
        cfg: &EngineConfig,
        notifier: Box<dyn Notifier>,
        tickets: Option<Box<dyn TicketSink>>,
    ) -> CoreResult<Self> {
        cfg.validate()?;
        let filter = FalsePositiveFilter::from_path(
            &cfg.classifier.model_path,
            cfg.classifier.model_policy,
            cfg.classifier.decision_threshold,
        )?;
        let dispatcher = Dispatcher::new(cfg.dispatch, cfg.alerts.recipients(), notifier, tickets);
        Ok(Self::new(
            Box::new(DifferenceExtractor::new(cfg.extraction.clone())?),
            filter,
            ComplianceChecker::new(cfg.setback_meters)?,
            ThreatScorer::new(cfg.scoring.clone())?,
            dispatcher,
        ))
    }

    pub fn with_geolocator(mut self, geolocator: Option<Box<dyn Geolocator>>) -> Self {
        self.geolocator = geolocator;
        self
    }

    pub fn with_report_sink(mut self, reporter: Box<dyn ReportSink>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn filter(&self) -> &FalsePositiveFilter {
        &self.filter
    }

    pub fn run(&mut self, request: RunRequest) -> CoreResult<RunOutcome> {
        self.run_observed(request, &mut |_| {})
    }

    /// Run with a callback on every state transition.
    pub fn run_observed(
        &mut self,
        request: RunRequest,
        observer: &mut dyn FnMut(RunStage),
    ) -> CoreResult<RunOutcome> {
        let RunRequest {
            pair,
            encroachment_type,
            geo,
            timestamp_s,
        } = request;
        let before = pair.before().identifier().clone();
        let after = pair.after().identifier().clone();
        let run_id = RunId::derive(&before, &after, timestamp_s, encroachment_type, &geo);
        let mut progress = Progress {
            run_id: &run_id,
            current: None,
            observer,
        };

        let candidates = self
            .extractor
            .extract(&pair)
            .map_err(|e| e.in_run(&run_id))?;
        let candidates_extracted = candidates.len();
        progress.advance(
            RunStage::Extracted,
            format!("{} candidates via {}", candidates_extracted, self.extractor.name()),
        );

        if let Some(err) = self.filter.model_error() {
            log::warn!("{}; applying {:?}", err.in_run(&run_id), self.filter.policy());
        }
        let classified = classify_all(&self.filter, candidates);
        let (kept, rejected): (Vec<_>, Vec<_>) = classified.into_iter().partition(|(_, c)| c.keep);
        let discarded: Vec<ClassificationResult> = rejected.into_iter().map(|(_, c)| c).collect();
        for verdict in &discarded {
            log::debug!(
                "run {}: discarded candidate {} (p={:.3} via {:?})",
                run_id,
                verdict.candidate_id,
                verdict.probability,
                verdict.source
            );
        }
        let candidates_kept = kept.len();
        progress.advance(
            RunStage::Classified,
            format!("kept {}/{}", candidates_kept, candidates_extracted),
        );

        let located: Vec<Located> = kept
            .into_iter()
            .map(|(candidate, classification)| {
                self.locate(&run_id, &geo, candidate, classification)
            })
            .collect();
        let with_distance = located.iter().filter(|l| l.distance_meters.is_some()).count();
        progress.advance(
            RunStage::Geolocated,
            format!("{}/{} with corridor distance", with_distance, located.len()),
        );

        let results = assess_all(
            &self.compliance,
            &self.scorer,
            &run_id,
            timestamp_s,
            encroachment_type,
            located,
        );
        progress.advance(RunStage::Scored, format!("{} results", results.len()));

        let evidence = self.reporter.as_ref().and_then(|r| r.location(&run_id));
        let dispatched: Vec<DispatchRecord> = results
            .iter()
            .filter_map(|r| self.dispatcher.dispatch(r, evidence.as_deref()))
            .collect();
        progress.advance(
            RunStage::Dispatched,
            format!("{} dispatched", dispatched.len()),
        );

        let metadata = RunMetadata {
            run_id: run_id.clone(),
            timestamp_s,
            before,
            after,
            extractor: self.extractor.name().to_string(),
            candidates_extracted,
            candidates_kept,
            candidates_discarded: discarded.len(),
            discarded,
            model: self.filter.status().clone(),
            dispatched,
        };

        let (artifact, report_failure) = match self.reporter.as_mut() {
            Some(sink) => match sink.write(&results, &metadata) {
                Ok(artifact) => (Some(artifact), None),
                Err(e) => {
                    log::warn!("run {}: report sink {} failed: {:#}", run_id, sink.name(), e);
                    (None, Some(StageFailure::new(&run_id, None, Stage::Report, &e)))
                }
            },
            None => (None, None),
        };
        progress.advance(
            RunStage::Reported,
            match &artifact {
                Some(a) => a.location.clone(),
                None => "no artifact".to_string(),
            },
        );

        Ok(RunOutcome {
            report: RunReport { metadata, results },
            artifact,
            report_failure,
        })
    }

    fn locate(
        &self,
        run_id: &RunId,
        geo: &GeoContext,
        candidate: CandidateRegion,
        classification: ClassificationResult,
    ) -> Located {
        let mut failures = Vec::new();
        let coordinate = geo
            .coordinate_for(candidate.centroid.x, candidate.centroid.y)
            .and_then(|p| match GeoPoint::new(p.lon, p.lat) {
                Ok(p) => Some(p),
                Err(e) => {
                    failures.push(StageFailure::new(
                        run_id,
                        Some(candidate.id),
                        Stage::Geolocate,
                        &anyhow::Error::new(e),
                    ));
                    None
                }
            });

        let located = match (&self.geolocator, &geo.corridor, coordinate) {
            (Some(geolocator), Some(corridor), Some(point)) => {
                match geolocator.locate(point, corridor) {
                    Ok(distance) => distance,
                    Err(e) => {
                        log::warn!(
                            "run {}: geolocator {} failed for candidate {}: {:#}",
                            run_id,
                            geolocator.name(),
                            candidate.id,
                            e
                        );
                        failures.push(StageFailure::new(
                            run_id,
                            Some(candidate.id),
                            Stage::Geolocate,
                            &e,
                        ));
                        None
                    }
                }
            }
            _ => None,
        };
        let distance_meters = located.or(if failures.is_empty() {
            geo.site_distance_meters
        } else {
            None
        });

        Located {
            candidate,
            classification,
            coordinate,
            distance_meters,
            failures,
        }
    }
}

#[cfg(not(feature = "parallel"))]
fn classify_all(
    filter: &FalsePositiveFilter,
    candidates: Vec<CandidateRegion>,
) -> Vec<(CandidateRegion, ClassificationResult)> {
    candidates
        .into_iter()
        .map(|c| {
            let result = filter.classify(&c);
            (c, result)
        })
        .collect()
}

#[cfg(feature = "parallel")]
fn classify_all(
    filter: &FalsePositiveFilter,
    candidates: Vec<CandidateRegion>,
) -> Vec<(CandidateRegion, ClassificationResult)> {
    candidates
        .into_par_iter()
        .map(|c| {
            let result = filter.classify(&c);
            (c, result)
        })
        .collect()
}

fn assess(
    compliance: &ComplianceChecker,
    scorer: &ThreatScorer,
    run_id: &RunId,
    timestamp_s: u64,
    encroachment_type: EncroachmentType,
    located: Located,
) -> DetectionResult {
    let status = compliance.check(located.distance_meters);
    let assessment = scorer.score(&ScoringInput {
        encroachment_type,
        magnitude: located.candidate.magnitude,
        area_pixels: located.candidate.area_pixels,
        compliance: &status,
    });
    DetectionResult {
        run_id: run_id.clone(),
        timestamp_s,
        candidate: located.candidate,
        classification: located.classification,
        compliance: status,
        assessment,
        encroachment_type,
        geocoordinates: located.coordinate,
        degraded: located.failures,
    }
}

#[cfg(not(feature = "parallel"))]
fn assess_all(
    compliance: &ComplianceChecker,
    scorer: &ThreatScorer,
    run_id: &RunId,
    timestamp_s: u64,
    encroachment_type: EncroachmentType,
    located: Vec<Located>,
) -> Vec<DetectionResult> {
    located
        .into_iter()
        .map(|l| assess(compliance, scorer, run_id, timestamp_s, encroachment_type, l))
        .collect()
}

#[cfg(feature = "parallel")]
fn assess_all(
    compliance: &ComplianceChecker,
    scorer: &ThreatScorer,
    run_id: &RunId,
    timestamp_s: u64,
    encroachment_type: EncroachmentType,
    located: Vec<Located>,
) -> Vec<DetectionResult> {
    located
        .into_par_iter()
        .map(|l| assess(compliance, scorer, run_id, timestamp_s, encroachment_type, l))
        .collect()
}
