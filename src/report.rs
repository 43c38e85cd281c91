//! Run reports: the reporting collaborator, its JSON default, and a
//! deterministic plain-text summary.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::scoring::ThreatLevel;
use crate::{DetectionResult, RunId, RunMetadata};

/// Serialized form of one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    pub results: Vec<DetectionResult>,
}

#[derive(Serialize)]
struct RunReportRef<'a> {
    metadata: &'a RunMetadata,
    results: &'a [DetectionResult],
}

impl RunReport {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read report {}: {}", path.display(), e))?;
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid report {}: {}", path.display(), e))
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        render(&self.results, &self.metadata)
    }

    /// Deterministic one-line summary; same report, same text.
    pub fn summarize(&self) -> String {
        summarize(&self.results, &self.metadata)
    }
}

fn render(results: &[DetectionResult], metadata: &RunMetadata) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(&RunReportRef { metadata, results })?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn summarize(results: &[DetectionResult], metadata: &RunMetadata) -> String {
    let severe = results
        .iter()
        .filter(|r| r.assessment.level >= ThreatLevel::High)
        .count();
    let alerts = metadata.dispatched.iter().filter(|d| d.alerted).count();
    let tickets = metadata
        .dispatched
        .iter()
        .filter(|d| d.ticket.is_some())
        .count();
    let mut parts = vec![
        format!("Run: {}", metadata.run_id),
        format!("Events: {}", results.len()),
        format!("High/Critical: {}", severe),
        format!("Alerts sent: {}", alerts),
        format!("Tickets created: {}", tickets),
    ];
    // Ties go to the earlier candidate so the line never depends on sort stability.
    let top = results.iter().fold(None::<&DetectionResult>, |best, r| match best {
        Some(b) if b.assessment.score >= r.assessment.score => Some(b),
        _ => Some(r),
    });
    if let Some(top) = top {
        let distance = top
            .compliance
            .distance_meters
            .map(|d| format!("{:.1}", d))
            .unwrap_or_else(|| "unknown".to_string());
        parts.push(format!(
            "Top event: candidate={}, type={}, level={}, score={:.1}, distance_m={}",
            top.candidate.id,
            top.encroachment_type,
            top.assessment.level,
            top.assessment.score,
            distance
        ));
    }
    parts.join("; ")
}

// -------------------- Reporting collaborator --------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedArtifact {
    pub location: String,
    pub bytes: usize,
    pub sha256: String,
}

pub trait ReportSink {
    fn name(&self) -> &'static str;

    /// Where the report for `run_id` will land, if known before writing.
    /// Used as the evidence reference on alerts and tickets.
    fn location(&self, run_id: &RunId) -> Option<String>;

    fn write(
        &mut self,
        results: &[DetectionResult],
        metadata: &RunMetadata,
    ) -> Result<PersistedArtifact>;
}

/// Writes `<dir>/<run_id>.json`.
#[derive(Clone, Debug)]
pub struct JsonReportWriter {
    dir: PathBuf,
}

impl JsonReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }
}

impl ReportSink for JsonReportWriter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn location(&self, run_id: &RunId) -> Option<String> {
        Some(self.path_for(run_id).display().to_string())
    }

    fn write(
        &mut self,
        results: &[DetectionResult],
        metadata: &RunMetadata,
    ) -> Result<PersistedArtifact> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| anyhow!("failed to create {}: {}", self.dir.display(), e))?;
        let bytes = render(results, metadata)?;
        let path = self.path_for(&metadata.run_id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &bytes)
            .map_err(|e| anyhow!("failed to write {}: {}", tmp.display(), e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(anyhow!("failed to move report into {}: {}", path.display(), e));
        }
        log::info!("report written to {}", path.display());
        Ok(PersistedArtifact {
            location: path.display().to_string(),
            bytes: bytes.len(),
            sha256: hex::encode(Sha256::digest(&bytes)),
        })
    }
}
