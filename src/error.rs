//! Error taxonomy for the detection-to-decision core.
//!
//! Fatal errors (`Input`, `Config`) abort a run with no partial output.
//! `Model` errors are resolved by the configured model policy and recorded in
//! the run metadata. Collaborator failures never abort a run; they surface as
//! [`StageFailure`] records on the affected detection or dispatch outcome.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::{CandidateId, RunId};

/// Pipeline stage an error or degraded record is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Startup,
    Load,
    Extract,
    Classify,
    Geolocate,
    Alert,
    Ticket,
    Report,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Startup => "startup",
            Stage::Load => "load",
            Stage::Extract => "extract",
            Stage::Classify => "classify",
            Stage::Geolocate => "geolocate",
            Stage::Alert => "alert",
            Stage::Ticket => "ticket",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an error happened: run, candidate, stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub run_id: Option<RunId>,
    pub candidate_id: Option<CandidateId>,
    pub stage: Stage,
}

impl ErrorContext {
    pub fn stage(stage: Stage) -> Self {
        Self {
            run_id: None,
            candidate_id: None,
            stage,
        }
    }

    pub fn with_run(mut self, run_id: &RunId) -> Self {
        self.run_id = Some(run_id.clone());
        self
    }

    pub fn with_candidate(mut self, candidate_id: CandidateId) -> Self {
        self.candidate_id = Some(candidate_id);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage={}", self.stage)?;
        if let Some(run_id) = &self.run_id {
            write!(f, " run={}", run_id)?;
        }
        if let Some(candidate_id) = self.candidate_id {
            write!(f, " candidate={}", candidate_id)?;
        }
        Ok(())
    }
}

/// Classifier artifact problems. Resolved by `ModelPolicy`, never ignored.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelError {
    #[error("model artifact not found at {path}")]
    Missing { path: String },
    #[error("failed to read model artifact {path}: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("incompatible model artifact: {reason}")]
    Incompatible { reason: String },
    #[error("model training failed: {reason}")]
    Training { reason: String },
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("input error ({ctx}): {message}")]
    Input { ctx: ErrorContext, message: String },

    #[error("config error ({ctx}): {message}")]
    Config { ctx: ErrorContext, message: String },

    #[error("model error ({ctx}): {source}")]
    Model {
        ctx: ErrorContext,
        #[source]
        source: ModelError,
    },

    #[error("collaborator error ({ctx}): {message}")]
    Collaborator { ctx: ErrorContext, message: String },
}

impl CoreError {
    pub fn input(stage: Stage, message: impl Into<String>) -> Self {
        CoreError::Input {
            ctx: ErrorContext::stage(stage),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        CoreError::Config {
            ctx: ErrorContext::stage(Stage::Startup),
            message: message.into(),
        }
    }

    /// Unusable classifier artifact, attributed to the classify stage.
    pub fn model(source: ModelError) -> Self {
        CoreError::Model {
            ctx: ErrorContext::stage(Stage::Classify),
            source,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            CoreError::Input { ctx, .. }
            | CoreError::Config { ctx, .. }
            | CoreError::Model { ctx, .. }
            | CoreError::Collaborator { ctx, .. } => ctx,
        }
    }

    /// Attach the run id once a run exists.
    pub fn in_run(mut self, run_id: &RunId) -> Self {
        let ctx = match &mut self {
            CoreError::Input { ctx, .. }
            | CoreError::Config { ctx, .. }
            | CoreError::Model { ctx, .. }
            | CoreError::Collaborator { ctx, .. } => ctx,
        };
        ctx.run_id = Some(run_id.clone());
        self
    }

    /// True for errors that must abort a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Input { .. } | CoreError::Config { .. })
    }
}

/// Degraded-stage record: a collaborator failure captured instead of aborting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub run_id: RunId,
    pub candidate_id: Option<CandidateId>,
    pub stage: Stage,
    pub message: String,
}

impl StageFailure {
    pub fn new(
        run_id: &RunId,
        candidate_id: Option<CandidateId>,
        stage: Stage,
        err: &anyhow::Error,
    ) -> Self {
        Self {
            run_id: run_id.clone(),
            candidate_id,
            stage,
            message: format!("{:#}", err),
        }
    }

    pub fn into_error(self) -> CoreError {
        let mut ctx = ErrorContext::stage(self.stage).with_run(&self.run_id);
        if let Some(candidate_id) = self.candidate_id {
            ctx = ctx.with_candidate(candidate_id);
        }
        CoreError::Collaborator {
            ctx,
            message: self.message,
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_renders_run_and_candidate() {
        let run_id = RunId::new("abc123");
        let err = CoreError::input(Stage::Extract, "dimension mismatch").in_run(&run_id);
        let text = err.to_string();
        assert!(text.contains("stage=extract"));
        assert!(text.contains("run=abc123"));
        assert!(err.is_fatal());
    }

    #[test]
    fn stage_failure_becomes_collaborator_error() {
        let run_id = RunId::new("r1");
        let failure = StageFailure::new(
            &run_id,
            Some(CandidateId(3)),
            Stage::Ticket,
            &anyhow::anyhow!("db locked"),
        );
        let err = failure.into_error();
        assert!(!err.is_fatal());
        assert_eq!(err.context().candidate_id, Some(CandidateId(3)));
        assert_eq!(err.context().stage, Stage::Ticket);
        assert_eq!(
            err.to_string(),
            "collaborator error (stage=ticket run=r1 candidate=3): db locked"
        );
    }

    #[test]
    fn model_error_is_resolved_not_fatal() {
        let err = CoreError::model(ModelError::Missing {
            path: "models/baseline.json".to_string(),
        })
        .in_run(&RunId::new("r2"));
        assert!(!err.is_fatal());
        assert_eq!(err.context().stage, Stage::Classify);
        assert_eq!(
            err.to_string(),
            "model error (stage=classify run=r2): model artifact not found at models/baseline.json"
        );
    }
}
