//! Setback compliance.
//!
//! An unknown distance is never treated as compliant: it yields
//! `ComplianceState::Unknown` and carries through scoring as such.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub const DEFAULT_SETBACK_METERS: f64 = 15.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceState {
    Compliant,
    Violation,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComplianceStatus {
    pub distance_meters: Option<f64>,
    pub setback_meters: f64,
    pub state: ComplianceState,
    /// `setback - distance` on violation, 0 otherwise.
    pub violation_severity: f64,
}

impl ComplianceStatus {
    pub fn details(&self) -> String {
        match (self.state, self.distance_meters) {
            (ComplianceState::Compliant, Some(d)) => {
                format!("distance {:.1}m >= setback {:.1}m", d, self.setback_meters)
            }
            (ComplianceState::Violation, Some(d)) => format!(
                "distance {:.1}m < setback {:.1}m (short by {:.1}m)",
                d, self.setback_meters, self.violation_severity
            ),
            _ => format!("distance unknown; setback {:.1}m", self.setback_meters),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComplianceChecker {
    setback_meters: f64,
}

impl ComplianceChecker {
    /// `setback_meters` must be finite and > 0.
    pub fn new(setback_meters: f64) -> CoreResult<Self> {
        if !(setback_meters.is_finite() && setback_meters > 0.0) {
            return Err(CoreError::config(format!(
                "compliance setback_meters must be a positive number, got {}",
                setback_meters
            )));
        }
        Ok(Self { setback_meters })
    }

    pub fn setback_meters(&self) -> f64 {
        self.setback_meters
    }

    pub fn check(&self, distance_meters: Option<f64>) -> ComplianceStatus {
        // Non-finite distances carry no information.
        let distance = distance_meters.filter(|d| d.is_finite()).map(|d| d.max(0.0));
        let (state, violation_severity) = match distance {
            None => (ComplianceState::Unknown, 0.0),
            Some(d) if d >= self.setback_meters => (ComplianceState::Compliant, 0.0),
            Some(d) => (
                ComplianceState::Violation,
                (self.setback_meters - d).max(0.0),
            ),
        };
        ComplianceStatus {
            distance_meters: distance,
            setback_meters: self.setback_meters,
            state,
            violation_severity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_or_beyond_setback_is_compliant() {
        let checker = ComplianceChecker::new(15.0).unwrap();
        for d in [15.0, 30.0, 1_000.0] {
            let status = checker.check(Some(d));
            assert_eq!(status.state, ComplianceState::Compliant);
            assert_eq!(status.violation_severity, 0.0);
        }
    }

    #[test]
    fn inside_setback_is_violation_with_severity() {
        let status = ComplianceChecker::new(15.0).unwrap().check(Some(4.0));
        assert_eq!(status.state, ComplianceState::Violation);
        assert_eq!(status.violation_severity, 11.0);
        assert!(status.details().contains("short by 11.0m"));
    }

    #[test]
    fn missing_distance_is_unknown() {
        let checker = ComplianceChecker::new(15.0).unwrap();
        for d in [None, Some(f64::NAN), Some(f64::INFINITY)] {
            let status = checker.check(d);
            assert_eq!(status.state, ComplianceState::Unknown);
            assert_eq!(status.distance_meters, None);
        }
    }

    #[test]
    fn negative_distance_floors_at_zero() {
        let status = ComplianceChecker::new(15.0).unwrap().check(Some(-3.0));
        assert_eq!(status.distance_meters, Some(0.0));
        assert_eq!(status.violation_severity, 15.0);
    }

    #[test]
    fn setback_must_be_positive_and_finite() {
        for setback in [f64::NAN, f64::INFINITY, 0.0, -10.0] {
            let err = ComplianceChecker::new(setback).unwrap_err();
            assert!(matches!(err, CoreError::Config { .. }), "{}", setback);
        }
        assert_eq!(ComplianceChecker::new(0.5).unwrap().setback_meters(), 0.5);
    }
}
