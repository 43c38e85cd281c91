//! Multi-factor threat scoring.
//!
//! Score = clamp(type_base + distance + magnitude + area + compliance, 0, 100).
//! Each component is clamped to its own sub-range before summation, so no
//! single factor can dominate beyond its configured share.
//!
//! | component             | range    |
//! |-----------------------|----------|
//! | type_base             | 0..=40   |
//! | distance_component    | 0..=50   |
//! | magnitude_component   | 0..=10   |
//! | area_component        | 0..=10   |
//! | compliance_adjustment | -5..=20  |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::compliance::{ComplianceState, ComplianceStatus};
use crate::error::{CoreError, CoreResult};
use crate::EncroachmentType;

pub const TYPE_BASE_RANGE: (f64, f64) = (0.0, 40.0);
pub const DISTANCE_RANGE: (f64, f64) = (0.0, 50.0);
pub const MAGNITUDE_RANGE: (f64, f64) = (0.0, 10.0);
pub const AREA_RANGE: (f64, f64) = (0.0, 10.0);
pub const COMPLIANCE_RANGE: (f64, f64) = (-5.0, 20.0);

const DEFAULT_UNKNOWN_TYPE_POINTS: f64 = 25.0;
const DEFAULT_DISTANCE_HORIZON_METERS: f64 = 100.0;
const DEFAULT_UNKNOWN_DISTANCE_POINTS: f64 = 25.0;
const DEFAULT_AREA_PIXELS_PER_POINT: f64 = 1000.0;
const DEFAULT_VIOLATION_BASE_POINTS: f64 = 10.0;
const DEFAULT_VIOLATION_POINTS_PER_METER: f64 = 0.5;
const DEFAULT_COMPLIANT_POINTS: f64 = -5.0;
const DEFAULT_UNKNOWN_COMPLIANCE_POINTS: f64 = 2.5;

// -------------------- Threat Levels --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(ThreatLevel::Low),
            "medium" => Some(ThreatLevel::Medium),
            "high" => Some(ThreatLevel::High),
            "critical" => Some(ThreatLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower bounds of the medium, high and critical bands.
///
/// Bands are `[0, medium)`, `[medium, high)`, `[high, critical)` and
/// `[critical, 100]`; validation keeps them gap-free and non-overlapping.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for LevelThresholds {
    fn default() -> Self {
        Self {
            medium: 25.0,
            high: 60.0,
            critical: 85.0,
        }
    }
}

impl LevelThresholds {
    pub fn validate(&self) -> CoreResult<()> {
        let ordered = 0.0 < self.medium
            && self.medium < self.high
            && self.high < self.critical
            && self.critical <= 100.0;
        if !ordered {
            return Err(CoreError::config(format!(
                "level thresholds must satisfy 0 < medium < high < critical <= 100, got {}/{}/{}",
                self.medium, self.high, self.critical
            )));
        }
        Ok(())
    }

    pub fn level_for(&self, score: f64) -> ThreatLevel {
        if score >= self.critical {
            ThreatLevel::Critical
        } else if score >= self.high {
            ThreatLevel::High
        } else if score >= self.medium {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }
}

// -------------------- Settings --------------------

/// Per-type base points. Types missing from the table use `unknown`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeScoreTable {
    pub points: BTreeMap<EncroachmentType, f64>,
}

impl Default for TypeScoreTable {
    fn default() -> Self {
        let points = [
            (EncroachmentType::Structure, 40.0),
            (EncroachmentType::Excavation, 38.0),
            (EncroachmentType::Road, 35.0),
            (EncroachmentType::Equipment, 25.0),
            (EncroachmentType::Vehicle, 22.0),
            (EncroachmentType::Water, 20.0),
            (EncroachmentType::Vegetation, 15.0),
            (EncroachmentType::Unknown, DEFAULT_UNKNOWN_TYPE_POINTS),
        ]
        .into_iter()
        .collect();
        Self { points }
    }
}

impl TypeScoreTable {
    pub fn base_for(&self, kind: EncroachmentType) -> f64 {
        self.points
            .get(&kind)
            .or_else(|| self.points.get(&EncroachmentType::Unknown))
            .copied()
            .unwrap_or(DEFAULT_UNKNOWN_TYPE_POINTS)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoringSettings {
    pub type_base: TypeScoreTable,
    /// Distance at and beyond which the distance component is zero.
    pub distance_horizon_meters: f64,
    /// Distance component used when the distance is unknown.
    pub unknown_distance_points: f64,
    pub area_pixels_per_point: f64,
    pub violation_base_points: f64,
    pub violation_points_per_meter: f64,
    pub compliant_points: f64,
    pub unknown_compliance_points: f64,
    pub levels: LevelThresholds,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            type_base: TypeScoreTable::default(),
            distance_horizon_meters: DEFAULT_DISTANCE_HORIZON_METERS,
            unknown_distance_points: DEFAULT_UNKNOWN_DISTANCE_POINTS,
            area_pixels_per_point: DEFAULT_AREA_PIXELS_PER_POINT,
            violation_base_points: DEFAULT_VIOLATION_BASE_POINTS,
            violation_points_per_meter: DEFAULT_VIOLATION_POINTS_PER_METER,
            compliant_points: DEFAULT_COMPLIANT_POINTS,
            unknown_compliance_points: DEFAULT_UNKNOWN_COMPLIANCE_POINTS,
            levels: LevelThresholds::default(),
        }
    }
}

impl ScoringSettings {
    pub fn validate(&self) -> CoreResult<()> {
        self.levels.validate()?;
        for (kind, points) in &self.type_base.points {
            require_within(&format!("type_base.{}", kind), *points, TYPE_BASE_RANGE)?;
        }
        require_positive("distance_horizon_meters", self.distance_horizon_meters)?;
        require_positive("area_pixels_per_point", self.area_pixels_per_point)?;
        require_within(
            "unknown_distance_points",
            self.unknown_distance_points,
            DISTANCE_RANGE,
        )?;
        require_within(
            "violation_base_points",
            self.violation_base_points,
            COMPLIANCE_RANGE,
        )?;
        require_within("compliant_points", self.compliant_points, COMPLIANCE_RANGE)?;
        require_within(
            "unknown_compliance_points",
            self.unknown_compliance_points,
            COMPLIANCE_RANGE,
        )?;
        if !self.violation_points_per_meter.is_finite() || self.violation_points_per_meter < 0.0 {
            return Err(CoreError::config(
                "violation_points_per_meter must be finite and >= 0",
            ));
        }
        Ok(())
    }
}

fn require_positive(field: &str, value: f64) -> CoreResult<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(CoreError::config(format!(
            "{} must be finite and > 0, got {}",
            field, value
        )));
    }
    Ok(())
}

fn require_within(field: &str, value: f64, (lo, hi): (f64, f64)) -> CoreResult<()> {
    if !(value >= lo && value <= hi) {
        return Err(CoreError::config(format!(
            "{} must lie in [{}, {}], got {}",
            field, lo, hi, value
        )));
    }
    Ok(())
}

// -------------------- Assessment --------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreatComponents {
    pub type_base: f64,
    pub distance_component: f64,
    pub magnitude_component: f64,
    pub area_component: f64,
    pub compliance_adjustment: f64,
}

impl ThreatComponents {
    pub fn sum(&self) -> f64 {
        self.type_base
            + self.distance_component
            + self.magnitude_component
            + self.area_component
            + self.compliance_adjustment
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    /// In [0, 100].
    pub score: f64,
    pub level: ThreatLevel,
    pub components: ThreatComponents,
    pub reasons: Vec<String>,
}

/// Everything the scorer reads for one candidate.
#[derive(Clone, Copy, Debug)]
pub struct ScoringInput<'a> {
    pub encroachment_type: EncroachmentType,
    pub magnitude: f64,
    pub area_pixels: u32,
    pub compliance: &'a ComplianceStatus,
}

#[derive(Clone, Debug, Default)]
pub struct ThreatScorer {
    settings: ScoringSettings,
}

impl ThreatScorer {
    pub fn new(settings: ScoringSettings) -> CoreResult<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &ScoringSettings {
        &self.settings
    }

    pub fn score(&self, input: &ScoringInput<'_>) -> ThreatAssessment {
        let s = &self.settings;
        let mut reasons = Vec::with_capacity(5);

        let type_base = clamp(s.type_base.base_for(input.encroachment_type), TYPE_BASE_RANGE);
        reasons.push(format!("base({})={:.1}", input.encroachment_type, type_base));

        let distance_component = match input.compliance.distance_meters {
            Some(d) => {
                let d = d.max(0.0).min(s.distance_horizon_meters);
                let points = DISTANCE_RANGE.1 * (1.0 - d / s.distance_horizon_meters);
                let points = clamp(points, DISTANCE_RANGE);
                reasons.push(format!("distance={:.1} ({:.1}m)", points, d));
                points
            }
            None => {
                let points = clamp(s.unknown_distance_points, DISTANCE_RANGE);
                reasons.push(format!("distance={:.1} (unknown)", points));
                points
            }
        };

        let magnitude_component = clamp(
            input.magnitude.max(0.0) / 255.0 * MAGNITUDE_RANGE.1,
            MAGNITUDE_RANGE,
        );
        reasons.push(format!("magnitude={:.1}", magnitude_component));

        let area_component = clamp(
            input.area_pixels as f64 / s.area_pixels_per_point,
            AREA_RANGE,
        );
        reasons.push(format!("area={:.1}", area_component));

        let compliance_adjustment = match input.compliance.state {
            ComplianceState::Violation => clamp(
                s.violation_base_points
                    + s.violation_points_per_meter * input.compliance.violation_severity,
                COMPLIANCE_RANGE,
            ),
            ComplianceState::Compliant => clamp(s.compliant_points, COMPLIANCE_RANGE),
            ComplianceState::Unknown => clamp(s.unknown_compliance_points, COMPLIANCE_RANGE),
        };
        reasons.push(format!(
            "compliance({:?})={:+.1}",
            input.compliance.state, compliance_adjustment
        ));

        let components = ThreatComponents {
            type_base,
            distance_component,
            magnitude_component,
            area_component,
            compliance_adjustment,
        };
        let score = components.sum().clamp(0.0, 100.0);
        let level = s.levels.level_for(score);

        ThreatAssessment {
            score,
            level,
            components,
            reasons,
        }
    }
}

fn clamp(value: f64, (lo, hi): (f64, f64)) -> f64 {
    if value.is_nan() {
        lo
    } else {
        value.clamp(lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::ComplianceChecker;

    fn assess(
        kind: EncroachmentType,
        distance: Option<f64>,
        magnitude: f64,
        area: u32,
    ) -> ThreatAssessment {
        let compliance = ComplianceChecker::new(15.0).unwrap().check(distance);
        ThreatScorer::default().score(&ScoringInput {
            encroachment_type: kind,
            magnitude,
            area_pixels: area,
            compliance: &compliance,
        })
    }

    #[test]
    fn compliant_structure_is_not_penalized() {
        let a = assess(EncroachmentType::Structure, Some(30.0), 255.0, 400);
        assert!(a.components.compliance_adjustment <= 0.0);
        assert_eq!(a.components.type_base, 40.0);
        assert_eq!(a.components.distance_component, 35.0);
        // 40 + 35 + 10 + 0.4 - 5
        assert!((a.score - 80.4).abs() < 1e-9);
        assert_eq!(a.level, LevelThresholds::default().level_for(a.score));
        assert_eq!(a.level, ThreatLevel::High);
    }

    #[test]
    fn unknown_distance_uses_configured_default() {
        let a = assess(EncroachmentType::Vehicle, None, 100.0, 800);
        assert_eq!(a.components.distance_component, DEFAULT_UNKNOWN_DISTANCE_POINTS);
        assert_eq!(a.components.compliance_adjustment, DEFAULT_UNKNOWN_COMPLIANCE_POINTS);
    }

    #[test]
    fn closer_scores_higher() {
        let close = assess(EncroachmentType::Structure, Some(5.0), 200.0, 2000);
        let far = assess(EncroachmentType::Structure, Some(100.0), 200.0, 2000);
        assert!(close.score > far.score);
        assert!(close.components.distance_component > far.components.distance_component);
    }

    #[test]
    fn magnitude_and_area_are_monotonic_and_capped() {
        let mut last = -1.0;
        for m in [0.0, 50.0, 128.0, 255.0, 10_000.0] {
            let a = assess(EncroachmentType::Unknown, Some(50.0), m, 100);
            assert!(a.components.magnitude_component >= last);
            assert!(a.components.magnitude_component <= MAGNITUDE_RANGE.1);
            last = a.components.magnitude_component;
        }
        let huge = assess(EncroachmentType::Unknown, Some(50.0), 10.0, u32::MAX);
        assert_eq!(huge.components.area_component, AREA_RANGE.1);
    }

    #[test]
    fn violation_severity_raises_adjustment_up_to_cap() {
        let slight = assess(EncroachmentType::Structure, Some(14.0), 10.0, 100);
        let deep = assess(EncroachmentType::Structure, Some(0.0), 10.0, 100);
        assert!(deep.components.compliance_adjustment > slight.components.compliance_adjustment);
        assert!(deep.components.compliance_adjustment <= COMPLIANCE_RANGE.1);
    }

    #[test]
    fn score_always_within_bounds() {
        let max = assess(EncroachmentType::Structure, Some(0.0), 255.0, 1_000_000);
        assert_eq!(max.score, 100.0);
        assert_eq!(max.level, ThreatLevel::Critical);
        let min = assess(EncroachmentType::Vegetation, Some(500.0), 0.0, 1);
        assert!(min.score >= 0.0);
        assert_eq!(min.level, ThreatLevel::Low);
    }

    #[test]
    fn identical_inputs_give_identical_assessments() {
        let a = assess(EncroachmentType::Excavation, Some(12.5), 77.7, 1234);
        let b = assess(EncroachmentType::Excavation, Some(12.5), 77.7, 1234);
        assert_eq!(a, b);
    }

    #[test]
    fn level_bands_partition_the_range() {
        let t = LevelThresholds::default();
        assert_eq!(t.level_for(0.0), ThreatLevel::Low);
        assert_eq!(t.level_for(24.999), ThreatLevel::Low);
        assert_eq!(t.level_for(25.0), ThreatLevel::Medium);
        assert_eq!(t.level_for(60.0), ThreatLevel::High);
        assert_eq!(t.level_for(85.0), ThreatLevel::Critical);
        assert_eq!(t.level_for(100.0), ThreatLevel::Critical);
        let mut last = ThreatLevel::Low;
        for i in 0..=1000 {
            let level = t.level_for(i as f64 / 10.0);
            assert!(level >= last);
            last = level;
        }
    }

    #[test]
    fn non_monotonic_thresholds_are_rejected() {
        let bad = [
            LevelThresholds {
                medium: 60.0,
                high: 25.0,
                critical: 85.0,
            },
            LevelThresholds {
                medium: 0.0,
                high: 25.0,
                critical: 85.0,
            },
            LevelThresholds {
                medium: 25.0,
                high: 60.0,
                critical: 101.0,
            },
            LevelThresholds {
                medium: 25.0,
                high: 25.0,
                critical: 85.0,
            },
        ];
        for t in bad {
            assert!(t.validate().is_err(), "{:?}", t);
        }
        assert!(LevelThresholds::default().validate().is_ok());
    }

    #[test]
    fn type_base_outside_range_is_rejected() {
        let mut settings = ScoringSettings::default();
        settings.type_base.points.insert(EncroachmentType::Structure, 55.0);
        assert!(settings.validate().is_err());
        assert!(ScoringSettings::default().validate().is_ok());
    }

    #[test]
    fn scorer_rejects_invalid_settings() {
        let mut nan_horizon = ScoringSettings::default();
        nan_horizon.distance_horizon_meters = f64::NAN;
        let mut zero_area = ScoringSettings::default();
        zero_area.area_pixels_per_point = 0.0;
        let mut negative_rate = ScoringSettings::default();
        negative_rate.violation_points_per_meter = -1.0;
        for settings in [nan_horizon, zero_area, negative_rate] {
            let err = ThreatScorer::new(settings).unwrap_err();
            assert!(matches!(err, CoreError::Config { .. }));
        }
        assert!(ThreatScorer::new(ScoringSettings::default()).is_ok());
    }

    #[test]
    fn missing_type_falls_back_to_unknown_entry() {
        let mut table = TypeScoreTable::default();
        table.points.remove(&EncroachmentType::Water);
        assert_eq!(
            table.base_for(EncroachmentType::Water),
            table.base_for(EncroachmentType::Unknown)
        );
    }
}
