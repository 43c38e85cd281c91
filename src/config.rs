use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::classify::{ModelPolicy, DEFAULT_DECISION_THRESHOLD};
use crate::compliance::DEFAULT_SETBACK_METERS;
use crate::detect::ExtractionSettings;
use crate::dispatch::{AlertSettings, ChannelSettings, DispatchSettings};
use crate::error::{CoreError, CoreResult};
use crate::scoring::{LevelThresholds, ScoringSettings, ThreatLevel};
use crate::EncroachmentType;

pub const CONFIG_ENV: &str = "CORRIDOR_WATCH_CONFIG";

const DEFAULT_MODEL_PATH: &str = "models/baseline.json";
const DEFAULT_REPORTS_DIR: &str = "reports";
const DEFAULT_WORK_ORDERS_DB: &str = "work_orders.db";

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    extraction: Option<ExtractionConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    compliance: Option<ComplianceConfigFile>,
    scoring: Option<ScoringConfigFile>,
    dispatch: Option<DispatchConfigFile>,
    alerts: Option<AlertsConfigFile>,
    storage: Option<StorageConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ExtractionConfigFile {
    diff_threshold: Option<u8>,
    morph_kernel: Option<u32>,
    min_area: Option<u32>,
    max_candidates: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    model_path: Option<PathBuf>,
    decision_threshold: Option<f64>,
    model_policy: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ComplianceConfigFile {
    setback_meters: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct ScoringConfigFile {
    type_base: Option<BTreeMap<String, f64>>,
    distance_horizon_meters: Option<f64>,
    unknown_distance_points: Option<f64>,
    area_pixels_per_point: Option<f64>,
    violation_base_points: Option<f64>,
    violation_points_per_meter: Option<f64>,
    compliant_points: Option<f64>,
    unknown_compliance_points: Option<f64>,
    levels: Option<LevelsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct LevelsConfigFile {
    medium: Option<f64>,
    high: Option<f64>,
    critical: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DispatchConfigFile {
    alert_min_level: Option<String>,
    ticket_min_level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    sms: Option<ChannelConfigFile>,
    email: Option<ChannelConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ChannelConfigFile {
    enabled: Option<bool>,
    to: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    reports_dir: Option<PathBuf>,
    work_orders_db: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    pub model_path: PathBuf,
    pub decision_threshold: f64,
    pub model_policy: ModelPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    pub reports_dir: PathBuf,
    pub work_orders_db: String,
}

/// Validated engine configuration. Loaded once at startup, read-only after.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub extraction: ExtractionSettings,
    pub classifier: ClassifierSettings,
    pub setback_meters: f64,
    pub scoring: ScoringSettings,
    pub dispatch: DispatchSettings,
    pub alerts: AlertSettings,
    pub storage: StorageSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extraction: ExtractionSettings::default(),
            classifier: ClassifierSettings {
                model_path: PathBuf::from(DEFAULT_MODEL_PATH),
                decision_threshold: DEFAULT_DECISION_THRESHOLD,
                model_policy: ModelPolicy::default(),
            },
            setback_meters: DEFAULT_SETBACK_METERS,
            scoring: ScoringSettings::default(),
            dispatch: DispatchSettings::default(),
            alerts: AlertSettings::default(),
            storage: StorageSettings {
                reports_dir: PathBuf::from(DEFAULT_REPORTS_DIR),
                work_orders_db: DEFAULT_WORK_ORDERS_DB.to_string(),
            },
        }
    }
}

impl EngineConfig {
    /// Load from `CORRIDOR_WATCH_CONFIG` (or defaults), apply env overrides, validate.
    pub fn load() -> CoreResult<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok().filter(|p| !p.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file; a missing explicit file is an error.
    pub fn load_from(path: Option<&Path>) -> CoreResult<Self> {
        let file_cfg = match path {
            Some(path) => Some(
                read_config_file(path).map_err(|e| CoreError::config(format!("{:#}", e)))?,
            ),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> CoreResult<Self> {
        let defaults = Self::default();

        let extraction = match file.extraction {
            Some(e) => ExtractionSettings {
                diff_threshold: e.diff_threshold.unwrap_or(defaults.extraction.diff_threshold),
                morph_kernel: e.morph_kernel.unwrap_or(defaults.extraction.morph_kernel),
                min_area: e.min_area.unwrap_or(defaults.extraction.min_area),
                max_candidates: e.max_candidates.unwrap_or(defaults.extraction.max_candidates),
            },
            None => defaults.extraction,
        };

        let classifier_file = file.classifier.unwrap_or_default();
        let classifier = ClassifierSettings {
            model_path: classifier_file
                .model_path
                .unwrap_or(defaults.classifier.model_path),
            decision_threshold: classifier_file
                .decision_threshold
                .unwrap_or(defaults.classifier.decision_threshold),
            model_policy: match classifier_file.model_policy.as_deref() {
                Some(raw) => parse_policy(raw)?,
                None => defaults.classifier.model_policy,
            },
        };

        let setback_meters = file
            .compliance
            .and_then(|c| c.setback_meters)
            .unwrap_or(defaults.setback_meters);

        let scoring = match file.scoring {
            Some(s) => scoring_from_file(s, defaults.scoring)?,
            None => defaults.scoring,
        };

        let dispatch_file = file.dispatch.unwrap_or_default();
        let dispatch = DispatchSettings {
            alert_min_level: match dispatch_file.alert_min_level.as_deref() {
                Some(raw) => parse_level("dispatch.alert_min_level", raw)?,
                None => defaults.dispatch.alert_min_level,
            },
            ticket_min_level: match dispatch_file.ticket_min_level.as_deref() {
                Some(raw) => parse_level("dispatch.ticket_min_level", raw)?,
                None => defaults.dispatch.ticket_min_level,
            },
        };

        let alerts_file = file.alerts.unwrap_or_default();
        let alerts = AlertSettings {
            sms: channel_from_file(alerts_file.sms),
            email: channel_from_file(alerts_file.email),
        };

        let storage_file = file.storage.unwrap_or_default();
        let storage = StorageSettings {
            reports_dir: storage_file
                .reports_dir
                .unwrap_or(defaults.storage.reports_dir),
            work_orders_db: storage_file
                .work_orders_db
                .unwrap_or(defaults.storage.work_orders_db),
        };

        Ok(Self {
            extraction,
            classifier,
            setback_meters,
            scoring,
            dispatch,
            alerts,
            storage,
        })
    }

    fn apply_env(&mut self) -> CoreResult<()> {
        if let Ok(path) = std::env::var("CORRIDOR_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.classifier.model_path = PathBuf::from(path);
            }
        }
        if let Ok(policy) = std::env::var("CORRIDOR_MODEL_POLICY") {
            if !policy.trim().is_empty() {
                self.classifier.model_policy = parse_policy(&policy)?;
            }
        }
        if let Ok(dir) = std::env::var("CORRIDOR_REPORTS_DIR") {
            if !dir.trim().is_empty() {
                self.storage.reports_dir = PathBuf::from(dir);
            }
        }
        if let Ok(db) = std::env::var("CORRIDOR_WORK_ORDERS_DB") {
            if !db.trim().is_empty() {
                self.storage.work_orders_db = db;
            }
        }
        if let Ok(setback) = std::env::var("CORRIDOR_SETBACK_METERS") {
            if !setback.trim().is_empty() {
                self.setback_meters = setback.trim().parse().map_err(|_| {
                    CoreError::config("CORRIDOR_SETBACK_METERS must be a number of meters")
                })?;
            }
        }
        Ok(())
    }

    /// All config errors surface here, before any run starts.
    pub fn validate(&self) -> CoreResult<()> {
        self.extraction.validate()?;
        let threshold = self.classifier.decision_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(CoreError::config(format!(
                "classifier.decision_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if !(self.setback_meters.is_finite() && self.setback_meters > 0.0) {
            return Err(CoreError::config(format!(
                "compliance.setback_meters must be finite and > 0, got {}",
                self.setback_meters
            )));
        }
        self.scoring.validate()?;
        self.alerts.validate()?;
        if self.storage.work_orders_db.trim().is_empty() {
            return Err(CoreError::config("storage.work_orders_db must not be empty"));
        }
        Ok(())
    }
}

fn scoring_from_file(
    file: ScoringConfigFile,
    defaults: ScoringSettings,
) -> CoreResult<ScoringSettings> {
    let mut type_base = defaults.type_base;
    for (label, points) in file.type_base.unwrap_or_default() {
        let kind = EncroachmentType::lookup(&label).ok_or_else(|| {
            CoreError::config(format!("scoring.type_base: unknown encroachment type {}", label))
        })?;
        type_base.points.insert(kind, points);
    }
    let levels_file = file.levels.unwrap_or_default();
    let levels = LevelThresholds {
        medium: levels_file.medium.unwrap_or(defaults.levels.medium),
        high: levels_file.high.unwrap_or(defaults.levels.high),
        critical: levels_file.critical.unwrap_or(defaults.levels.critical),
    };
    Ok(ScoringSettings {
        type_base,
        distance_horizon_meters: file
            .distance_horizon_meters
            .unwrap_or(defaults.distance_horizon_meters),
        unknown_distance_points: file
            .unknown_distance_points
            .unwrap_or(defaults.unknown_distance_points),
        area_pixels_per_point: file
            .area_pixels_per_point
            .unwrap_or(defaults.area_pixels_per_point),
        violation_base_points: file
            .violation_base_points
            .unwrap_or(defaults.violation_base_points),
        violation_points_per_meter: file
            .violation_points_per_meter
            .unwrap_or(defaults.violation_points_per_meter),
        compliant_points: file.compliant_points.unwrap_or(defaults.compliant_points),
        unknown_compliance_points: file
            .unknown_compliance_points
            .unwrap_or(defaults.unknown_compliance_points),
        levels,
    })
}

fn channel_from_file(file: Option<ChannelConfigFile>) -> ChannelSettings {
    let file = file.unwrap_or_default();
    ChannelSettings {
        enabled: file.enabled.unwrap_or(false),
        to: file
            .to
            .unwrap_or_default()
            .into_iter()
            .map(|a| a.trim().to_string())
            .collect(),
    }
}

fn parse_policy(raw: &str) -> CoreResult<ModelPolicy> {
    ModelPolicy::parse(raw).ok_or_else(|| {
        CoreError::config(format!(
            "classifier.model_policy must be fail_open or fail_closed, got {}",
            raw
        ))
    })
}

fn parse_level(field: &str, raw: &str) -> CoreResult<ThreatLevel> {
    ThreatLevel::parse(raw).ok_or_else(|| {
        CoreError::config(format!(
            "{} must be one of low, medium, high, critical; got {}",
            field, raw
        ))
    })
}

/// `.json` parses as JSON, anything else as TOML.
fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
