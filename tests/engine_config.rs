use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use corridor_watch::config::EngineConfig;
use corridor_watch::{CoreError, EncroachmentType, ModelPolicy, ThreatLevel};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CORRIDOR_WATCH_CONFIG",
        "CORRIDOR_MODEL_PATH",
        "CORRIDOR_MODEL_POLICY",
        "CORRIDOR_REPORTS_DIR",
        "CORRIDOR_WORK_ORDERS_DB",
        "CORRIDOR_SETBACK_METERS",
    ] {
        std::env::remove_var(key);
    }
}

fn write_temp(suffix: &str, body: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().expect("temp config");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = EngineConfig::load().expect("load defaults");
    assert_eq!(cfg, EngineConfig::default());
    assert_eq!(cfg.extraction.diff_threshold, 30);
    assert_eq!(cfg.extraction.min_area, 200);
    assert_eq!(cfg.classifier.decision_threshold, 0.5);
    assert_eq!(cfg.classifier.model_policy, ModelPolicy::FailOpen);
    assert_eq!(cfg.setback_meters, 15.0);
    assert_eq!(cfg.dispatch.alert_min_level, ThreatLevel::High);
    assert_eq!(cfg.storage.work_orders_db, "work_orders.db");
}

#[test]
fn loads_toml_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_temp(
        ".toml",
        r#"
        [extraction]
        diff_threshold = 40
        min_area = 50

        [classifier]
        decision_threshold = 0.7
        model_policy = "fail_closed"

        [compliance]
        setback_meters = 20.0

        [scoring]
        unknown_distance_points = 10.0

        [scoring.type_base]
        structure = 39.0
        vehicle = 12.0

        [scoring.levels]
        medium = 30.0

        [dispatch]
        alert_min_level = "critical"
        ticket_min_level = "medium"

        [alerts.email]
        enabled = true
        to = ["ops@example.com", " row@example.com "]

        [storage]
        reports_dir = "out/reports"
        "#,
    );

    std::env::set_var("CORRIDOR_WATCH_CONFIG", file.path());
    std::env::set_var("CORRIDOR_SETBACK_METERS", "25");
    std::env::set_var("CORRIDOR_WORK_ORDERS_DB", "/var/lib/corridor/wo.db");

    let cfg = EngineConfig::load().expect("load config");

    assert_eq!(cfg.extraction.diff_threshold, 40);
    assert_eq!(cfg.extraction.min_area, 50);
    assert_eq!(cfg.extraction.morph_kernel, 3);
    assert_eq!(cfg.classifier.decision_threshold, 0.7);
    assert_eq!(cfg.classifier.model_policy, ModelPolicy::FailClosed);
    assert_eq!(cfg.setback_meters, 25.0);
    assert_eq!(cfg.scoring.unknown_distance_points, 10.0);
    assert_eq!(cfg.scoring.type_base.base_for(EncroachmentType::Structure), 39.0);
    assert_eq!(cfg.scoring.type_base.base_for(EncroachmentType::Vehicle), 12.0);
    assert_eq!(cfg.scoring.type_base.base_for(EncroachmentType::Road), 35.0);
    assert_eq!(cfg.scoring.levels.medium, 30.0);
    assert_eq!(cfg.scoring.levels.high, 60.0);
    assert_eq!(cfg.dispatch.alert_min_level, ThreatLevel::Critical);
    assert_eq!(cfg.dispatch.ticket_min_level, ThreatLevel::Medium);
    assert!(cfg.alerts.email.enabled);
    assert_eq!(cfg.alerts.email.to, vec!["ops@example.com", "row@example.com"]);
    assert!(!cfg.alerts.sms.enabled);
    assert_eq!(cfg.storage.reports_dir, PathBuf::from("out/reports"));
    assert_eq!(cfg.storage.work_orders_db, "/var/lib/corridor/wo.db");

    clear_env();
}

#[test]
fn loads_json_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_temp(
        ".json",
        r#"{
            "classifier": { "model_path": "models/custom.json" },
            "alerts": { "sms": { "enabled": true, "to": ["+15550100"] } }
        }"#,
    );
    std::env::set_var("CORRIDOR_MODEL_PATH", "models/override.json");

    let cfg = EngineConfig::load_from(Some(file.path())).expect("load json config");
    assert_eq!(cfg.classifier.model_path, PathBuf::from("models/override.json"));
    assert_eq!(cfg.alerts.recipients().len(), 1);

    clear_env();
}

#[test]
fn invalid_values_are_config_errors() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cases = [
        "[classifier]\ndecision_threshold = 0.0\n",
        "[classifier]\ndecision_threshold = 1.5\n",
        "[classifier]\nmodel_policy = \"sometimes\"\n",
        "[compliance]\nsetback_meters = -1.0\n",
        "[scoring.levels]\nmedium = 70.0\n",
        "[scoring.levels]\ncritical = 120.0\n",
        "[scoring.type_base]\nstructure = 90.0\n",
        "[scoring.type_base]\nspaceship = 10.0\n",
        "[dispatch]\nalert_min_level = \"severe\"\n",
        "[alerts.sms]\nenabled = true\n",
        "[extraction]\nmin_area = 0\n",
    ];
    for body in cases {
        let file = write_temp(".toml", body);
        let err = EngineConfig::load_from(Some(file.path())).unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }), "{}: {}", body, err);
    }

    std::env::set_var("CORRIDOR_SETBACK_METERS", "wide");
    assert!(matches!(
        EngineConfig::load_from(None).unwrap_err(),
        CoreError::Config { .. }
    ));

    clear_env();
}

#[test]
fn missing_explicit_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("tempdir");
    let err = EngineConfig::load_from(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn empty_env_overrides_are_ignored() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    for key in [
        "CORRIDOR_MODEL_PATH",
        "CORRIDOR_MODEL_POLICY",
        "CORRIDOR_REPORTS_DIR",
        "CORRIDOR_WORK_ORDERS_DB",
        "CORRIDOR_SETBACK_METERS",
    ] {
        std::env::set_var(key, " ");
    }
    let cfg = EngineConfig::load_from(None).expect("blank env keeps defaults");
    assert_eq!(cfg, EngineConfig::default());

    clear_env();
}
