use corridor_watch::dispatch::{work_order_for, TicketSink};
use corridor_watch::{
    ComplianceChecker, Dispatcher, DispatchSettings, DifferenceExtractor, EncroachmentType,
    FalsePositiveFilter, GeoContext, GeoPoint, ImagePair, LogNotifier, LumaImage, ModelError,
    ModelPolicy, Pipeline, RunRequest, SqliteWorkOrderStore, ThreatLevel, ThreatScorer,
    WorkOrderStatus, WorkOrderStore,
};

fn block_pair() -> ImagePair {
    let before = LumaImage::from_luma("before", 64, 64, vec![10; 64 * 64]).unwrap();
    let mut data = vec![10u8; 64 * 64];
    for y in 20..44 {
        for x in 20..44 {
            data[y * 64 + x] = 220;
        }
    }
    let after = LumaImage::from_luma("after", 64, 64, data).unwrap();
    ImagePair::new(before, after).unwrap()
}

fn run_into(db_path: &str) -> corridor_watch::RunOutcome {
    let store = SqliteWorkOrderStore::open(db_path).unwrap();
    let dispatcher = Dispatcher::new(
        DispatchSettings::default(),
        Vec::new(),
        Box::new(LogNotifier::new()),
        Some(Box::new(store)),
    );
    let filter = FalsePositiveFilter::new(
        Err(ModelError::Missing {
            path: "none".to_string(),
        }),
        ModelPolicy::FailOpen,
        0.5,
    )
    .unwrap();
    let mut pipeline = Pipeline::new(
        Box::new(DifferenceExtractor::default()),
        filter,
        ComplianceChecker::new(15.0).unwrap(),
        ThreatScorer::default(),
        dispatcher,
    );
    pipeline
        .run(RunRequest {
            pair: block_pair(),
            encroachment_type: EncroachmentType::Structure,
            geo: GeoContext {
                site: Some(GeoPoint::new(-97.25, 35.5).unwrap()),
                site_distance_meters: Some(3.0),
                ..GeoContext::default()
            },
            timestamp_s: 1_700_000_000,
        })
        .unwrap()
}

#[test]
fn dispatched_detection_lands_in_sqlite_work_orders() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("work_orders.db");
    let db = db.to_str().unwrap();

    let outcome = run_into(db);
    let record = &outcome.report.metadata.dispatched[0];
    let ticket = record.ticket.expect("ticket created");

    let mut store = SqliteWorkOrderStore::open(db).unwrap();
    let order = store.get(ticket).unwrap().expect("persisted");
    assert_eq!(order.status, WorkOrderStatus::Open);
    assert_eq!(order.priority, ThreatLevel::Critical);
    assert_eq!(order.latitude, Some(35.5));
    assert_eq!(order.longitude, Some(-97.25));
    assert!(order.title.contains("structure"));
    assert!(order.description.contains(outcome.run_id().as_str()));
    assert_eq!(order.created_at, 1_700_000_000);

    store.update_status(ticket, WorkOrderStatus::InProgress).unwrap();
    assert_eq!(
        store.get(ticket).unwrap().unwrap().status,
        WorkOrderStatus::InProgress
    );
    assert!(store.list(Some(WorkOrderStatus::Open)).unwrap().is_empty());
}

#[test]
fn work_order_fields_follow_the_detection() {
    let outcome = run_into(":memory:");
    let result = &outcome.results()[0];
    let order = work_order_for(result, Some("reports/x.json"));
    assert_eq!(order.priority, result.assessment.level);
    assert_eq!(order.evidence.as_deref(), Some("reports/x.json"));
    assert!(order.description.contains(&result.headline()));

    let mut store = SqliteWorkOrderStore::open(":memory:").unwrap();
    let id = store.create_ticket(result, None).unwrap();
    assert!(store.get(id).unwrap().unwrap().evidence.is_none());
}
