use std::path::PathBuf;
use std::sync::Arc;

use slotbook::engine::{conflicts, ConflictMode, Engine, EngineError};
use slotbook::model::BookingFields;
use slotbook::time::parse_date;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotbook_test_lifecycle");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn booking(user: &str, date: &str, start: &str, end: &str) -> BookingFields {
    BookingFields::new(user, date, start, end)
}

#[tokio::test]
async fn full_lifecycle() {
    let path = test_wal_path("lifecycle.wal");
    let engine = Engine::new(path.clone(), ConflictMode::Optimistic).unwrap();

    let a = engine.create(&booking("key M", "2024-12-01", "10:00", "11:00")).await.unwrap();
    let b = engine.create(&booking("key N", "2024-12-01", "11:00", "12:00")).await.unwrap();

    let err = engine
        .create(&booking("key O", "2024-12-01", "10:30", "11:30"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));

    let b = engine
        .update(
            b.id,
            &BookingFields {
                user: Some("key P".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(b.user, "key P");

    engine.delete(a.id).await.unwrap();
    let c = engine.create(&booking("key O", "2024-12-01", "10:30", "11:00")).await.unwrap();
    assert_eq!(engine.list(), vec![b.clone(), c.clone()]);
    drop(engine);

    let engine = Engine::new(path, ConflictMode::Optimistic).unwrap();
    assert_eq!(engine.list(), vec![b, c]);
}

#[tokio::test]
async fn reservations_serialize_with_wire_names() {
    let engine = Engine::new(test_wal_path("json.wal"), ConflictMode::default()).unwrap();
    let r = engine.create(&booking("key M", "2024-12-01", "09:05", "17:30")).await.unwrap();

    let json = serde_json::to_value(&r).unwrap();
    assert_eq!(json["id"], r.id.to_string());
    assert_eq!(json["user"], "key M");
    assert_eq!(json["date"], "2024-12-01");
    assert_eq!(json["startTime"], "09:05");
    assert_eq!(json["endTime"], "17:30");
}

#[tokio::test]
async fn booking_fields_accept_wire_names() {
    let fields: BookingFields = serde_json::from_str(
        r#"{"user":"key M","date":"2024-12-01","startTime":"10:00","endTime":"11:00"}"#,
    )
    .unwrap();
    let engine = Engine::new(test_wal_path("wire_fields.wal"), ConflictMode::default()).unwrap();
    let r = engine.create(&fields).await.unwrap();
    assert_eq!(r.start_time.to_string(), "10:00");

    let partial: BookingFields = serde_json::from_str(r#"{"endTime":"12:00"}"#).unwrap();
    assert_eq!(engine.update(r.id, &partial).await.unwrap().end_time.to_string(), "12:00");
}

#[tokio::test]
async fn missing_fields_are_all_reported() {
    let engine = Engine::new(test_wal_path("missing.wal"), ConflictMode::default()).unwrap();
    match engine.create(&BookingFields::default()).await {
        Err(EngineError::Validation(v)) => {
            let fields: Vec<&str> = v.iter().map(|x| x.field).collect();
            assert_eq!(fields, vec!["user", "date", "startTime", "endTime"]);
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn conflict_query_agrees_with_store() {
    let engine = Engine::new(test_wal_path("query_agrees.wal"), ConflictMode::default()).unwrap();
    engine.create(&booking("a", "2024-12-01", "10:00", "11:00")).await.unwrap();
    engine.create(&booking("b", "2024-12-01", "13:00", "14:00")).await.unwrap();

    let day = parse_date("2024-12-01").unwrap();
    let existing = engine.list_by_date(day).await;
    let probe = |s: &str, e: &str| {
        let f = booking("x", "2024-12-01", s, e);
        let v = slotbook::validate::validate_create(&f).unwrap();
        conflicts(day, &v.range, &existing)
    };
    assert!(probe("10:59", "12:00"));
    assert!(!probe("11:00", "13:00"));
    assert!(probe("12:00", "15:00"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn serialized_engine_never_double_books() {
    let engine = Arc::new(
        Engine::new(test_wal_path("never_double.wal"), ConflictMode::Serialized).unwrap(),
    );
    let mut handles = Vec::new();
    for i in 0..40u16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let start = format!("{:02}:00", 8 + i % 4);
            let end = format!("{:02}:30", 8 + i % 4);
            engine.create(&booking("u", "2024-12-01", &start, &end)).await
        }));
    }
    for h in handles {
        let _ = h.await.unwrap();
    }
    assert_eq!(engine.reservation_count(), 4);
}
