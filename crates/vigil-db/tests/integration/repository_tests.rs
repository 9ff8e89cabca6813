use chrono::Utc;
use vigil_core::error::AppError;
use vigil_core::job::{JobStatus, JobStatusRecord};
use vigil_core::models::{
    ContactEntry, ContactKind, ErrorLogEntry, MethodUsed, RoleCategory, StaffCandidate,
    VerificationRecord,
};
use vigil_core::traits::VerificationSink;
use vigil_db::VerificationRepository;

use crate::integration::common::setup_test_db;

fn record(url: &str, job_id: &str) -> VerificationRecord {
    VerificationRecord {
        name: "Lakeside Motors".into(),
        url: url.into(),
        is_active: true,
        resolved_url: Some(format!("{url}/home")),
        category: "Auto Dealer".into(),
        contacts: vec![
            ContactEntry::new(ContactKind::Email, "sales@lakeside.example"),
            ContactEntry::new(ContactKind::Phone, "2165551234"),
            ContactEntry::new(ContactKind::Address, "1200 Main St, Cleveland, OH 44101"),
        ],
        staff: vec![StaffCandidate {
            name: "Jane Smith".into(),
            title: Some("General Manager".into()),
            email: Some("jane@lakeside.example".into()),
            phone: None,
            photo_url: None,
            role_category: RoleCategory::Management,
            priority: 3,
            confidence: 7.5,
        }],
        method_used: Some(MethodUsed::Combined),
        checked_at: Utc::now(),
        correlation_id: "abcd1234".into(),
        job_id: job_id.into(),
    }
}

#[tokio::test]
async fn upsert_and_read_back_site() {
    let (pool, _container) = setup_test_db().await;
    let repo = VerificationRepository::new(pool);

    let rec = record("https://lakeside.example", "job-0001");
    repo.upsert_result(&rec).await.unwrap();

    let stored = repo
        .get_site("https://lakeside.example")
        .await
        .unwrap()
        .expect("site should be stored");

    assert_eq!(stored.name, "Lakeside Motors");
    assert!(stored.is_active);
    assert_eq!(stored.category, "Auto Dealer");
    assert_eq!(stored.contacts, rec.contacts);
    assert_eq!(stored.staff, rec.staff);
    assert_eq!(stored.method_used, Some(MethodUsed::Combined));
    assert_eq!(stored.address(), Some("1200 Main St, Cleveland, OH 44101"));
}

#[tokio::test]
async fn get_site_missing_returns_none() {
    let (pool, _container) = setup_test_db().await;
    let repo = VerificationRepository::new(pool);

    assert!(repo.get_site("https://nowhere.example").await.unwrap().is_none());
}

#[tokio::test]
async fn upsert_replaces_row_for_same_url() {
    let (pool, _container) = setup_test_db().await;
    let repo = VerificationRepository::new(pool.clone());

    repo.upsert_result(&record("https://lakeside.example", "job-0001"))
        .await
        .unwrap();

    let mut second = record("https://lakeside.example", "job-0002");
    second.is_active = false;
    second.staff.clear();
    second.method_used = Some(MethodUsed::Failed);
    repo.upsert_result(&second).await.unwrap();

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sites")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let stored = repo
        .get_site("https://lakeside.example")
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.is_active);
    assert!(stored.staff.is_empty());
    assert_eq!(stored.job_id, "job-0002");
}

#[tokio::test]
async fn unchanged_payload_keeps_change_timestamp() {
    let (pool, _container) = setup_test_db().await;
    let repo = VerificationRepository::new(pool);
    let url = "https://lakeside.example";

    repo.upsert_result(&record(url, "job-0001")).await.unwrap();
    let first = repo.site_changed_at(url).await.unwrap().unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    // Same payload, new run.
    repo.upsert_result(&record(url, "job-0002")).await.unwrap();
    assert_eq!(repo.site_changed_at(url).await.unwrap().unwrap(), first);

    let mut changed = record(url, "job-0003");
    changed.category = "Car Wash".into();
    repo.upsert_result(&changed).await.unwrap();
    assert!(repo.site_changed_at(url).await.unwrap().unwrap() > first);
}

#[tokio::test]
async fn job_status_upsert_tracks_latest_state() {
    let (pool, _container) = setup_test_db().await;
    let repo = VerificationRepository::new(pool);

    repo.upsert_job(&JobStatusRecord::new("job-abc", JobStatus::Running))
        .await
        .unwrap();

    let running = repo.get_job("job-abc").await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert_eq!(running.total_processed, 0);
    assert_eq!(running.stats, serde_json::json!({}));

    let done = JobStatusRecord::new("job-abc", JobStatus::Completed)
        .with_counts(10, 7, 3)
        .with_stats(serde_json::json!({"total": 10, "active": 7}));
    repo.upsert_job(&done).await.unwrap();

    let stored = repo.get_job("job-abc").await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.total_processed, 10);
    assert_eq!(stored.active_count, 7);
    assert_eq!(stored.failed_count, 3);
    assert_eq!(stored.stats["active"], 7);

    assert!(repo.get_job("job-missing").await.unwrap().is_none());
}

#[tokio::test]
async fn error_log_is_scoped_to_job_and_newest_first() {
    let (pool, _container) = setup_test_db().await;
    let repo = VerificationRepository::new(pool);

    let first = ErrorLogEntry::new(
        &AppError::Timeout(30),
        "job-1",
        serde_json::json!({"url": "https://a.example"}),
    );
    repo.append_error(&first).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let second = ErrorLogEntry::new(
        &AppError::Blocked("https://b.example".into()),
        "job-1",
        serde_json::json!({"url": "https://b.example"}),
    );
    repo.append_error(&second).await.unwrap();

    let other = ErrorLogEntry::new(&AppError::RateLimitExceeded, "job-2", serde_json::json!({}));
    repo.append_error(&other).await.unwrap();

    let errors = repo.recent_errors("job-1", 10).await.unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].error_type, second.error_type);
    assert_eq!(errors[0].context["url"], "https://b.example");
    assert_eq!(errors[1].error_type, first.error_type);

    let limited = repo.recent_errors("job-1", 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}
