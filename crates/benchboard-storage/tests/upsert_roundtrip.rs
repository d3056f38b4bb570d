//! Round trips against a live Postgres. Set `BENCHBOARD_TEST_DATABASE_URL`
//! to run them; without it every test returns early.

use benchboard_core::{NewExcelUpload, Resource, Rrf};
use benchboard_storage::{connect, InitOutcome, Store};
use chrono::{NaiveDate, Utc};
use sqlx::postgres::PgConnectOptions;
use sqlx::PgPool;

async fn test_store() -> Option<Store> {
    let url = std::env::var("BENCHBOARD_TEST_DATABASE_URL").ok()?;
    let options = url.parse().expect("valid BENCHBOARD_TEST_DATABASE_URL");
    let pool = connect(options, 4).await.expect("connect to test database");
    Some(Store::new(pool))
}

fn run_prefix() -> String {
    format!("T{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

fn resource(vamid: String, name: &str, grade: &str) -> Resource {
    let mut r = Resource::new(vamid, name, NaiveDate::from_ymd_opt(2024, 2, 1).expect("date"));
    r.grade = Some(grade.to_string());
    r
}

#[tokio::test]
async fn init_twice_second_call_is_a_no_op() {
    let Some(store) = test_store().await else {
        return;
    };
    store.ensure_initialized().await.expect("first init");
    let second = store.ensure_initialized().await.expect("second init");
    assert_eq!(second, InitOutcome::AlreadyPresent);
}

#[tokio::test]
async fn resubmitting_a_batch_is_idempotent_and_last_write_wins() {
    let Some(store) = test_store().await else {
        return;
    };
    store.ensure_initialized().await.expect("init");
    let prefix = run_prefix();

    let first: Vec<Resource> = (0..250)
        .map(|i| resource(format!("{prefix}-{i}"), "first", "G6"))
        .collect();
    let affected = store.upsert_resources(&first).await.expect("first upsert");
    assert_eq!(affected, 250);

    let vamids: Vec<String> = first.iter().map(|r| r.vamid.clone()).collect();
    let second: Vec<Resource> = vamids
        .iter()
        .map(|v| resource(v.clone(), "second", "G7"))
        .collect();
    let affected = store.upsert_resources(&second).await.expect("second upsert");
    assert!(affected <= 250);

    let stored = store.resources_by_vamids(&vamids).await.expect("read back");
    assert_eq!(stored.len(), 250);
    assert!(stored.iter().all(|s| s.record.name == "second"));
    assert!(stored.iter().all(|s| s.record.grade.as_deref() == Some("G7")));
}

#[tokio::test]
async fn rrf_upsert_returns_rows_and_uploads_are_appended() {
    let Some(store) = test_store().await else {
        return;
    };
    store.ensure_initialized().await.expect("init");
    let prefix = run_prefix();

    let mut rrf = Rrf::new(format!("{prefix}-RRF"));
    rrf.pos_title = Some("Platform Engineer".into());
    let written = store.upsert_rrfs(&[rrf.clone()]).await.expect("upsert rrf");
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].record, rrf);

    let upload = store
        .record_upload(&NewExcelUpload {
            file_name: format!("{prefix}.xlsx"),
            file_size: Some(2048),
            uploaded_by: None,
            rows_processed: Some(1),
            status: "completed".into(),
        })
        .await
        .expect("record upload");
    let uploads = store.list_uploads().await.expect("list uploads");
    assert!(uploads.iter().any(|u| u.id == upload.id));

    let missing = store.get_resource(&format!("{prefix}-absent")).await.expect("read");
    assert!(missing.is_none());
}

/// An empty schema of its own, so first-time initialization can be observed
/// without touching tables other tests use.
struct FreshSchema {
    admin: PgPool,
    name: String,
    store: Store,
}

impl FreshSchema {
    async fn create() -> Option<Self> {
        let url = std::env::var("BENCHBOARD_TEST_DATABASE_URL").ok()?;
        let options: PgConnectOptions = url.parse().expect("valid BENCHBOARD_TEST_DATABASE_URL");
        let admin = connect(options.clone(), 1).await.expect("connect to test database");
        let name = format!("bb_{}", run_prefix().to_ascii_lowercase());
        sqlx::query(&format!("CREATE SCHEMA {name}"))
            .execute(&admin)
            .await
            .expect("create schema");

        let scoped = options.options([("search_path", name.as_str())]);
        let pool = connect(scoped, 8).await.expect("connect to fresh schema");
        Some(Self {
            admin,
            name,
            store: Store::new(pool),
        })
    }

    async fn drop_table(&self, table: &str) {
        sqlx::query(&format!("DROP TABLE {}.{table}", self.name))
            .execute(&self.admin)
            .await
            .expect("drop table");
    }

    async fn cleanup(self) {
        self.store.pool().close().await;
        sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.name))
            .execute(&self.admin)
            .await
            .expect("drop schema");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_initialization_creates_the_schema_once() {
    let Some(fresh) = FreshSchema::create().await else {
        return;
    };

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = fresh.store.clone();
            tokio::spawn(async move { store.ensure_initialized().await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.expect("join").expect("concurrent init"));
    }

    let created = outcomes.iter().filter(|o| **o == InitOutcome::Created).count();
    assert_eq!(created, 1, "{outcomes:?}");
    let tables = fresh.store.diagnostics().await.expect("diagnostics").tables;
    assert_eq!(tables.len(), 4, "{tables:?}");

    fresh.cleanup().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reads_on_an_empty_schema_all_succeed() {
    let Some(fresh) = FreshSchema::create().await else {
        return;
    };

    let (resources, rrfs, uploads) = tokio::join!(
        fresh.store.list_resources(),
        fresh.store.list_rrfs(),
        fresh.store.list_uploads(),
    );
    assert!(resources.expect("resources").is_empty());
    assert!(rrfs.expect("rrfs").is_empty());
    assert!(uploads.expect("uploads").is_empty());

    fresh.cleanup().await;
}

#[tokio::test]
async fn writes_recreate_a_dropped_table() {
    let Some(fresh) = FreshSchema::create().await else {
        return;
    };
    let store = &fresh.store;
    store.ensure_initialized().await.expect("init");

    fresh.drop_table("rrfs").await;
    let written = store.upsert_rrfs(&[Rrf::new("RRF-9")]).await.expect("upsert after drop");
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].record.rrf_id, "RRF-9");

    fresh.drop_table("excel_uploads").await;
    let upload = store
        .record_upload(&NewExcelUpload {
            file_name: "bench.xlsx".into(),
            file_size: None,
            uploaded_by: None,
            rows_processed: Some(0),
            status: "completed".into(),
        })
        .await
        .expect("record upload after drop");
    assert_eq!(upload.file_name, "bench.xlsx");

    fresh.drop_table("dashboard_metrics").await;
    assert_eq!(
        store.ensure_initialized().await.expect("init after drop"),
        InitOutcome::Created
    );

    fresh.cleanup().await;
}
