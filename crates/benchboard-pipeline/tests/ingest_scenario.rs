//! End-to-end ingestion against Postgres. Runs only when
//! `BENCHBOARD_TEST_DATABASE_URL` is set.

use benchboard_core::{RecordKind, UPLOAD_STATUS_COMPLETED, UPLOAD_STATUS_FAILED};
use benchboard_ingest::{AliasTable, RowMapper};
use benchboard_pipeline::{IngestError, IngestPipeline, IngestRequest};
use benchboard_storage::{connect, Store};
use chrono::Utc;
use serde_json::json;

async fn pipeline() -> Option<IngestPipeline> {
    let url = std::env::var("BENCHBOARD_TEST_DATABASE_URL").ok()?;
    let pool = connect(url.parse().expect("valid url"), 4)
        .await
        .expect("connect to test database");
    let mapper = RowMapper::new(AliasTable::builtin().expect("builtin aliases"));
    Some(IngestPipeline::new(Store::new(pool), mapper))
}

#[tokio::test]
async fn one_resource_created_one_row_skipped() {
    let Some(pipeline) = pipeline().await else {
        return;
    };
    let vamid = format!("VAM-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default());
    let rows = vec![
        json!({"VAMID": &vamid, "Name": "A", "Joining Date": 45000}),
        json!({"Name": "B"}),
    ]
    .into_iter()
    .map(|row| row.as_object().cloned().expect("object"))
    .collect();

    let report = pipeline
        .ingest(IngestRequest {
            kind: RecordKind::Resource,
            file_name: "bench.xlsx".into(),
            file_size: Some(1024),
            uploaded_by: Some("tests".into()),
            rows,
            mapping: None,
        })
        .await
        .expect("ingest");

    assert_eq!(report.rows_read, 2);
    assert_eq!(report.rows_mapped, 1);
    assert_eq!(report.rows_skipped.len(), 1);
    assert_eq!(report.rows_affected, 1);
    assert_eq!(report.upload.status, UPLOAD_STATUS_COMPLETED);
    assert_eq!(report.upload.rows_processed, Some(1));

    let stored = pipeline
        .store()
        .get_resource(&vamid)
        .await
        .expect("read back")
        .expect("resource stored");
    assert_eq!(stored.record.joining_date.to_string(), "2023-03-15");
}

#[tokio::test]
async fn failed_write_appends_a_failed_audit_row() {
    let Some(pipeline) = pipeline().await else {
        return;
    };
    let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let file_name = format!("oversized-grade-{stamp}.xlsx");
    let row = json!({
        "VAMID": format!("VAM-G-{stamp}"),
        "Name": "Long Grade",
        "Joining Date": "2024-01-15",
        "Grade": "G".repeat(64),
    });
    let rows = vec![row.as_object().cloned().expect("object")];

    let err = pipeline
        .ingest(IngestRequest {
            kind: RecordKind::Resource,
            file_name: file_name.clone(),
            file_size: Some(512),
            uploaded_by: Some("tests".into()),
            rows,
            mapping: None,
        })
        .await
        .expect_err("grade overflows VARCHAR(50)");
    assert!(
        matches!(err, IngestError::Write { kind: RecordKind::Resource, .. }),
        "{err:?}"
    );

    let uploads = pipeline.store().list_uploads().await.expect("list uploads");
    let audit = uploads
        .iter()
        .find(|u| u.file_name == file_name)
        .expect("audit row recorded");
    assert_eq!(audit.status, UPLOAD_STATUS_FAILED);
    assert_eq!(audit.rows_processed, Some(0));
    assert_eq!(audit.file_size, Some(512));
}
