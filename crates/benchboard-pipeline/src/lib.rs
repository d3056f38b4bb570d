//! Ingestion orchestration: raw spreadsheet rows -> Excel Row Mapper ->
//! Bulk Upsert Writer -> `excel_uploads` audit row. Also refreshes the
//! dashboard metrics from stored resources.

use std::path::{Path, PathBuf};

use benchboard_core::{
    ColumnMapping, DashboardSnapshot, ExcelUpload, NewExcelUpload, RecordKind, Resource, Rrf,
    UPLOAD_STATUS_COMPLETED, UPLOAD_STATUS_FAILED,
};
use benchboard_ingest::{read_first_sheet_from_bytes, MappingError, RawRow, RowMapper, SkippedRow};
use benchboard_storage::{StorageError, Store};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "benchboard-pipeline";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Mapping(#[from] MappingError),
    #[error("writing {kind} rows from {file_name}: {source}")]
    Write {
        kind: RecordKind,
        file_name: String,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub kind: RecordKind,
    pub file_name: String,
    pub file_size: Option<i32>,
    pub uploaded_by: Option<String>,
    pub rows: Vec<RawRow>,
    /// User-confirmed column mapping applied ahead of the built-in aliases.
    pub mapping: Option<ColumnMapping>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub run_id: Uuid,
    pub kind: RecordKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub rows_read: usize,
    pub rows_mapped: usize,
    pub rows_skipped: Vec<SkippedRow>,
    pub rows_affected: u64,
    pub upload: ExcelUpload,
}

/// Mapped records of one kind, ready for the writer.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedRecords {
    Resources(Vec<Resource>),
    Rrfs(Vec<Rrf>),
}

impl PreparedRecords {
    pub fn len(&self) -> usize {
        match self {
            Self::Resources(records) => records.len(),
            Self::Rrfs(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedBatch {
    pub records: PreparedRecords,
    pub skipped: Vec<SkippedRow>,
}

/// Maps raw rows without touching the database.
pub fn prepare(
    mapper: &RowMapper,
    kind: RecordKind,
    rows: &[RawRow],
    mapping: Option<&ColumnMapping>,
) -> PreparedBatch {
    let mapper = match mapping {
        Some(mapping) => mapper.with_column_mapping(mapping),
        None => mapper.clone(),
    };
    match kind {
        RecordKind::Resource => {
            let batch = mapper.map_resources(rows);
            PreparedBatch {
                records: PreparedRecords::Resources(batch.records),
                skipped: batch.skipped,
            }
        }
        RecordKind::Rrf => {
            let batch = mapper.map_rrfs(rows);
            PreparedBatch {
                records: PreparedRecords::Rrfs(batch.records),
                skipped: batch.skipped,
            }
        }
    }
}

fn saturating_i32(value: u64) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[derive(Debug, Clone)]
pub struct IngestPipeline {
    store: Store,
    mapper: RowMapper,
}

impl IngestPipeline {
    pub fn new(store: Store, mapper: RowMapper) -> Self {
        Self { store, mapper }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn mapper(&self) -> &RowMapper {
        &self.mapper
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport, IngestError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "ingest",
            %run_id,
            kind = %request.kind,
            file = %request.file_name
        );
        self.ingest_inner(run_id, request).instrument(span).await
    }

    async fn ingest_inner(
        &self,
        run_id: Uuid,
        request: IngestRequest,
    ) -> Result<IngestReport, IngestError> {
        let started_at = Utc::now();
        let batch = prepare(
            &self.mapper,
            request.kind,
            &request.rows,
            request.mapping.as_ref(),
        );
        info!(
            rows_read = request.rows.len(),
            rows_mapped = batch.records.len(),
            rows_skipped = batch.skipped.len(),
            "rows mapped"
        );

        self.store.ensure_initialized().await?;
        let written = match &batch.records {
            PreparedRecords::Resources(records) => self.store.upsert_resources(records).await,
            PreparedRecords::Rrfs(records) => self
                .store
                .upsert_rrfs(records)
                .await
                .map(|rows| rows.len() as u64),
        };

        let rows_affected = match written {
            Ok(rows) => rows,
            Err(source) => {
                let failed = NewExcelUpload {
                    file_name: request.file_name.clone(),
                    file_size: request.file_size,
                    uploaded_by: request.uploaded_by.clone(),
                    rows_processed: Some(0),
                    status: UPLOAD_STATUS_FAILED.to_string(),
                };
                if let Err(audit_err) = self.store.record_upload(&failed).await {
                    warn!(error = %audit_err, "could not record failed upload");
                }
                return Err(IngestError::Write {
                    kind: request.kind,
                    file_name: request.file_name,
                    source,
                });
            }
        };

        let upload = self
            .store
            .record_upload(&NewExcelUpload {
                file_name: request.file_name,
                file_size: request.file_size,
                uploaded_by: request.uploaded_by,
                rows_processed: Some(saturating_i32(rows_affected)),
                status: UPLOAD_STATUS_COMPLETED.to_string(),
            })
            .await?;
        info!(rows_affected, upload_id = upload.id, "ingestion finished");

        Ok(IngestReport {
            run_id,
            kind: request.kind,
            started_at,
            finished_at: Utc::now(),
            rows_read: request.rows.len(),
            rows_mapped: batch.records.len(),
            rows_skipped: batch.skipped,
            rows_affected,
            upload,
        })
    }

    /// Reads the first worksheet of a workbook on disk and ingests it.
    pub async fn ingest_workbook(
        &self,
        kind: RecordKind,
        path: &Path,
        uploaded_by: Option<String>,
        mapping: Option<ColumnMapping>,
    ) -> Result<IngestReport, IngestError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| IngestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_size = i32::try_from(bytes.len()).ok();
        let rows = read_first_sheet_from_bytes(bytes)?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        self.ingest(IngestRequest {
            kind,
            file_name,
            file_size,
            uploaded_by,
            rows,
            mapping,
        })
        .await
    }
}

/// Recomputes dashboard metrics from stored resources and persists the
/// scalar ones to the singleton metrics row.
pub async fn refresh_dashboard(
    store: &Store,
    today: NaiveDate,
) -> Result<DashboardSnapshot, StorageError> {
    let resources: Vec<Resource> = store
        .list_resources()
        .await?
        .into_iter()
        .map(|stored| stored.record)
        .collect();
    let snapshot = DashboardSnapshot::compute(&resources, today);
    store.save_dashboard_metrics(&snapshot).await?;
    Ok(snapshot)
}
