//! Postgres persistence for BenchBoard: schema bootstrap, bulk upserts and
//! read queries over an explicitly constructed [`PgPool`].

use std::future::Future;

use benchboard_core::{
    DashboardSnapshot, ExcelUpload, NewExcelUpload, Resource, ResourceSummary, Rrf, Stored,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Executor, PgPool, Row};
use thiserror::Error;
use tracing::{info, instrument, warn};

pub mod writer;

pub use writer::{
    build_upsert, plan_chunks, upsert_all, upsert_all_returning, UpsertRecord, UPSERT_CHUNK_SIZE,
};

pub const CRATE_NAME: &str = "benchboard-storage";

pub const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

pub const APP_TABLES: [&str; 4] = ["resources", "rrfs", "excel_uploads", "dashboard_metrics"];

const UNDEFINED_TABLE: &str = "42P01";

/// Advisory lock key serializing schema creation across connections.
pub const SCHEMA_LOCK_KEY: i64 = 0x6265_6e63_6862_6472;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    pub fn is_missing_relation(&self) -> bool {
        match self {
            Self::Database(err) => is_missing_relation(err),
        }
    }
}

/// True when Postgres reports a missing table (SQLSTATE 42P01) or the
/// message names a relation that does not exist.
pub fn is_missing_relation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some(UNDEFINED_TABLE) || {
                let message = db.message();
                message.contains("relation") && message.contains("does not exist")
            }
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitOutcome {
    AlreadyPresent,
    Created,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbDiagnostics {
    pub server_time: DateTime<Utc>,
    pub tables: Vec<String>,
}

pub async fn connect(
    options: PgConnectOptions,
    max_connections: u32,
) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Pool that opens connections on first use.
pub fn connect_lazy(options: PgConnectOptions, max_connections: u32) -> PgPool {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect_lazy_with(options)
}

#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the schema when any application table is absent. Safe to
    /// call on every request path, including concurrently: the check and
    /// the DDL run in one transaction holding [`SCHEMA_LOCK_KEY`].
    #[instrument(skip(self))]
    pub async fn ensure_initialized(&self) -> Result<InitOutcome, StorageError> {
        self.init_locked(false).await
    }

    /// Runs the full DDL script under the schema lock.
    pub async fn initialize(&self) -> Result<(), StorageError> {
        self.init_locked(true).await.map(|_| ())
    }

    async fn init_locked(&self, force: bool) -> Result<InitOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SCHEMA_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let present: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name::text = ANY($1)",
        )
        .bind(&APP_TABLES[..])
        .fetch_one(&mut *tx)
        .await?;
        if !force && present == APP_TABLES.len() as i64 {
            tx.commit().await?;
            return Ok(InitOutcome::AlreadyPresent);
        }

        // Same as `raw_sql(..).execute(..)`, which just forwards here; calling
        // `Executor::execute` directly keeps the future `Send` for axum handlers.
        (&mut *tx).execute(sqlx::raw_sql(SCHEMA_SQL)).await?;
        tx.commit().await?;
        info!(tables_present = present, "database schema initialized");
        Ok(InitOutcome::Created)
    }

    /// Runs `op`; if it fails on a missing relation, initializes the schema
    /// and runs it once more.
    async fn with_schema<T, E, F, Fut>(&self, op: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<StorageError>,
    {
        match op().await.map_err(Into::into) {
            Err(err) if err.is_missing_relation() => {
                warn!(error = %err, "relation missing, initializing schema and retrying");
                self.initialize().await?;
                op().await.map_err(Into::into)
            }
            other => other,
        }
    }

    pub async fn diagnostics(&self) -> Result<DbDiagnostics, StorageError> {
        let server_time: DateTime<Utc> = sqlx::query_scalar("SELECT NOW()")
            .fetch_one(&self.pool)
            .await?;
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name::text = ANY($1) \
             ORDER BY table_name",
        )
        .bind(&APP_TABLES[..])
        .fetch_all(&self.pool)
        .await?;
        Ok(DbDiagnostics {
            server_time,
            tables,
        })
    }

    pub async fn upsert_resources(&self, resources: &[Resource]) -> Result<u64, StorageError> {
        self.with_schema(|| upsert_all(&self.pool, resources)).await
    }

    pub async fn upsert_resource_summaries(
        &self,
        summaries: &[ResourceSummary],
    ) -> Result<Vec<Stored<Resource>>, StorageError> {
        self.with_schema(|| upsert_all_returning(&self.pool, summaries)).await
    }

    pub async fn upsert_rrfs(&self, rrfs: &[Rrf]) -> Result<Vec<Stored<Rrf>>, StorageError> {
        self.with_schema(|| upsert_all_returning(&self.pool, rrfs)).await
    }

    pub async fn list_resources(&self) -> Result<Vec<Stored<Resource>>, StorageError> {
        let rows = self
            .with_schema(|| {
                sqlx::query("SELECT * FROM resources ORDER BY created_at DESC, id DESC")
                    .fetch_all(&self.pool)
            })
            .await?;
        Ok(rows.iter().map(resource_from_row).collect::<Result<_, _>>()?)
    }

    pub async fn get_resource(
        &self,
        vamid: &str,
    ) -> Result<Option<Stored<Resource>>, StorageError> {
        let row = self
            .with_schema(|| {
                sqlx::query("SELECT * FROM resources WHERE vamid = $1")
                    .bind(vamid)
                    .fetch_optional(&self.pool)
            })
            .await?;
        Ok(row.as_ref().map(resource_from_row).transpose()?)
    }

    pub async fn resources_by_vamids(
        &self,
        vamids: &[String],
    ) -> Result<Vec<Stored<Resource>>, StorageError> {
        let rows = self
            .with_schema(|| {
                sqlx::query("SELECT * FROM resources WHERE vamid = ANY($1) ORDER BY vamid")
                    .bind(vamids)
                    .fetch_all(&self.pool)
            })
            .await?;
        Ok(rows.iter().map(resource_from_row).collect::<Result<_, _>>()?)
    }

    pub async fn list_vamids(&self) -> Result<Vec<String>, StorageError> {
        self.with_schema(|| {
            sqlx::query_scalar::<_, String>("SELECT vamid FROM resources ORDER BY vamid")
                .fetch_all(&self.pool)
        })
        .await
    }

    pub async fn list_rrfs(&self) -> Result<Vec<Stored<Rrf>>, StorageError> {
        let rows = self
            .with_schema(|| {
                sqlx::query("SELECT * FROM rrfs ORDER BY created_at DESC, id DESC")
                    .fetch_all(&self.pool)
            })
            .await?;
        Ok(rows.iter().map(rrf_from_row).collect::<Result<_, _>>()?)
    }

    pub async fn record_upload(
        &self,
        upload: &NewExcelUpload,
    ) -> Result<ExcelUpload, StorageError> {
        self.with_schema(|| insert_upload(&self.pool, upload)).await
    }

    pub async fn list_uploads(&self) -> Result<Vec<ExcelUpload>, StorageError> {
        let rows = self
            .with_schema(|| {
                sqlx::query("SELECT * FROM excel_uploads ORDER BY upload_date DESC, id DESC")
                    .fetch_all(&self.pool)
            })
            .await?;
        Ok(rows.iter().map(upload_from_row).collect::<Result<_, _>>()?)
    }

    /// Writes the scalar dashboard metrics to the singleton row.
    pub async fn save_dashboard_metrics(
        &self,
        snapshot: &DashboardSnapshot,
    ) -> Result<(), StorageError> {
        self.with_schema(|| write_dashboard_metrics(&self.pool, snapshot))
            .await
    }
}

async fn insert_upload(pool: &PgPool, upload: &NewExcelUpload) -> Result<ExcelUpload, sqlx::Error> {
    let row = sqlx::query(
        "INSERT INTO excel_uploads (file_name, file_size, uploaded_by, rows_processed, status) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(&upload.file_name)
    .bind(upload.file_size)
    .bind(&upload.uploaded_by)
    .bind(upload.rows_processed)
    .bind(&upload.status)
    .fetch_one(pool)
    .await?;
    upload_from_row(&row)
}

async fn write_dashboard_metrics(
    pool: &PgPool,
    snapshot: &DashboardSnapshot,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO dashboard_metrics \
         (id, total_bench, on_bench_90_plus, high_experience_count, new_this_month, \
         top_skill, updated_at) \
         VALUES (1, $1, $2, $3, $4, $5, CURRENT_TIMESTAMP) \
         ON CONFLICT (id) DO UPDATE SET \
         total_bench = EXCLUDED.total_bench, \
         on_bench_90_plus = EXCLUDED.on_bench_90_plus, \
         high_experience_count = EXCLUDED.high_experience_count, \
         new_this_month = EXCLUDED.new_this_month, \
         top_skill = EXCLUDED.top_skill, \
         updated_at = CURRENT_TIMESTAMP",
    )
    .bind(count(snapshot.total_bench))
    .bind(count(snapshot.on_bench_90_plus))
    .bind(count(snapshot.high_experience_count))
    .bind(count(snapshot.new_this_month))
    .bind(&snapshot.top_skill)
    .execute(pool)
    .await?;
    Ok(())
}

fn count(value: usize) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

pub(crate) fn resource_from_row(row: &PgRow) -> Result<Stored<Resource>, sqlx::Error> {
    Ok(Stored {
        id: row.try_get("id")?,
        record: Resource {
            vamid: row.try_get("vamid")?,
            name: row.try_get("name")?,
            joining_date: row.try_get("joining_date")?,
            grade: row.try_get("grade")?,
            current_skill: row.try_get("current_skill")?,
            primary_skill: row.try_get("primary_skill")?,
            total_exp: row.try_get("total_exp")?,
            tsc: row.try_get("tsc")?,
            account: row.try_get("account")?,
            project: row.try_get("project")?,
            allocation_status: row.try_get("allocation_status")?,
            allocation_start_date: row.try_get("allocation_start_date")?,
            allocation_end_date: row.try_get("allocation_end_date")?,
            first_level_manager: row.try_get("first_level_manager")?,
            designation: row.try_get("designation")?,
            email: row.try_get("email")?,
            sub_dept: row.try_get("sub_dept")?,
            relieving_date: row.try_get("relieving_date")?,
            resigned_on: row.try_get("resigned_on")?,
            resignation_status: row.try_get("resignation_status")?,
            second_level_manager: row.try_get("second_level_manager")?,
            vam_exp: row.try_get("vam_exp")?,
            account_summary: row.try_get("account_summary")?,
            resourcing_unit: row.try_get("resourcing_unit")?,
            workspace: row.try_get("workspace")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn rrf_from_row(row: &PgRow) -> Result<Stored<Rrf>, sqlx::Error> {
    Ok(Stored {
        id: row.try_get("id")?,
        record: Rrf {
            rrf_id: row.try_get("rrf_id")?,
            pos_title: row.try_get("pos_title")?,
            role: row.try_get("role")?,
            account: row.try_get("account")?,
            project: row.try_get("project")?,
            description: row.try_get("description")?,
            skills_required: row.try_get("skills_required")?,
            experience_required: row.try_get("experience_required")?,
            grade: row.try_get("grade")?,
            location: row.try_get("location")?,
            status: row.try_get("status")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn upload_from_row(row: &PgRow) -> Result<ExcelUpload, sqlx::Error> {
    Ok(ExcelUpload {
        id: row.try_get("id")?,
        file_name: row.try_get("file_name")?,
        file_size: row.try_get("file_size")?,
        upload_date: row.try_get("upload_date")?,
        uploaded_by: row.try_get("uploaded_by")?,
        rows_processed: row.try_get("rows_processed")?,
        status: row.try_get("status")?,
    })
}
