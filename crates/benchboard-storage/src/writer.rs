//! Bulk Upsert Writer.
//!
//! Records are written in chunks of [`UPSERT_CHUNK_SIZE`], one multi-row
//! `INSERT ... ON CONFLICT (key) DO UPDATE` statement per chunk. Every
//! non-key column is replaced by the incoming value and `updated_at` is
//! refreshed. Chunks are independent statements: a failing chunk stops the
//! run but earlier chunks stay committed.

use std::collections::HashMap;

use benchboard_core::{Resource, ResourceSummary, Rrf, Stored};
use sqlx::postgres::PgRow;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use crate::{resource_from_row, rrf_from_row, StorageError};

pub const UPSERT_CHUNK_SIZE: usize = 100;

/// A record kind the writer can upsert by business key.
pub trait UpsertRecord {
    const TABLE: &'static str;
    const KEY: &'static str;
    /// Insert columns, in the order [`UpsertRecord::bind_values`] binds them.
    const COLUMNS: &'static [&'static str];

    type Output: Send;

    fn key(&self) -> &str;

    fn bind_values<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>);

    fn decode(row: &PgRow) -> Result<Self::Output, sqlx::Error>;
}

/// Collapses repeated keys to their last occurrence (keeping first-seen
/// position) and splits the result into chunks. Postgres rejects one
/// `ON CONFLICT DO UPDATE` statement touching the same row twice.
pub fn plan_chunks<R: UpsertRecord>(records: &[R]) -> Vec<Vec<&R>> {
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<&R> = Vec::with_capacity(records.len());
    for record in records {
        match positions.get(record.key()) {
            Some(&at) => unique[at] = record,
            None => {
                positions.insert(record.key(), unique.len());
                unique.push(record);
            }
        }
    }
    unique
        .chunks(UPSERT_CHUNK_SIZE)
        .map(<[&R]>::to_vec)
        .collect()
}

pub fn build_upsert<'args, R: UpsertRecord>(
    chunk: &[&'args R],
    returning: bool,
) -> QueryBuilder<'args, Postgres> {
    let mut qb = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        R::TABLE,
        R::COLUMNS.join(", ")
    ));
    qb.push_values(chunk.iter().copied(), |mut row, record| {
        record.bind_values(&mut row)
    });

    let updates = R::COLUMNS
        .iter()
        .filter(|column| **column != R::KEY)
        .map(|column| format!("{column} = EXCLUDED.{column}"))
        .collect::<Vec<_>>()
        .join(", ");
    qb.push(format!(
        " ON CONFLICT ({}) DO UPDATE SET {updates}, updated_at = CURRENT_TIMESTAMP",
        R::KEY
    ));
    if returning {
        qb.push(" RETURNING *");
    }
    qb
}

/// Upserts every record and returns the summed affected-row count.
pub async fn upsert_all<R: UpsertRecord + Sync>(
    pool: &PgPool,
    records: &[R],
) -> Result<u64, StorageError> {
    let mut affected = 0;
    for (index, chunk) in plan_chunks(records).iter().enumerate() {
        let mut qb = build_upsert(chunk, false);
        let rows = qb.build().execute(pool).await?.rows_affected();
        debug!(table = R::TABLE, chunk = index, size = chunk.len(), rows, "upserted chunk");
        affected += rows;
    }
    Ok(affected)
}

/// Like [`upsert_all`] but returns the written rows.
pub async fn upsert_all_returning<R: UpsertRecord + Sync>(
    pool: &PgPool,
    records: &[R],
) -> Result<Vec<R::Output>, StorageError> {
    let mut written = Vec::with_capacity(records.len());
    for (index, chunk) in plan_chunks(records).iter().enumerate() {
        let mut qb = build_upsert(chunk, true);
        let rows = qb.build().fetch_all(pool).await?;
        debug!(
            table = R::TABLE,
            chunk = index,
            size = chunk.len(),
            rows = rows.len(),
            "upserted chunk"
        );
        for row in &rows {
            written.push(R::decode(row)?);
        }
    }
    Ok(written)
}

impl UpsertRecord for Resource {
    const TABLE: &'static str = "resources";
    const KEY: &'static str = "vamid";
    const COLUMNS: &'static [&'static str] = &[
        "vamid",
        "name",
        "joining_date",
        "grade",
        "current_skill",
        "primary_skill",
        "total_exp",
        "tsc",
        "account",
        "project",
        "allocation_status",
        "allocation_start_date",
        "allocation_end_date",
        "first_level_manager",
        "designation",
        "email",
        "sub_dept",
        "relieving_date",
        "resigned_on",
        "resignation_status",
        "second_level_manager",
        "vam_exp",
        "account_summary",
        "resourcing_unit",
        "workspace",
    ];

    type Output = Stored<Resource>;

    fn key(&self) -> &str {
        &self.vamid
    }

    fn bind_values<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(&self.vamid)
            .push_bind(&self.name)
            .push_bind(self.joining_date)
            .push_bind(&self.grade)
            .push_bind(&self.current_skill)
            .push_bind(&self.primary_skill)
            .push_bind(self.total_exp)
            .push_bind(&self.tsc)
            .push_bind(&self.account)
            .push_bind(&self.project)
            .push_bind(&self.allocation_status)
            .push_bind(self.allocation_start_date)
            .push_bind(self.allocation_end_date)
            .push_bind(&self.first_level_manager)
            .push_bind(&self.designation)
            .push_bind(&self.email)
            .push_bind(&self.sub_dept)
            .push_bind(self.relieving_date)
            .push_bind(self.resigned_on)
            .push_bind(&self.resignation_status)
            .push_bind(&self.second_level_manager)
            .push_bind(self.vam_exp)
            .push_bind(&self.account_summary)
            .push_bind(&self.resourcing_unit)
            .push_bind(&self.workspace);
    }

    fn decode(row: &PgRow) -> Result<Self::Output, sqlx::Error> {
        resource_from_row(row)
    }
}

/// Upserting a summary only replaces the seven summary columns; extended HR
/// attributes of an existing row are left alone.
impl UpsertRecord for ResourceSummary {
    const TABLE: &'static str = "resources";
    const KEY: &'static str = "vamid";
    const COLUMNS: &'static [&'static str] = &[
        "vamid",
        "name",
        "joining_date",
        "grade",
        "current_skill",
        "primary_skill",
        "total_exp",
    ];

    type Output = Stored<Resource>;

    fn key(&self) -> &str {
        &self.vamid
    }

    fn bind_values<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(&self.vamid)
            .push_bind(&self.name)
            .push_bind(self.joining_date)
            .push_bind(&self.grade)
            .push_bind(&self.current_skill)
            .push_bind(&self.primary_skill)
            .push_bind(self.total_exp);
    }

    fn decode(row: &PgRow) -> Result<Self::Output, sqlx::Error> {
        resource_from_row(row)
    }
}

impl UpsertRecord for Rrf {
    const TABLE: &'static str = "rrfs";
    const KEY: &'static str = "rrf_id";
    const COLUMNS: &'static [&'static str] = &[
        "rrf_id",
        "pos_title",
        "role",
        "account",
        "project",
        "description",
        "skills_required",
        "experience_required",
        "grade",
        "location",
        "status",
    ];

    type Output = Stored<Rrf>;

    fn key(&self) -> &str {
        &self.rrf_id
    }

    fn bind_values<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(&self.rrf_id)
            .push_bind(&self.pos_title)
            .push_bind(&self.role)
            .push_bind(&self.account)
            .push_bind(&self.project)
            .push_bind(&self.description)
            .push_bind(&self.skills_required)
            .push_bind(self.experience_required)
            .push_bind(&self.grade)
            .push_bind(&self.location)
            .push_bind(&self.status);
    }

    fn decode(row: &PgRow) -> Result<Self::Output, sqlx::Error> {
        rrf_from_row(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn resource(vamid: &str, name: &str) -> Resource {
        Resource::new(
            vamid,
            name,
            NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
        )
    }

    #[test]
    fn two_hundred_fifty_records_plan_three_chunks() {
        let records: Vec<Resource> = (0..250)
            .map(|i| resource(&format!("VAM{i}"), "N"))
            .collect();
        let chunks = plan_chunks(&records);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn repeated_keys_keep_the_last_values() {
        let records = vec![
            resource("VAM1", "first"),
            resource("VAM2", "other"),
            resource("VAM1", "second"),
        ];
        let chunks = plan_chunks(&records);
        assert_eq!(chunks.len(), 1);
        let names: Vec<(&str, &str)> = chunks[0]
            .iter()
            .map(|r| (r.vamid.as_str(), r.name.as_str()))
            .collect();
        assert_eq!(names, vec![("VAM1", "second"), ("VAM2", "other")]);
    }

    #[test]
    fn empty_input_plans_no_statements() {
        assert!(plan_chunks::<Rrf>(&[]).is_empty());
    }

    #[test]
    fn resource_statement_has_one_placeholder_group_per_record() {
        let records = [resource("VAM1", "A"), resource("VAM2", "B")];
        let chunk: Vec<&Resource> = records.iter().collect();
        let qb = build_upsert(&chunk, false);
        let sql = qb.sql();

        assert!(sql.starts_with("INSERT INTO resources (vamid, name, joining_date, grade,"));
        assert!(sql.contains("$50"));
        assert!(!sql.contains("$51"));
        assert!(sql.contains("ON CONFLICT (vamid) DO UPDATE SET name = EXCLUDED.name"));
        assert!(sql.contains("workspace = EXCLUDED.workspace, updated_at = CURRENT_TIMESTAMP"));
        assert!(!sql.contains("vamid = EXCLUDED.vamid"));
        assert!(!sql.contains("RETURNING"));
    }

    #[test]
    fn summary_statement_only_touches_summary_columns() {
        let summary = ResourceSummary {
            vamid: "VAM1".into(),
            name: "A".into(),
            joining_date: NaiveDate::from_ymd_opt(2024, 1, 1).expect("date"),
            grade: None,
            current_skill: None,
            primary_skill: None,
            total_exp: Some(3),
        };
        let chunk = vec![&summary];
        let qb = build_upsert(&chunk, true);
        let sql = qb.sql();

        assert!(sql.contains("total_exp = EXCLUDED.total_exp, updated_at"));
        assert!(!sql.contains("workspace"));
        assert!(sql.ends_with(" RETURNING *"));
    }

    #[test]
    fn rrf_statement_keys_on_rrf_id_and_replaces_status() {
        let rrf = Rrf::new("RRF-1");
        let chunk = vec![&rrf];
        let sql = build_upsert(&chunk, false).sql().to_string();
        assert!(sql.contains("ON CONFLICT (rrf_id)"));
        assert!(sql.contains("status = EXCLUDED.status"));
        assert!(sql.contains("$11"));
    }
}
