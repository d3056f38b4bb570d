//! Excel Row Mapper: turns loosely-headed spreadsheet rows into canonical
//! resource and RRF records.
//!
//! Header resolution is driven by an ordered alias table (`aliases.yaml`):
//! for each canonical field the first alias present in the row wins. Rows
//! missing a mandatory field are skipped with a reason rather than failing
//! the batch.

use std::fmt;
use std::path::{Path, PathBuf};

use benchboard_core::{
    BenchDigest, ColumnMapping, RecordKind, Resource, Rrf, RrfDigest, DEFAULT_RRF_STATUS,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

pub mod dates;
pub mod workbook;

pub use dates::{from_excel_serial, parse_date, parse_date_text};
pub use workbook::{read_first_sheet, read_first_sheet_from_bytes};

pub const CRATE_NAME: &str = "benchboard-ingest";

const BUILTIN_ALIASES: &str = include_str!("../aliases.yaml");

pub const RESOURCE_FIELDS: [&str; 25] = [
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

pub const RRF_FIELDS: [&str; 10] = [
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
];

/// One spreadsheet row: header -> cell value.
pub type RawRow = Map<String, Value>;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("reading alias table {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing alias table")]
    Yaml(#[from] serde_yaml::Error),
    #[error("alias table has no entry for {kind} field `{field}`")]
    MissingField { kind: RecordKind, field: &'static str },
    #[error("alias table lists unknown {kind} field `{field}`")]
    UnknownField { kind: RecordKind, field: String },
    #[error("alias table entry for {kind} field `{field}` has no aliases")]
    EmptyAliases { kind: RecordKind, field: String },
    #[error("opening workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("workbook contains no worksheets")]
    NoWorksheet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAliases {
    pub field: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasTable {
    pub resource: Vec<FieldAliases>,
    pub rrf: Vec<FieldAliases>,
}

impl AliasTable {
    /// The alias table compiled into the crate.
    pub fn builtin() -> Result<Self, MappingError> {
        Self::from_yaml_str(BUILTIN_ALIASES)
    }

    pub fn load(path: &Path) -> Result<Self, MappingError> {
        let data = std::fs::read_to_string(path).map_err(|source| MappingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&data)
    }

    pub fn from_yaml_str(data: &str) -> Result<Self, MappingError> {
        let table: Self = serde_yaml::from_str(data)?;
        table.validate()?;
        Ok(table)
    }

    fn validate(&self) -> Result<(), MappingError> {
        for (kind, entries, known) in [
            (RecordKind::Resource, &self.resource, &RESOURCE_FIELDS[..]),
            (RecordKind::Rrf, &self.rrf, &RRF_FIELDS[..]),
        ] {
            for entry in entries {
                if !known.contains(&entry.field.as_str()) {
                    return Err(MappingError::UnknownField {
                        kind,
                        field: entry.field.clone(),
                    });
                }
                if entry.aliases.iter().all(|a| a.trim().is_empty()) {
                    return Err(MappingError::EmptyAliases {
                        kind,
                        field: entry.field.clone(),
                    });
                }
            }
            if let Some(field) = known
                .iter()
                .copied()
                .find(|f| !entries.iter().any(|e| e.field == *f))
            {
                return Err(MappingError::MissingField { kind, field });
            }
        }
        Ok(())
    }

    fn entries(&self, kind: RecordKind) -> &[FieldAliases] {
        match kind {
            RecordKind::Resource => &self.resource,
            RecordKind::Rrf => &self.rrf,
        }
    }

    pub fn aliases(&self, kind: RecordKind, field: &str) -> &[String] {
        self.entries(kind)
            .iter()
            .find(|e| e.field == field)
            .map(|e| e.aliases.as_slice())
            .unwrap_or(&[])
    }

    /// Canonical labels offered to the column-mapping suggestion: the first
    /// alias of every resource field, in table order.
    pub fn data_fields(&self) -> Vec<String> {
        self.resource
            .iter()
            .filter_map(|e| e.aliases.first().cloned())
            .collect()
    }

    /// Returns a copy where each user-confirmed column is tried before the
    /// built-in aliases of the field whose aliases contain the mapping label.
    pub fn with_column_mapping(&self, mapping: &ColumnMapping) -> Self {
        let mut table = self.clone();
        for (label, column) in mapping {
            let Some(column) = column.as_deref().map(str::trim).filter(|c| !c.is_empty()) else {
                continue;
            };
            for entry in table.resource.iter_mut().chain(table.rrf.iter_mut()) {
                if entry
                    .aliases
                    .iter()
                    .any(|alias| alias.eq_ignore_ascii_case(label.trim()))
                {
                    entry.aliases.retain(|alias| alias != column);
                    entry.aliases.insert(0, column.to_string());
                }
            }
        }
        table
    }
}

/// Why a row produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "reason", content = "field")]
pub enum SkipReason {
    MissingField(String),
    InvalidDate(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "missing required field `{field}`"),
            Self::InvalidDate(field) => write!(f, "missing or invalid date in `{field}`"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRow {
    pub index: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedBatch<T> {
    pub records: Vec<T>,
    pub skipped: Vec<SkippedRow>,
}

#[derive(Debug, Clone)]
pub struct RowMapper {
    aliases: AliasTable,
}

impl RowMapper {
    pub fn new(aliases: AliasTable) -> Self {
        Self { aliases }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Mapper whose alias table honors a confirmed column mapping.
    pub fn with_column_mapping(&self, mapping: &ColumnMapping) -> Self {
        Self::new(self.aliases.with_column_mapping(mapping))
    }

    fn value<'r>(&self, row: &'r RawRow, kind: RecordKind, field: &str) -> Option<&'r Value> {
        self.aliases
            .aliases(kind, field)
            .iter()
            .filter_map(|alias| row.get(alias))
            .find(|value| is_present(value))
    }

    fn text(&self, row: &RawRow, kind: RecordKind, field: &str) -> Option<String> {
        self.value(row, kind, field).and_then(coerce_text)
    }

    fn int(&self, row: &RawRow, kind: RecordKind, field: &str) -> Option<i32> {
        self.value(row, kind, field).and_then(coerce_int)
    }

    fn date(&self, row: &RawRow, kind: RecordKind, field: &str) -> Option<NaiveDate> {
        self.value(row, kind, field).and_then(parse_date)
    }

    pub fn map_resource(&self, row: &RawRow) -> Result<Resource, SkipReason> {
        let kind = RecordKind::Resource;
        let text = |field: &str| self.text(row, kind, field);
        let int = |field: &str| self.int(row, kind, field);
        let date = |field: &str| self.date(row, kind, field);

        let vamid = text("vamid").ok_or_else(|| SkipReason::MissingField("vamid".into()))?;
        let name = text("name").ok_or_else(|| SkipReason::MissingField("name".into()))?;
        let joining_date =
            date("joining_date").ok_or_else(|| SkipReason::InvalidDate("joining_date".into()))?;

        Ok(Resource {
            vamid,
            name,
            joining_date,
            grade: text("grade"),
            current_skill: text("current_skill"),
            primary_skill: text("primary_skill"),
            total_exp: int("total_exp"),
            tsc: text("tsc"),
            account: text("account"),
            project: text("project"),
            allocation_status: text("allocation_status"),
            allocation_start_date: date("allocation_start_date"),
            allocation_end_date: date("allocation_end_date"),
            first_level_manager: text("first_level_manager"),
            designation: text("designation"),
            email: text("email"),
            sub_dept: text("sub_dept"),
            relieving_date: date("relieving_date"),
            resigned_on: date("resigned_on"),
            resignation_status: text("resignation_status"),
            second_level_manager: text("second_level_manager"),
            vam_exp: int("vam_exp"),
            account_summary: text("account_summary"),
            resourcing_unit: text("resourcing_unit"),
            workspace: text("workspace"),
        })
    }

    pub fn map_rrf(&self, row: &RawRow) -> Result<Rrf, SkipReason> {
        let kind = RecordKind::Rrf;
        let text = |field: &str| self.text(row, kind, field);

        let rrf_id = text("rrf_id").ok_or_else(|| SkipReason::MissingField("rrf_id".into()))?;
        Ok(Rrf {
            rrf_id,
            pos_title: text("pos_title"),
            role: text("role"),
            account: text("account"),
            project: text("project"),
            description: text("description"),
            skills_required: text("skills_required"),
            experience_required: self.int(row, kind, "experience_required"),
            grade: text("grade"),
            location: text("location"),
            status: DEFAULT_RRF_STATUS.to_string(),
        })
    }

    pub fn map_resources(&self, rows: &[RawRow]) -> MappedBatch<Resource> {
        map_batch(rows, |row| self.map_resource(row))
    }

    pub fn map_rrfs(&self, rows: &[RawRow]) -> MappedBatch<Rrf> {
        map_batch(rows, |row| self.map_rrf(row))
    }

    pub fn rrf_digest(&self, row: &RawRow) -> Option<RrfDigest> {
        let kind = RecordKind::Rrf;
        Some(RrfDigest {
            rrf_id: self.text(row, kind, "rrf_id")?,
            pos_title: self.text(row, kind, "pos_title"),
            role: self.text(row, kind, "role"),
        })
    }

    pub fn bench_digest(&self, row: &RawRow) -> Option<BenchDigest> {
        let kind = RecordKind::Resource;
        Some(BenchDigest {
            name: self.text(row, kind, "name")?,
            vamid: self.text(row, kind, "vamid")?,
            skill: self
                .text(row, kind, "current_skill")
                .or_else(|| self.text(row, kind, "primary_skill")),
        })
    }
}

fn map_batch<T>(
    rows: &[RawRow],
    map: impl Fn(&RawRow) -> Result<T, SkipReason>,
) -> MappedBatch<T> {
    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        match map(row) {
            Ok(record) => records.push(record),
            Err(reason) => {
                debug!(index, %reason, "skipping row");
                skipped.push(SkippedRow { index, reason });
            }
        }
    }
    MappedBatch { records, skipped }
}

/// Null and blank strings count as absent; numbers (including 0) and
/// booleans count as present.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Numbers truncate toward zero; non-numeric text is absent rather than
/// an error.
fn coerce_int(value: &Value) -> Option<i32> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then(|| number.trunc() as i32)
}
