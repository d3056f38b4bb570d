//! Core domain model for BenchBoard: bench resources, RRFs, upload audit
//! records, AI match results and dashboard metrics.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "benchboard-core";

pub const DEFAULT_RRF_STATUS: &str = "open";
pub const UPLOAD_STATUS_COMPLETED: &str = "completed";
pub const UPLOAD_STATUS_FAILED: &str = "failed";

/// Resources with at least this many years of total experience count as
/// high-experience on the dashboard.
pub const HIGH_EXPERIENCE_YEARS: i32 = 10;

const TOP_SKILLS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Resource,
    Rrf,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Rrf => "rrf",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown record kind `{0}` (expected `resource` or `rrf`)")]
pub struct UnknownRecordKind(pub String);

impl FromStr for RecordKind {
    type Err = UnknownRecordKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "resource" | "resources" | "bench" => Ok(Self::Resource),
            "rrf" | "rrfs" => Ok(Self::Rrf),
            other => Err(UnknownRecordKind(other.to_string())),
        }
    }
}

/// A bench employee, keyed by VAMID, with the full set of HR attributes a
/// bench report carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub vamid: String,
    pub name: String,
    pub joining_date: NaiveDate,
    pub grade: Option<String>,
    pub current_skill: Option<String>,
    pub primary_skill: Option<String>,
    pub total_exp: Option<i32>,
    pub tsc: Option<String>,
    pub account: Option<String>,
    pub project: Option<String>,
    pub allocation_status: Option<String>,
    pub allocation_start_date: Option<NaiveDate>,
    pub allocation_end_date: Option<NaiveDate>,
    pub first_level_manager: Option<String>,
    pub designation: Option<String>,
    pub email: Option<String>,
    pub sub_dept: Option<String>,
    pub relieving_date: Option<NaiveDate>,
    pub resigned_on: Option<NaiveDate>,
    pub resignation_status: Option<String>,
    pub second_level_manager: Option<String>,
    pub vam_exp: Option<i32>,
    pub account_summary: Option<String>,
    pub resourcing_unit: Option<String>,
    pub workspace: Option<String>,
}

impl Resource {
    /// Minimal record with only the mandatory fields set.
    pub fn new(vamid: impl Into<String>, name: impl Into<String>, joining_date: NaiveDate) -> Self {
        Self {
            vamid: vamid.into(),
            name: name.into(),
            joining_date,
            grade: None,
            current_skill: None,
            primary_skill: None,
            total_exp: None,
            tsc: None,
            account: None,
            project: None,
            allocation_status: None,
            allocation_start_date: None,
            allocation_end_date: None,
            first_level_manager: None,
            designation: None,
            email: None,
            sub_dept: None,
            relieving_date: None,
            resigned_on: None,
            resignation_status: None,
            second_level_manager: None,
            vam_exp: None,
            account_summary: None,
            resourcing_unit: None,
            workspace: None,
        }
    }

    /// Skill used when matching against RRFs: current skill, else primary.
    pub fn matching_skill(&self) -> Option<&str> {
        self.current_skill
            .as_deref()
            .or(self.primary_skill.as_deref())
    }
}

/// The short resource shape accepted by `POST /api/resources`. Upserting it
/// only touches these columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSummary {
    pub vamid: String,
    pub name: String,
    pub joining_date: NaiveDate,
    pub grade: Option<String>,
    pub current_skill: Option<String>,
    pub primary_skill: Option<String>,
    pub total_exp: Option<i32>,
}

/// Resource Request Form: an open staffing requisition keyed by RRF ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rrf {
    pub rrf_id: String,
    pub pos_title: Option<String>,
    pub role: Option<String>,
    pub account: Option<String>,
    pub project: Option<String>,
    pub description: Option<String>,
    pub skills_required: Option<String>,
    pub experience_required: Option<i32>,
    pub grade: Option<String>,
    pub location: Option<String>,
    #[serde(default = "default_rrf_status")]
    pub status: String,
}

impl Rrf {
    pub fn new(rrf_id: impl Into<String>) -> Self {
        Self {
            rrf_id: rrf_id.into(),
            pos_title: None,
            role: None,
            account: None,
            project: None,
            description: None,
            skills_required: None,
            experience_required: None,
            grade: None,
            location: None,
            status: default_rrf_status(),
        }
    }
}

fn default_rrf_status() -> String {
    DEFAULT_RRF_STATUS.to_string()
}

/// Audit entry for one ingestion event. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExcelUpload {
    pub file_name: String,
    pub file_size: Option<i32>,
    pub uploaded_by: Option<String>,
    pub rows_processed: Option<i32>,
    #[serde(default = "default_upload_status")]
    pub status: String,
}

fn default_upload_status() -> String {
    UPLOAD_STATUS_COMPLETED.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcelUpload {
    pub id: i32,
    pub file_name: String,
    pub file_size: Option<i32>,
    pub upload_date: NaiveDateTime,
    pub uploaded_by: Option<String>,
    pub rows_processed: Option<i32>,
    pub status: String,
}

/// A persisted record together with its surrogate id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stored<T> {
    pub id: i32,
    #[serde(flatten)]
    pub record: T,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// RRF reduced to the fields the matching prompt is allowed to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RrfDigest {
    #[serde(rename = "RRF ID")]
    pub rrf_id: String,
    #[serde(rename = "POS Title")]
    pub pos_title: Option<String>,
    #[serde(rename = "Role")]
    pub role: Option<String>,
}

impl From<&Rrf> for RrfDigest {
    fn from(rrf: &Rrf) -> Self {
        Self {
            rrf_id: rrf.rrf_id.clone(),
            pos_title: rrf.pos_title.clone(),
            role: rrf.role.clone(),
        }
    }
}

/// Bench resource reduced to the fields the matching prompt is allowed to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchDigest {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "VAMID")]
    pub vamid: String,
    #[serde(rename = "Skill")]
    pub skill: Option<String>,
}

impl From<&Resource> for BenchDigest {
    fn from(resource: &Resource) -> Self {
        Self {
            name: resource.name.clone(),
            vamid: resource.vamid.clone(),
            skill: resource.matching_skill().map(ToString::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRef {
    pub name: String,
    pub vamid: String,
}

/// One ranked candidate for an RRF. `suitability_score` is 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateMatch {
    pub candidate: CandidateRef,
    pub suitability_score: f64,
    pub justification: String,
}

/// Ranked candidates for one RRF, best first. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RrfMatches {
    pub rrf_id: String,
    pub candidates: Vec<CandidateMatch>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupOutcome {
    pub new_resource_ids: Vec<String>,
}

/// Application field label -> spreadsheet column. `None` means unmapped.
pub type ColumnMapping = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchAgeing {
    #[serde(rename = "0-30")]
    pub up_to_30: usize,
    #[serde(rename = "31-60")]
    pub up_to_60: usize,
    #[serde(rename = "61-90")]
    pub up_to_90: usize,
    pub more_than_90: usize,
}

impl BenchAgeing {
    pub fn record(&mut self, days_on_bench: i64) {
        match days_on_bench {
            d if d <= 30 => self.up_to_30 += 1,
            d if d <= 60 => self.up_to_60 += 1,
            d if d <= 90 => self.up_to_90 += 1,
            _ => self.more_than_90 += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.up_to_30 + self.up_to_60 + self.up_to_90 + self.more_than_90
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionBucket {
    pub name: String,
    pub value: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub total_bench: usize,
    pub on_bench_90_plus: usize,
    pub high_experience_count: usize,
    pub new_this_month: usize,
    pub top_skill: Option<String>,
    pub bench_ageing: BenchAgeing,
    pub grade_distribution: Vec<DistributionBucket>,
    pub skill_distribution: Vec<DistributionBucket>,
}

impl DashboardSnapshot {
    pub fn compute(resources: &[Resource], today: NaiveDate) -> Self {
        let mut bench_ageing = BenchAgeing::default();
        let mut high_experience_count = 0;
        let mut new_this_month = 0;

        for resource in resources {
            bench_ageing.record(bench_age_days(resource.joining_date, today));
            if resource
                .total_exp
                .is_some_and(|years| years >= HIGH_EXPERIENCE_YEARS)
            {
                high_experience_count += 1;
            }
            if resource.joining_date.year() == today.year()
                && resource.joining_date.month() == today.month()
            {
                new_this_month += 1;
            }
        }

        let grade_distribution = distribution(resources.iter().map(|r| r.grade.as_deref()));
        let mut skill_distribution =
            distribution(resources.iter().map(|r| r.primary_skill.as_deref()));
        skill_distribution.truncate(TOP_SKILLS);
        let top_skill = skill_distribution.first().map(|b| b.name.clone());

        Self {
            total_bench: resources.len(),
            on_bench_90_plus: bench_ageing.more_than_90,
            high_experience_count,
            new_this_month,
            top_skill,
            bench_ageing,
            grade_distribution,
            skill_distribution,
        }
    }
}

/// Days a resource has been on the bench, counted from its joining date.
pub fn bench_age_days(joining_date: NaiveDate, today: NaiveDate) -> i64 {
    (today - joining_date).num_days()
}

/// Counts non-empty values, most frequent first; ties keep first-seen order.
fn distribution<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<DistributionBucket> {
    let mut buckets: Vec<DistributionBucket> = Vec::new();
    for value in values.flatten().filter(|v| !v.trim().is_empty()) {
        match buckets.iter_mut().find(|b| b.name == value) {
            Some(bucket) => bucket.value += 1,
            None => buckets.push(DistributionBucket {
                name: value.to_string(),
                value: 1,
            }),
        }
    }
    buckets.sort_by(|a, b| b.value.cmp(&a.value));
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn resource(vamid: &str, joined: NaiveDate, grade: &str, skill: &str, exp: i32) -> Resource {
        let mut r = Resource::new(vamid, format!("Name {vamid}"), joined);
        r.grade = Some(grade.to_string());
        r.primary_skill = Some(skill.to_string());
        r.total_exp = Some(exp);
        r
    }

    #[test]
    fn resource_json_uses_camel_case_and_iso_dates() {
        let r = Resource::new("VAM1", "A", date(2023, 3, 15));
        let value = serde_json::to_value(&r).expect("serialize");
        assert_eq!(value["vamid"], "VAM1");
        assert_eq!(value["joiningDate"], "2023-03-15");
        assert!(value.get("joining_date").is_none());
    }

    #[test]
    fn rrf_status_defaults_to_open() {
        let rrf: Rrf = serde_json::from_str(r#"{"rrfId":"RRF-1","posTitle":"Java Dev"}"#)
            .expect("deserialize");
        assert_eq!(rrf.status, DEFAULT_RRF_STATUS);
        assert_eq!(rrf.pos_title.as_deref(), Some("Java Dev"));
    }

    #[test]
    fn record_kind_parses_common_spellings() {
        assert_eq!("RRF".parse::<RecordKind>(), Ok(RecordKind::Rrf));
        assert_eq!("bench".parse::<RecordKind>(), Ok(RecordKind::Resource));
        let err = "Invoice".parse::<RecordKind>().unwrap_err();
        assert_eq!(err, UnknownRecordKind("invoice".into()));
        assert_eq!(
            err.to_string(),
            "unknown record kind `invoice` (expected `resource` or `rrf`)"
        );
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn digests_serialize_with_sheet_header_names() {
        let mut r = Resource::new("VAM7", "Kiara", date(2024, 1, 2));
        r.primary_skill = Some("Mobile".into());
        let digest = BenchDigest::from(&r);
        let value = serde_json::to_value(&digest).expect("serialize");
        assert_eq!(value["VAMID"], "VAM7");
        assert_eq!(value["Skill"], "Mobile");
    }

    #[test]
    fn bench_ageing_buckets_are_inclusive_upper_bounds() {
        let mut ageing = BenchAgeing::default();
        for days in [0, 30, 31, 60, 61, 90, 91, -3] {
            ageing.record(days);
        }
        assert_eq!(ageing.up_to_30, 3);
        assert_eq!(ageing.up_to_60, 2);
        assert_eq!(ageing.up_to_90, 2);
        assert_eq!(ageing.more_than_90, 1);
        assert_eq!(ageing.total(), 8);
    }

    #[test]
    fn dashboard_snapshot_counts_and_ranks() {
        let today = date(2024, 6, 20);
        let resources = vec![
            resource("VAM1", date(2024, 6, 1), "G7", "React", 4),
            resource("VAM2", date(2024, 1, 10), "G8", "Java", 12),
            resource("VAM3", date(2024, 5, 1), "G7", "React", 10),
            resource("VAM4", date(2023, 12, 1), "G9", "Cloud", 2),
        ];

        let snapshot = DashboardSnapshot::compute(&resources, today);

        assert_eq!(snapshot.total_bench, 4);
        assert_eq!(snapshot.on_bench_90_plus, 2);
        assert_eq!(snapshot.high_experience_count, 2);
        assert_eq!(snapshot.new_this_month, 1);
        assert_eq!(snapshot.top_skill.as_deref(), Some("React"));
        assert_eq!(
            snapshot.grade_distribution,
            vec![
                DistributionBucket { name: "G7".into(), value: 2 },
                DistributionBucket { name: "G8".into(), value: 1 },
                DistributionBucket { name: "G9".into(), value: 1 },
            ]
        );
        assert_eq!(snapshot.bench_ageing.total(), 4);
    }

    #[test]
    fn skill_distribution_keeps_top_five() {
        let today = date(2024, 6, 20);
        let resources = ["A", "B", "C", "D", "E", "F", "A"]
            .iter()
            .enumerate()
            .map(|(i, skill)| resource(&format!("VAM{i}"), today, "G7", skill, 1))
            .collect::<Vec<_>>();

        let snapshot = DashboardSnapshot::compute(&resources, today);
        assert_eq!(snapshot.skill_distribution.len(), 5);
        assert_eq!(snapshot.skill_distribution[0].name, "A");
        assert_eq!(snapshot.skill_distribution[0].value, 2);
    }
}
