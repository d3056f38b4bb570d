//! Prompt templates. Data is embedded as pretty-printed JSON.

use benchboard_core::{BenchDigest, RrfDigest, RrfMatches};
use serde::Serialize;
use serde_json::{json, Value};

/// A rendered prompt plus the output schema the model is asked to honor.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub name: &'static str,
    pub text: String,
    pub response_schema: Option<Value>,
}

const BEST_CANDIDATE: &str = r#"You are an expert HR analyst specializing in matching candidates to job requirements.
You are given one RRF (Resource Request Form) describing the requirements for a role and a bench report listing available employees and their skills.
Identify the single best candidate from the bench report for the RRF. Match the bench 'Skill' against the RRF 'POS Title' and 'Role'.
Provide a suitability score between 0 and 100 and a brief justification for your choice.

RRF:
{{RRF}}

Bench report:
{{BENCH}}

Return ONLY a JSON object of this shape:
{
  "candidate": { "name": "Jane Doe", "vamid": "VAM12345" },
  "suitabilityScore": 95,
  "justification": "Five years of React, the primary skill required."
}"#;

const BEST_CANDIDATES_FOR_ALL: &str = r#"You are an expert HR analyst acting as a data processing service.
You are given two JSON arrays: RRF data and bench data.
For EACH RRF you MUST identify the top 3-5 most suitable candidates from the bench data.
Use ONLY these keys: 'RRF ID', 'POS Title' and 'Role' from the RRFs; 'Name', 'VAMID' and 'Skill' from the bench. Match the bench 'Skill' against the RRF 'POS Title' and 'Role'.
For each candidate provide the name and VAMID exactly as given in the bench data, a suitability score from 0 to 100 based on the skill match, and a brief justification.

RRF data:
{{RRFS}}

Bench data:
{{BENCH}}

Return ONLY a JSON array with one item per RRF, each containing "rrfId" and "candidates" sorted by "suitabilityScore" in descending order. No explanatory text or markdown."#;

const SUMMARIZE: &str = r#"You are an expert HR analyst. Below are the results of matching open RRFs against available bench resources.

{{RESULTS}}

Write a brief, insightful summary that covers:
- the total number of RRFs analyzed;
- how many RRFs have at least one excellent candidate (suitability score above 90);
- any RRFs without a suitable candidate;
- one concluding sentence on the state of the bench relative to the open requests.

Return ONLY a JSON object with a "summary" field."#;

const COLUMN_MAPPING: &str = r#"You are an expert data analyst specializing in mapping spreadsheet columns to application data fields.
Consider the semantic meaning of both the spreadsheet columns and the data fields.

Spreadsheet columns: {{COLUMNS}}
Data fields: {{FIELDS}}

Return ONLY a JSON object whose keys are the data fields and whose values are the matching spreadsheet column names. Use null when no column fits.
Example:
{ "VAMID": "VAMID", "Name": "Employee Name", "Joining Date": null }"#;

const DEDUPLICATE: &str = r#"You are an expert in resource management and data analysis.
You are given rows from a newly uploaded bench sheet and the VAMIDs of previously uploaded resources.
Identify the resources in the new rows that are not already present. Names and ids may differ slightly between uploads; use your judgment to decide whether a row is truly new or a variation of an existing record.

New rows:
{{ROWS}}

Previous VAMIDs:
{{PREVIOUS}}

Return ONLY a JSON object: { "newResourceIds": ["VAMID123", "VAMID456"] }"#;

fn pretty<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

fn candidate_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "candidate": {
                "type": "OBJECT",
                "properties": {
                    "name": { "type": "STRING" },
                    "vamid": { "type": "STRING" }
                },
                "required": ["name", "vamid"]
            },
            "suitabilityScore": { "type": "NUMBER" },
            "justification": { "type": "STRING" }
        },
        "required": ["candidate", "suitabilityScore", "justification"]
    })
}

pub fn best_candidate(rrf: &RrfDigest, bench: &[BenchDigest]) -> Result<Prompt, serde_json::Error> {
    Ok(Prompt {
        name: "best_candidate",
        text: BEST_CANDIDATE
            .replace("{{RRF}}", &pretty(rrf)?)
            .replace("{{BENCH}}", &pretty(bench)?),
        response_schema: Some(candidate_schema()),
    })
}

pub fn best_candidates_for_all(
    rrfs: &[RrfDigest],
    bench: &[BenchDigest],
) -> Result<Prompt, serde_json::Error> {
    Ok(Prompt {
        name: "best_candidates_for_all",
        text: BEST_CANDIDATES_FOR_ALL
            .replace("{{RRFS}}", &pretty(rrfs)?)
            .replace("{{BENCH}}", &pretty(bench)?),
        response_schema: Some(json!({
            "type": "ARRAY",
            "items": {
                "type": "OBJECT",
                "properties": {
                    "rrfId": { "type": "STRING" },
                    "candidates": { "type": "ARRAY", "items": candidate_schema() }
                },
                "required": ["rrfId", "candidates"]
            }
        })),
    })
}

pub fn summarize(results: &[RrfMatches]) -> Result<Prompt, serde_json::Error> {
    Ok(Prompt {
        name: "summarize",
        text: SUMMARIZE.replace("{{RESULTS}}", &pretty(results)?),
        response_schema: Some(json!({
            "type": "OBJECT",
            "properties": { "summary": { "type": "STRING" } },
            "required": ["summary"]
        })),
    })
}

/// No response schema: the keys are the caller's data fields.
pub fn column_mapping(columns: &[String], fields: &[String]) -> Result<Prompt, serde_json::Error> {
    Ok(Prompt {
        name: "column_mapping",
        text: COLUMN_MAPPING
            .replace("{{COLUMNS}}", &serde_json::to_string(columns)?)
            .replace("{{FIELDS}}", &serde_json::to_string(fields)?),
        response_schema: None,
    })
}

pub fn deduplicate(rows: &[BenchDigest], previous: &[String]) -> Result<Prompt, serde_json::Error> {
    Ok(Prompt {
        name: "deduplicate",
        text: DEDUPLICATE
            .replace("{{ROWS}}", &pretty(rows)?)
            .replace("{{PREVIOUS}}", &serde_json::to_string(previous)?),
        response_schema: Some(json!({
            "type": "OBJECT",
            "properties": {
                "newResourceIds": { "type": "ARRAY", "items": { "type": "STRING" } }
            },
            "required": ["newResourceIds"]
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_prompt_embeds_digests_verbatim() {
        let rrfs = vec![RrfDigest {
            rrf_id: "RRF-42".into(),
            pos_title: Some("Data Engineer".into()),
            role: None,
        }];
        let bench = vec![BenchDigest {
            name: "Asha".into(),
            vamid: "VAM9".into(),
            skill: Some("Spark".into()),
        }];
        let prompt = best_candidates_for_all(&rrfs, &bench).expect("render");

        assert!(prompt.text.contains(r#""RRF ID": "RRF-42""#));
        assert!(prompt.text.contains(r#""Skill": "Spark""#));
        assert!(!prompt.text.contains("{{"));
        assert_eq!(prompt.response_schema.as_ref().map(|s| &s["type"]), Some(&json!("ARRAY")));
    }

    #[test]
    fn column_mapping_prompt_lists_columns_and_fields() {
        let prompt = column_mapping(&["Emp Code".into()], &["VAMID".into()]).expect("render");
        assert!(prompt.text.contains(r#"Spreadsheet columns: ["Emp Code"]"#));
        assert!(prompt.text.contains(r#"Data fields: ["VAMID"]"#));
        assert!(prompt.response_schema.is_none());
    }
}
