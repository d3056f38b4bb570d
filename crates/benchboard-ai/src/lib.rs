//! AI Matching Gateway.
//!
//! Bench and RRF data, already reduced to digests, is rendered into prompts
//! and sent to a generative model through the [`ModelClient`] boundary. The
//! JSON reply is checked against the expected shape and returned as-is:
//! ranking order is whatever the model produced.

use async_trait::async_trait;
use benchboard_core::{
    BenchDigest, CandidateMatch, ColumnMapping, DedupOutcome, MatchSummary, RrfDigest, RrfMatches,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument};

pub mod client;
pub mod models;
pub mod prompt;

pub use client::{
    GeminiClient, GeminiConfig, ModelClient, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS,
};
pub use prompt::Prompt;

pub const CRATE_NAME: &str = "benchboard-ai";

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("model call failed: {0}")]
    Model(String),
    #[error("encoding prompt data: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("{prompt} response is not valid JSON: {source}")]
    Parse {
        prompt: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{prompt} response does not match the expected shape: {reason}")]
    Schema { prompt: &'static str, reason: String },
}

impl From<reqwest::Error> for MatchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Model(err.to_string())
    }
}

impl From<serde_json::Error> for MatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err)
    }
}

/// The matching capability the rest of the system depends on.
#[async_trait]
pub trait Matcher: Send + Sync {
    async fn best_candidate(
        &self,
        rrf: &RrfDigest,
        bench: &[BenchDigest],
    ) -> Result<CandidateMatch, MatchError>;

    async fn best_candidates_for_all(
        &self,
        rrfs: &[RrfDigest],
        bench: &[BenchDigest],
    ) -> Result<Vec<RrfMatches>, MatchError>;

    async fn summarize(&self, results: &[RrfMatches]) -> Result<MatchSummary, MatchError>;

    async fn suggest_column_mapping(
        &self,
        columns: &[String],
        data_fields: &[String],
    ) -> Result<ColumnMapping, MatchError>;

    async fn deduplicate(
        &self,
        rows: &[BenchDigest],
        previous_ids: &[String],
    ) -> Result<DedupOutcome, MatchError>;
}

/// [`Matcher`] backed by a generative model.
#[derive(Debug, Clone)]
pub struct GenerativeMatcher<C> {
    client: C,
}

impl<C: ModelClient> GenerativeMatcher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Sends `prompt` and parses the reply as JSON.
    async fn reply(&self, prompt: &Prompt) -> Result<Value, MatchError> {
        let text = self.client.generate(prompt).await?;
        debug!(
            model = self.client.model_name(),
            prompt = prompt.name,
            reply_length = text.len(),
            "model replied"
        );
        parse_json(prompt.name, &text)
    }

    async fn ask<T: DeserializeOwned>(&self, prompt: &Prompt) -> Result<T, MatchError> {
        let value = self.reply(prompt).await?;
        decode(prompt.name, value)
    }
}

fn parse_json(prompt: &'static str, text: &str) -> Result<Value, MatchError> {
    serde_json::from_str(text.trim()).map_err(|source| MatchError::Parse { prompt, source })
}

fn decode<T: DeserializeOwned>(prompt: &'static str, value: Value) -> Result<T, MatchError> {
    serde_json::from_value(value).map_err(|err| MatchError::Schema {
        prompt,
        reason: err.to_string(),
    })
}

fn check_score(prompt: &'static str, candidate: &CandidateMatch) -> Result<(), MatchError> {
    let score = candidate.suitability_score;
    if score.is_finite() && (0.0..=100.0).contains(&score) {
        Ok(())
    } else {
        Err(MatchError::Schema {
            prompt,
            reason: format!(
                "suitabilityScore {score} for {} is outside 0-100",
                candidate.candidate.vamid
            ),
        })
    }
}

/// Keys are data fields; values are column names, `null`, or the string
/// `"null"` (treated as unmapped).
fn decode_column_mapping(prompt: &'static str, value: Value) -> Result<ColumnMapping, MatchError> {
    let Value::Object(entries) = value else {
        return Err(MatchError::Schema {
            prompt,
            reason: "expected a JSON object".to_string(),
        });
    };
    entries
        .into_iter()
        .map(|(field, column)| match column {
            Value::Null => Ok((field, None)),
            Value::String(s) if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("null") => {
                Ok((field, None))
            }
            Value::String(s) => Ok((field, Some(s))),
            other => Err(MatchError::Schema {
                prompt,
                reason: format!("mapping for `{field}` is {other}, expected a string"),
            }),
        })
        .collect()
}

#[async_trait]
impl<C: ModelClient> Matcher for GenerativeMatcher<C> {
    #[instrument(skip_all, fields(rrf = %rrf.rrf_id, bench = bench.len()))]
    async fn best_candidate(
        &self,
        rrf: &RrfDigest,
        bench: &[BenchDigest],
    ) -> Result<CandidateMatch, MatchError> {
        let prompt = prompt::best_candidate(rrf, bench)?;
        let best: CandidateMatch = self.ask(&prompt).await?;
        check_score(prompt.name, &best)?;
        Ok(best)
    }

    #[instrument(skip_all, fields(rrfs = rrfs.len(), bench = bench.len()))]
    async fn best_candidates_for_all(
        &self,
        rrfs: &[RrfDigest],
        bench: &[BenchDigest],
    ) -> Result<Vec<RrfMatches>, MatchError> {
        let prompt = prompt::best_candidates_for_all(rrfs, bench)?;
        let results: Vec<RrfMatches> = self.ask(&prompt).await?;
        for candidate in results.iter().flat_map(|r| &r.candidates) {
            check_score(prompt.name, candidate)?;
        }
        info!(matched = results.len(), "rrf matching finished");
        Ok(results)
    }

    #[instrument(skip_all, fields(results = results.len()))]
    async fn summarize(&self, results: &[RrfMatches]) -> Result<MatchSummary, MatchError> {
        let prompt = prompt::summarize(results)?;
        self.ask(&prompt).await
    }

    #[instrument(skip_all, fields(columns = columns.len()))]
    async fn suggest_column_mapping(
        &self,
        columns: &[String],
        data_fields: &[String],
    ) -> Result<ColumnMapping, MatchError> {
        let prompt = prompt::column_mapping(columns, data_fields)?;
        let value = self.reply(&prompt).await?;
        decode_column_mapping(prompt.name, value)
    }

    #[instrument(skip_all, fields(rows = rows.len(), previous = previous_ids.len()))]
    async fn deduplicate(
        &self,
        rows: &[BenchDigest],
        previous_ids: &[String],
    ) -> Result<DedupOutcome, MatchError> {
        let prompt = prompt::deduplicate(rows, previous_ids)?;
        self.ask(&prompt).await
    }
}
