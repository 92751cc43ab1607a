use chrono::{DateTime, SecondsFormat, Utc};
use openmem_types::Observation;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// FTS hit before fusion: the observation plus its BM25-style rank
/// (lower is better)
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub observation: Observation,
    pub rank: f64,
}

/// Observation count for one type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub observation_type: String,
    pub count: u32,
}

/// Aggregate figures for the dashboard stats surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_observations: u32,
    pub by_type: Vec<TypeCount>,
    pub total_sessions: u32,
    pub total_token_count: u64,
    pub total_discovery_tokens: u64,
}

/// Pending queue depth by status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending: u32,
    pub processing: u32,
    pub failed: u32,
}

/// How imported observations merge with existing rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Skip rows whose id already exists
    Merge,
    /// Replace rows whose id already exists
    Overwrite,
}

/// Uniform timestamp encoding: RFC 3339 UTC with microsecond precision,
/// so lexicographic order in SQL equals chronological order.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| Error::Validation(format!("invalid timestamp '{}': {}", s, err)))
}

pub(crate) fn to_json(list: &[String]) -> Result<String> {
    Ok(serde_json::to_string(list)?)
}

pub(crate) fn from_json(s: &str) -> Result<Vec<String>> {
    Ok(serde_json::from_str(s)?)
}
