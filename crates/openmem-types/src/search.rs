use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Observation, ObservationState, ObservationType};

/// How the orchestrator gathers candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    FilterOnly,
    Semantic,
    #[default]
    Hybrid,
}

/// Retrieval signal that contributed to a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchSignal {
    Fts,
    Vector,
    Graph,
    ConceptFilter,
    FileFilter,
}

impl SearchSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSignal::Fts => "fts",
            SearchSignal::Vector => "vector",
            SearchSignal::Graph => "graph",
            SearchSignal::ConceptFilter => "concept-filter",
            SearchSignal::FileFilter => "file-filter",
        }
    }
}

/// Full search request as issued by the host or dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Mandatory: results never cross project boundaries
    pub project_path: String,
    #[serde(default)]
    pub strategy: SearchStrategy,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(rename = "type", default)]
    pub observation_type: Option<ObservationType>,
    #[serde(default)]
    pub importance_min: Option<u8>,
    #[serde(default)]
    pub importance_max: Option<u8>,
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    /// Primary concept term, merged with `concepts` when gathering
    #[serde(default)]
    pub concept: Option<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, project_path: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            project_path: project_path.into(),
            strategy: SearchStrategy::default(),
            session_id: None,
            observation_type: None,
            importance_min: None,
            importance_max: None,
            created_after: None,
            created_before: None,
            concept: None,
            concepts: Vec::new(),
            file: None,
            files: Vec::new(),
            limit: default_limit(),
            offset: 0,
        }
    }

    /// All concept terms, primary first, deduplicated
    pub fn concept_terms(&self) -> Vec<String> {
        let mut terms = Vec::new();
        if let Some(c) = &self.concept {
            terms.push(c.clone());
        }
        for c in &self.concepts {
            if !terms.contains(c) {
                terms.push(c.clone());
            }
        }
        terms
    }

    /// All file terms, primary first, deduplicated
    pub fn file_terms(&self) -> Vec<String> {
        let mut terms = Vec::new();
        if let Some(f) = &self.file {
            terms.push(f.clone());
        }
        for f in &self.files {
            if !terms.contains(f) {
                terms.push(f.clone());
            }
        }
        terms
    }
}

/// Repository-level filter set (strategy-independent)
#[derive(Debug, Clone, Default)]
pub struct ObservationFilter {
    pub session_id: Option<String>,
    pub observation_type: Option<ObservationType>,
    pub importance_min: Option<u8>,
    pub importance_max: Option<u8>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub state: ObservationState,
}

/// Per-signal contribution to a fused result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalScore {
    pub signal: SearchSignal,
    /// RRF contribution or raw signal score
    pub score: f64,
    /// Rank within the signal's own ordering, 1-based
    pub rank: Option<usize>,
}

/// Why a result was returned
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchExplain {
    pub signals: Vec<SignalScore>,
}

/// One ranked search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub observation: Observation,
    /// 1-based position in the final ordering
    pub rank: usize,
    pub snippet: String,
    pub matched_by: Vec<SearchSignal>,
    pub vector_distance: Option<f32>,
    pub vector_similarity: Option<f32>,
    pub explain: SearchExplain,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concept_terms_merge_and_dedupe() {
        let mut req = SearchRequest::new("q", "/p");
        req.concept = Some("auth".into());
        req.concepts = vec!["auth".into(), "hooks".into()];
        assert_eq!(req.concept_terms(), vec!["auth".to_string(), "hooks".to_string()]);
    }

    #[test]
    fn default_strategy_is_hybrid() {
        let req = SearchRequest::new("q", "/p");
        assert_eq!(req.strategy, SearchStrategy::Hybrid);
    }
}
