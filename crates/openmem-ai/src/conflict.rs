use async_trait::async_trait;
use openmem_types::{Observation, ObservationDraft};

use crate::Result;

/// Outcome of comparing a candidate against its embedding neighbours
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictDecision {
    CreateNew,
    /// The candidate refreshes an existing observation; revise the target
    Supersede(String),
    /// Near-duplicate; persist nothing
    Drop,
}

/// An active observation within the similarity band of the candidate
#[derive(Debug, Clone)]
pub struct Neighbour {
    pub observation: Observation,
    pub similarity: f32,
}

/// Decides whether a candidate creates, supersedes, or is dropped.
///
/// Listed among the pipeline's awaitable operations so an LLM-backed
/// evaluator can be wired in; the shipped evaluator is deterministic.
#[async_trait]
pub trait ConflictEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        candidate: &ObservationDraft,
        neighbours: &[Neighbour],
    ) -> Result<ConflictDecision>;
}

/// Similarity-band evaluator: the closest neighbour decides.
///
/// At or above `drop_threshold` with a matching title the candidate is a
/// duplicate; at or above `supersede_threshold` it refreshes the neighbour;
/// anything below creates a new observation.
pub struct SimilarityConflictEvaluator {
    pub supersede_threshold: f32,
    pub drop_threshold: f32,
}

impl Default for SimilarityConflictEvaluator {
    fn default() -> Self {
        Self {
            supersede_threshold: 0.90,
            drop_threshold: 0.97,
        }
    }
}

#[async_trait]
impl ConflictEvaluator for SimilarityConflictEvaluator {
    async fn evaluate(
        &self,
        candidate: &ObservationDraft,
        neighbours: &[Neighbour],
    ) -> Result<ConflictDecision> {
        let best = neighbours
            .iter()
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity));

        let Some(best) = best else {
            return Ok(ConflictDecision::CreateNew);
        };

        if best.similarity >= self.drop_threshold
            && best.observation.title.eq_ignore_ascii_case(&candidate.title)
        {
            return Ok(ConflictDecision::Drop);
        }
        if best.similarity >= self.supersede_threshold {
            return Ok(ConflictDecision::Supersede(best.observation.id.clone()));
        }
        Ok(ConflictDecision::CreateNew)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use openmem_types::{ObservationType, Scope};

    fn observation(id: &str, title: &str) -> Observation {
        Observation {
            id: id.into(),
            session_id: "s1".into(),
            scope: Scope::Project,
            observation_type: ObservationType::Discovery,
            title: title.into(),
            subtitle: None,
            narrative: "n".into(),
            facts: vec![],
            concepts: vec![],
            files_read: vec![],
            files_modified: vec![],
            raw_tool_output: None,
            tool_name: None,
            created_at: Utc::now(),
            token_count: 1,
            discovery_tokens: 1,
            importance: 3,
            revision_of: None,
            superseded_by: None,
            superseded_at: None,
            deleted_at: None,
        }
    }

    fn draft(title: &str) -> ObservationDraft {
        ObservationDraft {
            observation_type: ObservationType::Discovery,
            title: title.into(),
            subtitle: None,
            narrative: "n".into(),
            facts: vec![],
            concepts: vec![],
            files_read: vec![],
            files_modified: vec![],
            importance: 3,
        }
    }

    #[tokio::test]
    async fn no_neighbours_creates_new() {
        let evaluator = SimilarityConflictEvaluator::default();
        let decision = evaluator.evaluate(&draft("t"), &[]).await.unwrap();
        assert_eq!(decision, ConflictDecision::CreateNew);
    }

    #[tokio::test]
    async fn near_duplicate_with_same_title_drops() {
        let evaluator = SimilarityConflictEvaluator::default();
        let neighbours = vec![Neighbour {
            observation: observation("o1", "Same Title"),
            similarity: 0.98,
        }];
        let decision = evaluator
            .evaluate(&draft("same title"), &neighbours)
            .await
            .unwrap();
        assert_eq!(decision, ConflictDecision::Drop);
    }

    #[tokio::test]
    async fn close_neighbour_supersedes() {
        let evaluator = SimilarityConflictEvaluator::default();
        let neighbours = vec![
            Neighbour {
                observation: observation("o1", "a"),
                similarity: 0.91,
            },
            Neighbour {
                observation: observation("o2", "b"),
                similarity: 0.93,
            },
        ];
        let decision = evaluator.evaluate(&draft("c"), &neighbours).await.unwrap();
        assert_eq!(decision, ConflictDecision::Supersede("o2".into()));
    }

    #[tokio::test]
    async fn distant_neighbour_creates_new() {
        let evaluator = SimilarityConflictEvaluator::default();
        let neighbours = vec![Neighbour {
            observation: observation("o1", "a"),
            similarity: 0.5,
        }];
        let decision = evaluator.evaluate(&draft("c"), &neighbours).await.unwrap();
        assert_eq!(decision, ConflictDecision::CreateNew);
    }
}
