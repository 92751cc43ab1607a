use async_trait::async_trait;
use openmem_types::{MemoryMode, Observation, ObservationDraft, SummaryDraft};

use crate::Result;

/// One raw capture handed to the compressor
#[derive(Debug, Clone)]
pub struct CaptureInput {
    pub tool_name: String,
    pub tool_output: String,
}

/// Distills a raw capture into a typed observation body.
///
/// Implementations are wired at startup per provider; the engine only sees
/// this trait. The mode supplies the observation-type and concept
/// vocabularies the provider should steer toward.
#[async_trait]
pub trait Compressor: Send + Sync {
    async fn compress(&self, capture: &CaptureInput, mode: &MemoryMode)
    -> Result<ObservationDraft>;

    /// Provider label for logs and health reporting
    fn name(&self) -> &str;
}

/// Computes fixed-dimension embedding vectors. May be absent entirely, in
/// which case semantic search degrades to filter-only.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Candidate handed to the reranker: enough context to order by relevance
/// without refetching rows
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub id: String,
    pub title: String,
    pub snippet: String,
}

/// Reorders fused search candidates. Returns indices into the candidate
/// slice, best first; failures revert the caller to the fused order.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<usize>>;
}

/// Produces a session recap over its active observations
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, observations: &[Observation], mode: &MemoryMode)
    -> Result<SummaryDraft>;
}
