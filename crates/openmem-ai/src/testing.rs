//! Deterministic capability implementations for tests.
//!
//! These stand in for real providers in unit and integration tests; none of
//! them perform I/O.

use async_trait::async_trait;
use openmem_types::{MemoryMode, ObservationDraft, ObservationType};

use crate::{AiError, CaptureInput, Compressor, Embedder, RerankCandidate, Reranker, Result};

/// Compressor that deterministically shapes a draft from the capture text.
/// The first output line becomes the title.
pub struct StaticCompressor {
    pub observation_type: ObservationType,
}

impl Default for StaticCompressor {
    fn default() -> Self {
        Self {
            observation_type: ObservationType::Discovery,
        }
    }
}

#[async_trait]
impl Compressor for StaticCompressor {
    async fn compress(
        &self,
        capture: &CaptureInput,
        _mode: &MemoryMode,
    ) -> Result<ObservationDraft> {
        let title = capture
            .tool_output
            .lines()
            .next()
            .unwrap_or(&capture.tool_name)
            .chars()
            .take(80)
            .collect();
        Ok(ObservationDraft {
            observation_type: self.observation_type,
            title,
            subtitle: None,
            narrative: capture.tool_output.clone(),
            facts: vec![],
            concepts: vec![],
            files_read: vec![],
            files_modified: vec![],
            importance: 3,
        })
    }

    fn name(&self) -> &str {
        "static-compressor"
    }
}

/// Always fails with the configured error; for exercising retry paths.
pub struct FailingCompressor {
    pub retryable: bool,
}

#[async_trait]
impl Compressor for FailingCompressor {
    async fn compress(
        &self,
        _capture: &CaptureInput,
        _mode: &MemoryMode,
    ) -> Result<ObservationDraft> {
        if self.retryable {
            Err(AiError::Retryable("simulated transient failure".into()))
        } else {
            Err(AiError::Config("simulated bad credentials".into()))
        }
    }

    fn name(&self) -> &str {
        "failing-compressor"
    }
}

/// Embedder producing a stable vector from character histogram buckets.
/// Similar texts land close together; identical texts are identical.
pub struct HashEmbedder {
    pub dimension: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dimension: 16 }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut buckets = vec![0f32; self.dimension];
        for (i, b) in text.bytes().enumerate() {
            buckets[(b as usize + i) % self.dimension] += 1.0;
        }
        let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut buckets {
                *v /= norm;
            }
        }
        Ok(buckets)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Reranker that reverses the candidate order; distinguishable from the
/// identity ordering in assertions.
pub struct ReversingReranker;

#[async_trait]
impl Reranker for ReversingReranker {
    async fn rerank(&self, _query: &str, candidates: &[RerankCandidate]) -> Result<Vec<usize>> {
        Ok((0..candidates.len()).rev().collect())
    }
}

/// Reranker that always fails; callers must fall back to fused order.
pub struct FailingReranker;

#[async_trait]
impl Reranker for FailingReranker {
    async fn rerank(&self, _query: &str, _candidates: &[RerankCandidate]) -> Result<Vec<usize>> {
        Err(AiError::Retryable("simulated reranker outage".into()))
    }
}
