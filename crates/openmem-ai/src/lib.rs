mod basic;
mod chain;
mod conflict;
mod error;
mod traits;

pub mod testing;

pub use basic::{BasicExtractor, BasicSummarizer};
pub use chain::ChainedCompressor;
pub use conflict::{ConflictDecision, ConflictEvaluator, Neighbour, SimilarityConflictEvaluator};
pub use error::{AiError, Result};
pub use traits::{CaptureInput, Compressor, Embedder, RerankCandidate, Reranker, Summarizer};
