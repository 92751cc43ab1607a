//! openmem-sdk: local-first persistent memory for AI coding agents.
//!
//! # Overview
//!
//! `openmem-sdk` is the host-facing facade over the open-mem engine. It
//! captures tool executions and chat messages from an agent session,
//! distills them into typed observations through an AI compressor, stores
//! them in an embedded per-project database, and hands each new session a
//! token-budgeted index of what memory exists so the agent can drill down
//! on demand.
//!
//! # Quickstart
//!
//! ```no_run
//! use openmem_sdk::{Memory, types::SearchRequest};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Open the project's memory (creates `.open-mem/memory.db` on first use)
//! let memory = Memory::builder("/path/to/project").connect().await?;
//!
//! // Capture a tool execution; it is redacted, queued, and compressed in
//! // the background
//! memory
//!     .on_tool_execute("session-1", "Bash", "cargo test: 42 passed", "call-1")
//!     .await?;
//!
//! // Search distilled memory
//! let results = memory
//!     .search(SearchRequest::new("test failures", memory.project_path()))
//!     .await?;
//! for result in &results {
//!     println!("#{} {}", result.rank, result.snippet);
//! }
//!
//! // Build the prompt fragment for a new session
//! let context = memory.session_start_context().await?;
//! println!("{context}");
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! This SDK acts as a facade over:
//! - `openmem-types`: domain models (Observation, Session, search types)
//! - `openmem-core`: redaction, layout, git worktree canonicalisation
//! - `openmem-ai`: compressor / embedder / reranker capability interfaces
//! - `openmem-store`: embedded SQLite with FTS and vector indexes
//! - `openmem-engine`: hybrid search, context assembly, revision diffs
//! - `openmem-runtime`: queue processing, events, metrics

mod client;
mod export;

pub mod types {
    pub use openmem_store::{ImportMode, MemoryStats, QueueStatus};
    pub use openmem_types::*;
}

pub use client::{HealthStatus, Memory, MemoryBuilder, SessionDetail};
pub use export::{ExportData, ImportReport};
pub use openmem_ai::{
    AiError, CaptureInput, Compressor, Embedder, RerankCandidate, Reranker, Summarizer,
};
pub use openmem_core::canonicalize_project_root;
pub use openmem_engine::FieldDiff;
pub use openmem_runtime::{
    Error, EventBus, MemoryConfig, MetricsSnapshot, ObservationEvent, Result,
};
