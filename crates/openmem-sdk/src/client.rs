use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use openmem_ai::{
    BasicSummarizer, ChainedCompressor, Compressor, ConflictEvaluator, Embedder, Reranker,
    SimilarityConflictEvaluator, Summarizer,
};
use openmem_core::{Redactor, canonicalize_project_root, estimate_tokens};
use openmem_engine::{ContextOptions, FieldDiff, SearchOptions, diff_revisions};
use openmem_runtime::{
    EventBus, MemoryConfig, MetricsSnapshot, ObservationEvent, ProcessorHandle, QueueProcessor,
    Result, RuntimeMetrics, StorageLock,
};
use openmem_store::{Database, ImportMode, MemoryStats, QueueStatus};
use openmem_types::{
    MemoryMode, Observation, ObservationBody, ObservationFilter, ObservationPatch, Scope,
    SearchRequest, SearchResult, Session, SessionStatus, SessionSummary,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::export::{ExportData, ImportReport};

/// Builder for [`Memory`]. Providers are wired here; anything not supplied
/// degrades to its deterministic fallback.
pub struct MemoryBuilder {
    project_root: PathBuf,
    compressors: Vec<Arc<dyn Compressor>>,
    embedder: Option<Arc<dyn Embedder>>,
    reranker: Option<Arc<dyn Reranker>>,
    summarizer: Option<Arc<dyn Summarizer>>,
    config: Option<MemoryConfig>,
    start_processor: bool,
}

impl MemoryBuilder {
    /// User-scope store at the shared home-directory location instead of a
    /// project's `.open-mem`. The path resolves from the explicit argument,
    /// then `OPENMEM_PATH`, then the platform data directory.
    pub fn user_scope(explicit_path: Option<&str>) -> Result<Self> {
        let dir = openmem_core::user_data_dir(explicit_path)
            .map_err(|err| openmem_runtime::Error::Config(err.to_string()))?;
        Ok(Self::new(dir))
    }

    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            compressors: Vec::new(),
            embedder: None,
            reranker: None,
            summarizer: None,
            config: None,
            start_processor: true,
        }
    }

    /// Add a compression provider; order is fallback order
    pub fn with_compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressors.push(compressor);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_config(mut self, config: MemoryConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Skip the background processor; pending work is then only drained by
    /// explicit [`Memory::trigger_processing`] calls.
    pub fn without_processor(mut self) -> Self {
        self.start_processor = false;
        self
    }

    pub async fn connect(self) -> Result<Memory> {
        let project_root = canonicalize_project_root(&self.project_root);
        let project_path = project_root.to_string_lossy().to_string();

        let config = match self.config {
            Some(config) => config,
            None => MemoryConfig::load(&project_root)?,
        };
        let mode = config.resolve_active_mode(&project_root);
        let redactor = Redactor::new(&config.redaction_patterns, config.min_capture_len);

        let memory_dir = openmem_core::memory_dir(&project_root);
        let db_path = openmem_core::database_path(&project_root);
        let db = Database::open(&db_path)?;

        if self.compressors.is_empty() {
            warn!("no compression provider configured, captures use basic extraction only");
        }
        let compressor: Arc<dyn Compressor> = Arc::new(
            ChainedCompressor::new(self.compressors)
                .with_timeout(std::time::Duration::from_secs(config.ai_timeout_secs)),
        );
        let summarizer: Arc<dyn Summarizer> = self
            .summarizer
            .unwrap_or_else(|| Arc::new(BasicSummarizer));
        let conflict: Arc<dyn ConflictEvaluator> = Arc::new(SimilarityConflictEvaluator {
            supersede_threshold: config.supersede_threshold,
            drop_threshold: config.drop_threshold,
        });

        let bus = EventBus::default();
        let metrics = Arc::new(RuntimeMetrics::default());

        // A live lock means an external worker owns processing; this
        // process only signals and must not run its own pipeline.
        let daemon_active = StorageLock::held_elsewhere(&memory_dir);
        let (processor, _lock) = if self.start_processor && !daemon_active {
            let lock = StorageLock::acquire(&memory_dir)?;
            let mut processor = QueueProcessor::new(
                Database::open(&db_path)?,
                compressor.clone(),
                config.clone(),
                mode.clone(),
            );
            processor.embedder = self.embedder.clone();
            processor.summarizer = summarizer.clone();
            processor.conflict = Some(conflict.clone());
            processor.bus = bus.clone();
            processor.metrics = metrics.clone();
            (Some(processor.start()), Some(lock))
        } else {
            if daemon_active {
                info!("external memory worker holds the storage lock, running in signal-only mode");
            }
            (None, None)
        };

        Ok(Memory {
            project_root,
            project_path,
            db: Mutex::new(db),
            db_path,
            config,
            mode,
            redactor,
            compressor,
            embedder: self.embedder,
            reranker: self.reranker,
            summarizer,
            conflict,
            processor,
            _lock,
            bus,
            metrics,
        })
    }
}

/// Host-facing memory client: the capture interface on one side, the query
/// surface on the other.
pub struct Memory {
    project_root: PathBuf,
    project_path: String,
    db: Mutex<Database>,
    db_path: PathBuf,
    config: MemoryConfig,
    mode: MemoryMode,
    redactor: Redactor,
    compressor: Arc<dyn Compressor>,
    embedder: Option<Arc<dyn Embedder>>,
    reranker: Option<Arc<dyn Reranker>>,
    summarizer: Arc<dyn Summarizer>,
    conflict: Arc<dyn ConflictEvaluator>,
    processor: Option<ProcessorHandle>,
    _lock: Option<StorageLock>,
    bus: EventBus,
    metrics: Arc<RuntimeMetrics>,
}

/// A session with its observations and summary, as one fetch
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    pub session: Session,
    pub observations: Vec<Observation>,
    pub summary: Option<SessionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub database_ok: bool,
    pub queue: QueueStatus,
    pub embedding_available: bool,
    pub processor_running: bool,
}

impl Memory {
    pub fn builder(project_root: impl AsRef<Path>) -> MemoryBuilder {
        MemoryBuilder::new(project_root)
    }

    /// Canonical project path all retrieval is scoped by
    pub fn project_path(&self) -> &str {
        &self.project_path
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn mode(&self) -> &MemoryMode {
        &self.mode
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Subscribe to observation lifecycle events
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<ObservationEvent> {
        self.bus.subscribe()
    }

    // --- capture interface ------------------------------------------------

    /// Redact and enqueue a tool execution. Fire-and-forget from the host's
    /// perspective; duplicates on (session_id, call_id) are no-ops.
    pub async fn on_tool_execute(
        &self,
        session_id: &str,
        tool_name: &str,
        tool_output: &str,
        call_id: &str,
    ) -> Result<()> {
        self.metrics.record_capture();

        let Some(redacted) = self.redactor.redact(tool_output) else {
            self.metrics.record_capture_suppressed();
            debug!(session_id, tool_name, "capture suppressed after redaction");
            return Ok(());
        };

        let db = self.db.lock().await;
        db.get_or_create_session(session_id, &self.project_path)?;
        db.enqueue_pending(session_id, tool_name, &redacted, call_id)?;
        Ok(())
    }

    /// Capture a chat message. Only user messages are kept; they persist
    /// directly as `discovery` observations with the redacted text as
    /// narrative, truncated to the configured cap.
    pub async fn on_chat_message(&self, session_id: &str, role: &str, text: &str) -> Result<()> {
        if role != "user" {
            return Ok(());
        }
        self.metrics.record_capture();

        let truncated: String = text.chars().take(self.config.chat_message_cap).collect();
        let Some(redacted) = self.redactor.redact(&truncated) else {
            self.metrics.record_capture_suppressed();
            return Ok(());
        };

        let title: String = redacted
            .lines()
            .next()
            .unwrap_or("user message")
            .chars()
            .take(80)
            .collect();
        let body = ObservationBody {
            session_id: session_id.to_string(),
            scope: Scope::Project,
            observation_type: openmem_types::ObservationType::Discovery,
            title,
            subtitle: None,
            narrative: redacted.clone(),
            facts: Vec::new(),
            concepts: Vec::new(),
            files_read: Vec::new(),
            files_modified: Vec::new(),
            raw_tool_output: None,
            tool_name: None,
            token_count: estimate_tokens(&redacted),
            discovery_tokens: estimate_tokens(text),
            importance: 3,
        };

        let db = self.db.lock().await;
        db.get_or_create_session(session_id, &self.project_path)?;
        let observation = db.create_observation(&body)?;
        db.increment_session_observation_count(session_id)?;
        self.metrics.record_created();
        self.bus.emit(ObservationEvent::Created(observation));
        Ok(())
    }

    /// Lifecycle signals from the host. `session-idle` drains the queue;
    /// `session-end` completes the session and schedules its summary.
    pub async fn on_event(&self, event_type: &str, properties: &serde_json::Value) -> Result<()> {
        let session_id = properties
            .get("sessionId")
            .and_then(|v| v.as_str())
            .map(String::from);

        match event_type {
            "session-idle" => {
                if let Some(session_id) = &session_id {
                    let db = self.db.lock().await;
                    if db.get_session(session_id)?.is_some() {
                        db.set_session_status(session_id, SessionStatus::Idle)?;
                    }
                }
                self.trigger_processing().await?;
            }
            "session-end" => {
                let Some(session_id) = session_id else {
                    return Ok(());
                };
                {
                    let db = self.db.lock().await;
                    if db.get_session(&session_id)?.is_none() {
                        return Ok(());
                    }
                    db.set_session_status(&session_id, SessionStatus::Completed)?;
                }
                self.trigger_processing().await?;
                match &self.processor {
                    Some(handle) => handle.summarize(&session_id),
                    None => self.inline_processor().await?.summarize_session(&session_id).await,
                }
            }
            other => {
                debug!(event = other, "ignoring unhandled host event");
            }
        }
        Ok(())
    }

    /// Build the progressive-disclosure fragment injected at session start.
    /// Registers the session so later captures attach to it.
    pub async fn on_session_start(&self, session_id: &str) -> Result<String> {
        {
            let db = self.db.lock().await;
            db.get_or_create_session(session_id, &self.project_path)?;
        }
        self.session_start_context().await
    }

    /// The session-start fragment without session registration
    pub async fn session_start_context(&self) -> Result<String> {
        let options = self.context_options();
        let db = self.db.lock().await;
        Ok(openmem_engine::assemble_context(&db, &self.project_path, &options)?)
    }

    /// Context handed back while the host compacts a session: index lines,
    /// observation details, and key decisions under a 40/40/20 budget split.
    pub async fn on_session_compacting(&self, _session_id: &str) -> Result<Vec<String>> {
        self.compaction_context().await
    }

    /// Compaction context without the capture-interface wrapper
    pub async fn compaction_context(&self) -> Result<Vec<String>> {
        let options = self.context_options();
        let db = self.db.lock().await;
        let ctx = openmem_engine::assemble_compaction(
            &db,
            &self.project_path,
            self.config.max_context_tokens,
            &options,
        )?;
        let mut out = ctx.index;
        out.extend(ctx.details);
        out.extend(ctx.decisions);
        Ok(out)
    }

    fn context_options(&self) -> ContextOptions {
        ContextOptions {
            max_index_entries: self.config.max_index_entries,
            context_full_observation_count: self.config.context_full_observation_count,
            max_context_tokens: self.config.max_context_tokens,
            include_types: self.config.context_type_filter(),
            include_summary: true,
        }
    }

    // --- query surface ----------------------------------------------------

    /// Search distilled memory. Project isolation is applied regardless of
    /// what the request names.
    pub async fn search(&self, mut request: SearchRequest) -> Result<Vec<SearchResult>> {
        request.project_path = self.project_path.clone();
        let options = SearchOptions {
            graph_enabled: self.config.graph_search,
            rerank_max_candidates: if self.reranker.is_some() {
                self.config.reranking_max_candidates
            } else {
                0
            },
        };

        let started = Instant::now();
        let db = self.db.lock().await;
        let results = openmem_engine::search(
            &db,
            &request,
            self.embedder.as_deref(),
            self.reranker.as_deref(),
            &options,
        )
        .await?;
        self.metrics.record_search(started.elapsed());
        Ok(results)
    }

    pub async fn list_observations(
        &self,
        filter: &ObservationFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Observation>> {
        let db = self.db.lock().await;
        Ok(db.list_observations(&self.project_path, filter, limit, offset)?)
    }

    pub async fn get_observation(&self, id: &str) -> Result<Option<Observation>> {
        let db = self.db.lock().await;
        Ok(db.get_observation(id)?)
    }

    pub async fn get_observation_including_archived(
        &self,
        id: &str,
    ) -> Result<Option<Observation>> {
        let db = self.db.lock().await;
        Ok(db.get_observation_including_archived(id)?)
    }

    pub async fn get_lineage(&self, id: &str) -> Result<Vec<Observation>> {
        let db = self.db.lock().await;
        Ok(db.get_lineage(id)?)
    }

    pub async fn diff_revisions(&self, old_id: &str, new_id: &str) -> Result<Vec<FieldDiff>> {
        let db = self.db.lock().await;
        Ok(diff_revisions(&db, old_id, new_id)?)
    }

    /// Manually create an observation (dashboard path; captures normally
    /// arrive through the pipeline)
    pub async fn create_observation(&self, body: &ObservationBody) -> Result<Observation> {
        let db = self.db.lock().await;
        db.get_or_create_session(&body.session_id, &self.project_path)?;
        let observation = db.create_observation(body)?;
        db.increment_session_observation_count(&body.session_id)?;
        self.bus.emit(ObservationEvent::Created(observation.clone()));
        Ok(observation)
    }

    /// Revise an observation; the predecessor becomes inactive atomically
    pub async fn update_observation(
        &self,
        id: &str,
        patch: &ObservationPatch,
    ) -> Result<Observation> {
        let mut db = self.db.lock().await;
        let observation = db.update_observation(id, patch)?;
        self.bus.emit(ObservationEvent::Revised {
            predecessor_id: id.to_string(),
            observation: observation.clone(),
        });
        Ok(observation)
    }

    /// Tombstone an observation; it stays addressable for audit but leaves
    /// every index
    pub async fn delete_observation(&self, id: &str) -> Result<()> {
        let mut db = self.db.lock().await;
        db.delete_observation(id)?;
        self.bus.emit(ObservationEvent::Tombstoned { id: id.to_string() });
        Ok(())
    }

    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let db = self.db.lock().await;
        Ok(db.list_sessions(&self.project_path, limit)?)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionDetail>> {
        let db = self.db.lock().await;
        let Some(session) = db.get_session(session_id)? else {
            return Ok(None);
        };
        let filter = ObservationFilter {
            session_id: Some(session_id.to_string()),
            ..Default::default()
        };
        let observations = db.list_observations(&session.project_path, &filter, 500, 0)?;
        let summary = match &session.summary_id {
            Some(summary_id) => db.get_summary(summary_id)?,
            None => None,
        };
        Ok(Some(SessionDetail {
            session,
            observations,
            summary,
        }))
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        let db = self.db.lock().await;
        Ok(db.memory_stats(Some(&self.project_path))?)
    }

    pub async fn health(&self) -> HealthStatus {
        let db = self.db.lock().await;
        HealthStatus {
            database_ok: db.ping().is_ok(),
            queue: db.queue_status().unwrap_or_default(),
            embedding_available: self.embedder.is_some(),
            processor_running: self.processor.is_some(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let db = self.db.lock().await;
        Ok(db.queue_status()?)
    }

    /// Drain pending captures now. Signals the background processor when
    /// one is running, otherwise drains inline on a scratch connection.
    pub async fn trigger_processing(&self) -> Result<()> {
        match &self.processor {
            Some(handle) => {
                handle.process_now();
                Ok(())
            }
            None => {
                let mut processor = self.inline_processor().await?;
                processor.run_pending().await;
                Ok(())
            }
        }
    }

    async fn inline_processor(&self) -> Result<QueueProcessor> {
        let mut processor = QueueProcessor::new(
            Database::open(&self.db_path)?,
            self.compressor.clone(),
            self.config.clone(),
            self.mode.clone(),
        );
        processor.embedder = self.embedder.clone();
        processor.summarizer = self.summarizer.clone();
        processor.conflict = Some(self.conflict.clone());
        processor.bus = self.bus.clone();
        processor.metrics = self.metrics.clone();
        Ok(processor)
    }

    // --- export / import --------------------------------------------------

    pub async fn export(
        &self,
        observation_type: Option<openmem_types::ObservationType>,
        limit: Option<usize>,
    ) -> Result<ExportData> {
        let db = self.db.lock().await;
        crate::export::export(&db, &self.project_path, observation_type, limit)
    }

    pub async fn import(&self, data: &ExportData, mode: ImportMode) -> Result<ImportReport> {
        let db = self.db.lock().await;
        crate::export::import(&db, data, mode)
    }

    /// Stop the background processor, finishing the item in flight
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.processor.take() {
            handle.shutdown().await;
        }
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("project_path", &self.project_path)
            .field("mode", &self.mode.id)
            .field("processor_running", &self.processor.is_some())
            .finish()
    }
}
