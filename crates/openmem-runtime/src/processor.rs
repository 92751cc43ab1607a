use std::sync::Arc;
use std::time::{Duration, Instant};

use openmem_ai::{
    BasicSummarizer, CaptureInput, Compressor, ConflictDecision, ConflictEvaluator, Embedder,
    Neighbour, SimilarityConflictEvaluator, Summarizer,
};
use openmem_core::estimate_tokens;
use openmem_engine::{EntityExtractor, store_extraction};
use openmem_store::Database;
use openmem_types::{
    MemoryMode, ObservationBody, ObservationDraft, ObservationFilter, ObservationPatch,
    PendingMessage, Scope,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{EventBus, MemoryConfig, ObservationEvent, Result, metrics::RuntimeMetrics};

#[derive(Debug)]
enum Signal {
    ProcessNow,
    Summarize(String),
}

/// Batched pipeline driver.
///
/// Two trigger sources, an interval tick and an explicit process-now signal,
/// are coalesced: signals arriving while a batch runs collapse into a single
/// follow-up run. Batches run one at a time so lineage writes stay atomic;
/// the AI calls inside an item are the only suspension points.
pub struct QueueProcessor {
    pub db: Database,
    pub compressor: Arc<dyn Compressor>,
    pub embedder: Option<Arc<dyn Embedder>>,
    pub summarizer: Arc<dyn Summarizer>,
    pub conflict: Option<Arc<dyn ConflictEvaluator>>,
    pub mode: MemoryMode,
    pub config: MemoryConfig,
    pub bus: EventBus,
    pub metrics: Arc<RuntimeMetrics>,
    extractor: EntityExtractor,
}

/// Control handle for a started processor
pub struct ProcessorHandle {
    signal_tx: mpsc::UnboundedSender<Signal>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ProcessorHandle {
    /// Ask for an immediate drain; coalesced with any run in flight
    pub fn process_now(&self) {
        let _ = self.signal_tx.send(Signal::ProcessNow);
    }

    /// Enqueue a summarize work item for a finished session
    pub fn summarize(&self, session_id: &str) {
        let _ = self
            .signal_tx
            .send(Signal::Summarize(session_id.to_string()));
    }

    /// Stop after the current item; remaining processing rows revert on the
    /// next startup.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.join.await;
    }
}

impl QueueProcessor {
    pub fn new(
        db: Database,
        compressor: Arc<dyn Compressor>,
        config: MemoryConfig,
        mode: MemoryMode,
    ) -> Self {
        let conflict: Option<Arc<dyn ConflictEvaluator>> =
            Some(Arc::new(SimilarityConflictEvaluator {
                supersede_threshold: config.supersede_threshold,
                drop_threshold: config.drop_threshold,
            }));
        Self {
            db,
            compressor,
            embedder: None,
            summarizer: Arc::new(BasicSummarizer),
            conflict,
            mode,
            config,
            bus: EventBus::default(),
            metrics: Arc::new(RuntimeMetrics::default()),
            extractor: EntityExtractor,
        }
    }

    /// Spawn the trigger loop. The processor owns its database connection
    /// for the lifetime of the task.
    pub fn start(mut self) -> ProcessorHandle {
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            if let Ok(reverted) = self
                .db
                .revert_stale_pending(chrono::Duration::seconds(
                    self.config.stale_claim_secs as i64,
                ))
                && reverted > 0
            {
                info!(reverted, "reverted stale processing rows");
            }

            let mut interval =
                tokio::time::interval(Duration::from_secs(self.config.process_interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut shutdown = shutdown_rx.clone();

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.drain(&shutdown_rx).await;
                    }
                    signal = signal_rx.recv() => {
                        let Some(signal) = signal else { break };
                        let mut summaries = Vec::new();
                        let mut wants_drain = false;
                        match signal {
                            Signal::ProcessNow => wants_drain = true,
                            Signal::Summarize(id) => summaries.push(id),
                        }
                        // Coalesce everything already queued into this run
                        while let Ok(queued) = signal_rx.try_recv() {
                            match queued {
                                Signal::ProcessNow => wants_drain = true,
                                Signal::Summarize(id) => summaries.push(id),
                            }
                        }
                        if wants_drain {
                            self.drain(&shutdown_rx).await;
                        }
                        for session_id in summaries {
                            self.summarize_session(&session_id).await;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        });

        ProcessorHandle {
            signal_tx,
            shutdown_tx,
            join,
        }
    }

    async fn drain(&mut self, shutdown: &watch::Receiver<bool>) {
        loop {
            let processed = self.run_batch().await;
            if processed == 0 || *shutdown.borrow() {
                break;
            }
        }
    }

    /// Claim one batch and run every item through the pipeline. Returns the
    /// number of claimed items.
    pub async fn run_batch(&mut self) -> usize {
        let batch = match self.db.claim_pending(self.config.batch_size) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "failed to claim pending batch");
                return 0;
            }
        };
        let claimed = batch.len();

        for item in batch {
            if let Err(err) = self.process_item(&item).await {
                warn!(item = %item.id, error = %err, "pipeline item failed");
                self.metrics.record_item_failed();
                if let Err(fail_err) = self.db.fail_pending(&item.id, &err.to_string()) {
                    warn!(item = %item.id, error = %fail_err, "could not record item failure");
                }
            }
        }
        claimed
    }

    /// Drain the queue completely; test and synchronous-host entry point
    pub async fn run_pending(&mut self) -> usize {
        let mut total = 0;
        loop {
            let processed = self.run_batch().await;
            if processed == 0 {
                break;
            }
            total += processed;
        }
        total
    }

    async fn process_item(&mut self, item: &PendingMessage) -> Result<()> {
        let capture = CaptureInput {
            tool_name: item.tool_name.clone(),
            tool_output: item.tool_output.clone(),
        };

        let started = Instant::now();
        let draft = match self.compressor.compress(&capture, &self.mode).await {
            Ok(draft) => {
                self.metrics.record_compression(started.elapsed());
                draft
            }
            Err(err) => {
                self.metrics.record_compression_failure();
                return Err(err.into());
            }
        };

        // Candidate embedding serves conflict evaluation and is stored with
        // whichever row the decision produces.
        let embedding = match &self.embedder {
            Some(embedder) => match embedder.embed(&embedding_text(&draft)).await {
                Ok(vector) => Some(vector),
                Err(err) => {
                    debug!(error = %err, "candidate embedding failed, skipping vector steps");
                    None
                }
            },
            None => None,
        };

        let decision = self.evaluate_conflict(&draft, embedding.as_deref()).await;

        match decision {
            ConflictDecision::Drop => {
                self.metrics.record_dropped();
                self.bus.emit(ObservationEvent::Dropped {
                    session_id: item.session_id.clone(),
                    call_id: item.call_id.clone(),
                });
            }
            ConflictDecision::CreateNew => {
                let mut body = ObservationBody::from_draft(&item.session_id, Scope::Project, draft);
                body.raw_tool_output = Some(item.tool_output.clone());
                body.tool_name = Some(item.tool_name.clone());
                body.token_count = distilled_tokens(&body);
                body.discovery_tokens = estimate_tokens(&item.tool_output);

                let observation = self.db.create_observation(&body)?;
                self.db
                    .increment_session_observation_count(&item.session_id)?;
                self.finish_persisted(&observation, embedding.as_deref());
                self.metrics.record_created();
                self.bus.emit(ObservationEvent::Created(observation));
            }
            ConflictDecision::Supersede(target_id) => {
                let patch = patch_from_draft(&draft);
                let observation = self.db.update_observation(&target_id, &patch)?;
                self.finish_persisted(&observation, embedding.as_deref());
                self.metrics.record_revised();
                self.bus.emit(ObservationEvent::Revised {
                    predecessor_id: target_id,
                    observation,
                });
            }
        }

        self.db.complete_pending(&item.id)?;
        Ok(())
    }

    async fn evaluate_conflict(
        &mut self,
        draft: &ObservationDraft,
        embedding: Option<&[f32]>,
    ) -> ConflictDecision {
        let (Some(conflict), Some(embedding)) = (self.conflict.clone(), embedding) else {
            return ConflictDecision::CreateNew;
        };
        if !self.config.conflict_resolution {
            return ConflictDecision::CreateNew;
        }

        let neighbours = match self.db.find_similar(
            embedding,
            draft.observation_type,
            self.config.similarity_band,
            5,
        ) {
            Ok(matches) => matches
                .into_iter()
                .map(|(observation, similarity)| Neighbour {
                    observation,
                    similarity,
                })
                .collect::<Vec<_>>(),
            Err(err) => {
                debug!(error = %err, "neighbour scan failed, creating new");
                return ConflictDecision::CreateNew;
            }
        };

        match conflict.evaluate(draft, &neighbours).await {
            Ok(decision) => decision,
            Err(err) => {
                debug!(error = %err, "conflict evaluation failed, creating new");
                ConflictDecision::CreateNew
            }
        }
    }

    /// Vector store and entity extraction for a freshly persisted row.
    /// Both are secondary indexes; failures degrade rather than abort.
    fn finish_persisted(&mut self, observation: &openmem_types::Observation, embedding: Option<&[f32]>) {
        if let Some(embedding) = embedding
            && let Err(err) = self.db.upsert_embedding(&observation.id, embedding)
        {
            debug!(id = %observation.id, error = %err, "vector upsert failed");
        }
        if self.config.entity_extraction {
            let extraction = self.extractor.extract(observation, &self.mode);
            if let Err(err) = store_extraction(&self.db, &observation.id, &extraction) {
                debug!(id = %observation.id, error = %err, "entity extraction persist failed");
            }
        }
    }

    /// Run the summarizer over a session's active observations and attach
    /// the resulting summary.
    pub async fn summarize_session(&mut self, session_id: &str) {
        let session = match self.db.get_session(session_id) {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!(session_id, "summarize requested for unknown session");
                return;
            }
            Err(err) => {
                warn!(session_id, error = %err, "session lookup failed");
                return;
            }
        };

        let filter = ObservationFilter {
            session_id: Some(session_id.to_string()),
            ..Default::default()
        };
        let observations =
            match self
                .db
                .list_observations(&session.project_path, &filter, 500, 0)
            {
                Ok(observations) => observations,
                Err(err) => {
                    warn!(session_id, error = %err, "could not load session observations");
                    return;
                }
            };
        if observations.is_empty() {
            return;
        }

        let draft = match self.summarizer.summarize(&observations, &self.mode).await {
            Ok(draft) => draft,
            Err(err) => {
                warn!(session_id, error = %err, "summarizer failed");
                return;
            }
        };

        let token_count = estimate_tokens(&draft.summary)
            + draft
                .key_decisions
                .iter()
                .map(|d| estimate_tokens(d))
                .sum::<u32>();
        match self.db.create_summary(session_id, &draft, token_count) {
            Ok(summary) => {
                if let Err(err) = self.db.set_session_summary(session_id, &summary.id) {
                    warn!(session_id, error = %err, "could not attach summary to session");
                }
            }
            Err(err) => {
                warn!(session_id, error = %err, "could not persist summary");
            }
        }
    }
}

fn embedding_text(draft: &ObservationDraft) -> String {
    format!("{}\n{}", draft.title, draft.narrative)
}

fn distilled_tokens(body: &ObservationBody) -> u32 {
    estimate_tokens(&body.title)
        + estimate_tokens(&body.narrative)
        + body.facts.iter().map(|f| estimate_tokens(f)).sum::<u32>()
}

fn patch_from_draft(draft: &ObservationDraft) -> ObservationPatch {
    ObservationPatch {
        observation_type: Some(draft.observation_type),
        title: Some(draft.title.clone()),
        subtitle: draft.subtitle.clone(),
        narrative: Some(draft.narrative.clone()),
        facts: Some(draft.facts.clone()),
        concepts: Some(draft.concepts.clone()),
        files_read: Some(draft.files_read.clone()),
        files_modified: Some(draft.files_modified.clone()),
        importance: Some(draft.importance),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openmem_ai::testing::{FailingCompressor, HashEmbedder, StaticCompressor};

    fn processor_with(compressor: Arc<dyn Compressor>) -> QueueProcessor {
        let db = Database::open_in_memory().unwrap();
        db.get_or_create_session("s1", "/p").unwrap();
        QueueProcessor::new(
            db,
            compressor,
            MemoryConfig::default(),
            MemoryMode::default_mode(),
        )
    }

    #[tokio::test]
    async fn capture_becomes_observation() {
        let mut processor = processor_with(Arc::new(StaticCompressor::default()));
        processor
            .db
            .enqueue_pending("s1", "Bash", "ran the test suite\nall green", "c1")
            .unwrap();

        let mut events = processor.bus.subscribe();
        let processed = processor.run_pending().await;
        assert_eq!(processed, 1);

        let listed = processor
            .db
            .list_observations("/p", &ObservationFilter::default(), 10, 0)
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "ran the test suite");
        assert_eq!(listed[0].tool_name.as_deref(), Some("Bash"));
        assert!(listed[0].discovery_tokens > 0);

        // Queue row consumed, event emitted after durability
        assert_eq!(processor.db.queue_status().unwrap().pending, 0);
        assert!(matches!(
            events.try_recv().unwrap(),
            ObservationEvent::Created(_)
        ));

        // Session accounting
        let session = processor.db.get_session("s1").unwrap().unwrap();
        assert_eq!(session.observation_count, 1);
    }

    #[tokio::test]
    async fn config_error_consumes_retries_then_parks_item() {
        let mut processor = processor_with(Arc::new(FailingCompressor { retryable: false }));
        let item = processor
            .db
            .enqueue_pending("s1", "Bash", "output text here", "c1")
            .unwrap()
            .unwrap();

        // Each run claims, fails, and returns the row to pending until the
        // retry ceiling parks it.
        processor.run_pending().await;

        let status = processor.db.queue_status().unwrap();
        assert_eq!(status.failed, 1);
        assert_eq!(status.pending, 0);
        let snapshot = processor.metrics.snapshot();
        assert_eq!(snapshot.items_failed, 3);
        let _ = item;
    }

    #[tokio::test]
    async fn near_duplicate_capture_is_dropped() {
        let mut processor = processor_with(Arc::new(StaticCompressor::default()));
        processor.embedder = Some(Arc::new(HashEmbedder::default()));

        processor
            .db
            .enqueue_pending("s1", "Bash", "identical capture body", "c1")
            .unwrap();
        processor.run_pending().await;

        processor
            .db
            .enqueue_pending("s1", "Bash", "identical capture body", "c2")
            .unwrap();
        let mut events = processor.bus.subscribe();
        processor.run_pending().await;

        let listed = processor
            .db
            .list_observations("/p", &ObservationFilter::default(), 10, 0)
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            ObservationEvent::Dropped { .. }
        ));
        assert_eq!(processor.metrics.snapshot().observations_dropped, 1);
    }

    #[tokio::test]
    async fn near_neighbour_supersedes_with_lineage() {
        let mut processor = processor_with(Arc::new(StaticCompressor::default()));
        processor.embedder = Some(Arc::new(HashEmbedder::default()));
        // Wide supersede band so the reworded capture lands in it; the drop
        // band stays out of reach because the titles differ.
        processor.conflict = Some(Arc::new(SimilarityConflictEvaluator {
            supersede_threshold: 0.5,
            drop_threshold: 0.999,
        }));

        processor
            .db
            .enqueue_pending("s1", "Bash", "auth flow uses refresh tokens today", "c1")
            .unwrap();
        processor.run_pending().await;
        let first = processor
            .db
            .list_observations("/p", &ObservationFilter::default(), 10, 0)
            .unwrap()
            .remove(0);

        // Same text, different title line, lands in the supersede band
        processor
            .db
            .enqueue_pending("s1", "Bash", "auth flow uses refresh tokens again", "c2")
            .unwrap();
        processor.run_pending().await;

        let listed = processor
            .db
            .list_observations("/p", &ObservationFilter::default(), 10, 0)
            .unwrap();
        assert_eq!(listed.len(), 1);
        let lineage = processor.db.get_lineage(&listed[0].id).unwrap();
        assert_eq!(lineage.len(), 2);
        assert_eq!(lineage[0].id, first.id);
    }

    #[tokio::test]
    async fn entity_extraction_populates_graph() {
        let mut processor = processor_with(Arc::new(StaticCompressor::default()));
        processor
            .db
            .enqueue_pending("s1", "Bash", "AuthService uses TokenStore for rotation", "c1")
            .unwrap();
        processor.run_pending().await;

        let hood = processor.db.graph_neighbours("AuthService", 1).unwrap();
        assert!(hood.entities.iter().any(|e| e.name == "TokenStore"));
    }

    #[tokio::test]
    async fn summarize_session_attaches_summary() {
        let mut processor = processor_with(Arc::new(StaticCompressor::default()));
        processor
            .db
            .enqueue_pending("s1", "Bash", "first piece of work done", "c1")
            .unwrap();
        processor.run_pending().await;

        processor.summarize_session("s1").await;

        let session = processor.db.get_session("s1").unwrap().unwrap();
        let summary_id = session.summary_id.expect("summary attached");
        let summary = processor.db.get_summary(&summary_id).unwrap().unwrap();
        assert!(summary.summary.contains("first piece of work done"));
    }

    #[tokio::test]
    async fn started_processor_reacts_to_process_now() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db_path = temp_dir.path().join("memory.db");
        let db = Database::open(&db_path).unwrap();
        db.get_or_create_session("s1", "/p").unwrap();
        db.enqueue_pending("s1", "Bash", "background processed capture", "c1")
            .unwrap();

        let processor = QueueProcessor::new(
            db,
            Arc::new(StaticCompressor::default()),
            MemoryConfig::default(),
            MemoryMode::default_mode(),
        );
        let bus = processor.bus.clone();
        let mut events = bus.subscribe();

        let handle = processor.start();
        handle.process_now();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("processing within the grace window")
            .unwrap();
        assert!(matches!(event, ObservationEvent::Created(_)));

        handle.shutdown().await;

        let verify = Database::open(&db_path).unwrap();
        assert_eq!(verify.queue_status().unwrap().pending, 0);
    }
}
