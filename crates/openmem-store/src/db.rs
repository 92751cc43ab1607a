use std::path::Path;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use openmem_types::{
    Entity, GraphNeighbourhood, Observation, ObservationBody, ObservationFilter, ObservationPatch,
    ObservationType, PendingMessage, PendingStatus, Session, SessionStatus, SessionSummary,
    SummaryDraft,
};
use rusqlite::Connection;

use crate::records::{ImportMode, MemoryStats, QueueStatus, SearchHit};
use crate::{Result, queries, schema};

/// Handle over the embedded database. All row lifetimes are owned here;
/// repositories and the pipeline hold only this handle.
///
/// A `Database` wraps one SQLite connection and is `Send` but not `Sync`.
/// The journal is WAL, so read-only handles opened against the same file
/// proceed in parallel with the single writer.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at the given path. Parent directory
    /// creation failures are fatal at startup by design.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    // --- observations -----------------------------------------------------

    pub fn create_observation(&self, body: &ObservationBody) -> Result<Observation> {
        queries::observation::create(&self.conn, body)
    }

    /// Active-only lookup
    pub fn get_observation(&self, id: &str) -> Result<Option<Observation>> {
        queries::observation::get(&self.conn, id)
    }

    /// Audit access: superseded and tombstoned rows stay addressable
    pub fn get_observation_including_archived(&self, id: &str) -> Result<Option<Observation>> {
        queries::observation::get_including_archived(&self.conn, id)
    }

    pub fn update_observation(&mut self, id: &str, patch: &ObservationPatch) -> Result<Observation> {
        queries::observation::update(&mut self.conn, id, patch)
    }

    pub fn delete_observation(&mut self, id: &str) -> Result<()> {
        queries::observation::delete(&mut self.conn, id)
    }

    pub fn list_observations(
        &self,
        project_path: &str,
        filter: &ObservationFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Observation>> {
        queries::observation::list_by_project(&self.conn, project_path, filter, limit, offset)
    }

    pub fn observations_around(
        &self,
        ts: &DateTime<Utc>,
        before: usize,
        after: usize,
        project_path: &str,
    ) -> Result<Vec<Observation>> {
        queries::observation::around_timestamp(&self.conn, ts, before, after, project_path)
    }

    pub fn get_lineage(&self, id: &str) -> Result<Vec<Observation>> {
        queries::observation::lineage(&self.conn, id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn search_observations(
        &self,
        query: &str,
        project_path: Option<&str>,
        filter: &ObservationFilter,
        concepts: &[String],
        files: &[String],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchHit>> {
        queries::observation::search(
            &self.conn,
            query,
            project_path,
            filter,
            concepts,
            files,
            limit,
            offset,
        )
    }

    pub fn search_by_concept(
        &self,
        concept: &str,
        limit: usize,
        project_path: Option<&str>,
    ) -> Result<Vec<Observation>> {
        queries::observation::search_by_concept(&self.conn, concept, limit, project_path)
    }

    pub fn search_by_file(
        &self,
        file: &str,
        limit: usize,
        project_path: Option<&str>,
    ) -> Result<Vec<Observation>> {
        queries::observation::search_by_file(&self.conn, file, limit, project_path)
    }

    pub fn import_observation(&self, observation: &Observation, mode: ImportMode) -> Result<bool> {
        queries::observation::insert_full(&self.conn, observation, mode == ImportMode::Overwrite)
    }

    // --- vectors ----------------------------------------------------------

    pub fn upsert_embedding(&mut self, id: &str, vector: &[f32]) -> Result<()> {
        queries::observation::upsert_embedding(&mut self.conn, id, vector)
    }

    pub fn vec_search(
        &self,
        query: &[f32],
        k: usize,
        project_path: Option<&str>,
    ) -> Vec<(String, f32)> {
        queries::observation::vec_search(&self.conn, query, k, project_path)
    }

    pub fn vec_search_subset(
        &self,
        query: &[f32],
        candidate_ids: &[String],
        k: usize,
    ) -> Vec<(String, f32)> {
        queries::observation::vec_search_subset(&self.conn, query, candidate_ids, k)
    }

    pub fn find_similar(
        &self,
        embedding: &[f32],
        observation_type: ObservationType,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<(Observation, f32)>> {
        queries::observation::find_similar(&self.conn, embedding, observation_type, threshold, limit)
    }

    // --- sessions ---------------------------------------------------------

    pub fn get_or_create_session(&self, session_id: &str, project_path: &str) -> Result<Session> {
        queries::session::get_or_create(&self.conn, session_id, project_path)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        queries::session::get(&self.conn, session_id)
    }

    pub fn list_sessions(&self, project_path: &str, limit: usize) -> Result<Vec<Session>> {
        queries::session::list_by_project(&self.conn, project_path, limit)
    }

    pub fn set_session_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        queries::session::set_status(&self.conn, session_id, status)
    }

    pub fn increment_session_observation_count(&self, session_id: &str) -> Result<()> {
        queries::session::increment_observation_count(&self.conn, session_id)
    }

    pub fn set_session_summary(&self, session_id: &str, summary_id: &str) -> Result<()> {
        queries::session::set_summary(&self.conn, session_id, summary_id)
    }

    // --- summaries --------------------------------------------------------

    pub fn create_summary(
        &self,
        session_id: &str,
        draft: &SummaryDraft,
        token_count: u32,
    ) -> Result<SessionSummary> {
        queries::summary::create(&self.conn, session_id, draft, token_count)
    }

    pub fn get_summary(&self, id: &str) -> Result<Option<SessionSummary>> {
        queries::summary::get(&self.conn, id)
    }

    pub fn get_summary_for_session(&self, session_id: &str) -> Result<Option<SessionSummary>> {
        queries::summary::get_for_session(&self.conn, session_id)
    }

    pub fn latest_summary_for_project(&self, project_path: &str) -> Result<Option<SessionSummary>> {
        queries::summary::latest_for_project(&self.conn, project_path)
    }

    // --- pending queue ----------------------------------------------------

    pub fn enqueue_pending(
        &self,
        session_id: &str,
        tool_name: &str,
        tool_output: &str,
        call_id: &str,
    ) -> Result<Option<PendingMessage>> {
        queries::pending::enqueue(&self.conn, session_id, tool_name, tool_output, call_id)
    }

    pub fn claim_pending(&mut self, batch_size: usize) -> Result<Vec<PendingMessage>> {
        queries::pending::claim(&mut self.conn, batch_size)
    }

    pub fn complete_pending(&self, id: &str) -> Result<()> {
        queries::pending::complete(&self.conn, id)
    }

    pub fn fail_pending(&self, id: &str, error: &str) -> Result<PendingStatus> {
        queries::pending::fail(&self.conn, id, error)
    }

    pub fn revert_stale_pending(&self, older_than: chrono::Duration) -> Result<usize> {
        queries::pending::revert_stale(&self.conn, older_than)
    }

    pub fn queue_status(&self) -> Result<QueueStatus> {
        queries::pending::counts(&self.conn)
    }

    // --- knowledge graph --------------------------------------------------

    pub fn upsert_entity(
        &self,
        entity_type: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<i64> {
        queries::graph::upsert_entity(&self.conn, entity_type, name, description)
    }

    pub fn get_entity(&self, entity_type: &str, name: &str) -> Result<Option<Entity>> {
        queries::graph::get_entity(&self.conn, entity_type, name)
    }

    pub fn insert_relationship(
        &self,
        relationship_type: &str,
        from_entity_id: i64,
        to_entity_id: i64,
        observation_id: &str,
    ) -> Result<()> {
        queries::graph::insert_relationship(
            &self.conn,
            relationship_type,
            from_entity_id,
            to_entity_id,
            observation_id,
        )
    }

    pub fn graph_neighbours(&self, name: &str, depth: usize) -> Result<GraphNeighbourhood> {
        queries::graph::neighbours(&self.conn, name, depth)
    }

    // --- stats ------------------------------------------------------------

    pub fn memory_stats(&self, project_path: Option<&str>) -> Result<MemoryStats> {
        queries::stats::memory_stats(&self.conn, project_path)
    }

    /// Cheap reachability probe for the health surface
    pub fn ping(&self) -> Result<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.get_or_create_session("s1", "/project/alpha").unwrap();
        db
    }

    fn body(title: &str) -> ObservationBody {
        ObservationBody {
            session_id: "s1".into(),
            scope: openmem_types::Scope::Project,
            observation_type: ObservationType::Discovery,
            title: title.into(),
            subtitle: None,
            narrative: format!("narrative about {}", title),
            facts: vec!["fact one".into()],
            concepts: vec!["testing".into()],
            files_read: vec!["src/lib.rs".into()],
            files_modified: vec![],
            raw_tool_output: None,
            tool_name: Some("Bash".into()),
            token_count: 10,
            discovery_tokens: 100,
            importance: 3,
        }
    }

    #[test]
    fn create_and_get_observation() {
        let db = test_db();
        let created = db.create_observation(&body("first")).unwrap();
        let fetched = db.get_observation(&created.id).unwrap().unwrap();
        assert_eq!(fetched.title, "first");
        assert_eq!(fetched.concepts, vec!["testing"]);
        assert!(fetched.is_active());
    }

    #[test]
    fn create_rejects_empty_title() {
        let db = test_db();
        let mut invalid = body("x");
        invalid.title = "  ".into();
        assert!(matches!(
            db.create_observation(&invalid),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn update_creates_revision_chain() {
        let mut db = test_db();
        let o1 = db.create_observation(&body("original")).unwrap();

        let patch = ObservationPatch {
            narrative: Some("revised narrative".into()),
            ..Default::default()
        };
        let o2 = db.update_observation(&o1.id, &patch).unwrap();

        assert_ne!(o1.id, o2.id);
        assert_eq!(o2.revision_of.as_deref(), Some(o1.id.as_str()));
        assert_eq!(o2.narrative, "revised narrative");
        assert_eq!(o2.title, "original");

        // Predecessor is no longer active but stays addressable
        assert!(db.get_observation(&o1.id).unwrap().is_none());
        let archived = db
            .get_observation_including_archived(&o1.id)
            .unwrap()
            .unwrap();
        assert_eq!(archived.superseded_by.as_deref(), Some(o2.id.as_str()));
        assert!(archived.superseded_at.is_some());

        let lineage = db.get_lineage(&o2.id).unwrap();
        assert_eq!(lineage.len(), 2);
        assert_eq!(lineage[0].id, o1.id);
        assert_eq!(lineage[1].id, o2.id);

        // Same chain from either end
        let lineage_from_old = db.get_lineage(&o1.id).unwrap();
        assert_eq!(lineage_from_old.len(), 2);
        assert_eq!(lineage_from_old[1].id, o2.id);
    }

    #[test]
    fn update_of_superseded_row_is_not_found() {
        let mut db = test_db();
        let o1 = db.create_observation(&body("original")).unwrap();
        let patch = ObservationPatch {
            title: Some("v2".into()),
            ..Default::default()
        };
        db.update_observation(&o1.id, &patch).unwrap();

        assert!(matches!(
            db.update_observation(&o1.id, &patch),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn delete_tombstones_and_hides_from_search() {
        let mut db = test_db();
        let o = db.create_observation(&body("hide-me")).unwrap();

        db.delete_observation(&o.id).unwrap();

        assert!(db.get_observation(&o.id).unwrap().is_none());
        let archived = db.get_observation_including_archived(&o.id).unwrap().unwrap();
        assert!(archived.deleted_at.is_some());

        let hits = db
            .search_observations(
                "hide-me",
                Some("/project/alpha"),
                &ObservationFilter::default(),
                &[],
                &[],
                10,
                0,
            )
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn delete_missing_is_not_found() {
        let mut db = test_db();
        assert!(matches!(
            db.delete_observation("nope"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn fts_search_is_project_isolated() {
        let db = test_db();
        db.get_or_create_session("s2", "/project/beta").unwrap();

        db.create_observation(&body("Alpha JWT authentication pattern"))
            .unwrap();
        let mut beta = body("Beta JWT token validation");
        beta.session_id = "s2".into();
        db.create_observation(&beta).unwrap();

        let hits = db
            .search_observations(
                "JWT",
                Some("/project/alpha"),
                &ObservationFilter::default(),
                &[],
                &[],
                10,
                0,
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].observation.title.starts_with("Alpha"));
    }

    #[test]
    fn search_by_concept_matches_only_concepts_column() {
        let db = test_db();
        let mut with_concept = body("one");
        with_concept.concepts = vec!["authentication".into()];
        db.create_observation(&with_concept).unwrap();

        let mut with_title = body("authentication in the title");
        with_title.concepts = vec!["hooks".into()];
        db.create_observation(&with_title).unwrap();

        let found = db
            .search_by_concept("authentication", 10, Some("/project/alpha"))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "one");
    }

    #[test]
    fn malformed_query_degrades_to_empty() {
        let db = test_db();
        db.create_observation(&body("anything")).unwrap();
        let hits = db
            .search_observations(
                "\"((",
                Some("/project/alpha"),
                &ObservationFilter::default(),
                &[],
                &[],
                10,
                0,
            )
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn list_pagination_is_stable() {
        let db = test_db();
        for i in 0..5 {
            db.create_observation(&body(&format!("obs {}", i))).unwrap();
        }
        let first = db
            .list_observations("/project/alpha", &ObservationFilter::default(), 2, 0)
            .unwrap();
        let second = db
            .list_observations("/project/alpha", &ObservationFilter::default(), 2, 2)
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        let ids: std::collections::HashSet<_> =
            first.iter().chain(second.iter()).map(|o| o.id.clone()).collect();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn vectors_round_trip_and_rank_by_distance() {
        let mut db = test_db();
        let o1 = db.create_observation(&body("close")).unwrap();
        let o2 = db.create_observation(&body("far")).unwrap();

        db.upsert_embedding(&o1.id, &[1.0, 0.0]).unwrap();
        db.upsert_embedding(&o2.id, &[0.0, 1.0]).unwrap();

        let found = db.vec_search(&[0.9, 0.1], 2, Some("/project/alpha"));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, o1.id);
        assert!(found[0].1 < found[1].1);
    }

    #[test]
    fn vec_search_subset_restricts_candidates() {
        let mut db = test_db();
        let o1 = db.create_observation(&body("one")).unwrap();
        let o2 = db.create_observation(&body("two")).unwrap();
        db.upsert_embedding(&o1.id, &[1.0, 0.0]).unwrap();
        db.upsert_embedding(&o2.id, &[0.9, 0.1]).unwrap();

        let subset = db.vec_search_subset(&[1.0, 0.0], &[o2.id.clone()], 5);
        assert_eq!(subset.len(), 1);
        assert_eq!(subset[0].0, o2.id);
    }

    #[test]
    fn tombstoned_vector_vanishes_from_knn() {
        let mut db = test_db();
        let o = db.create_observation(&body("vectored")).unwrap();
        db.upsert_embedding(&o.id, &[1.0, 0.0]).unwrap();
        db.delete_observation(&o.id).unwrap();

        assert!(db.vec_search(&[1.0, 0.0], 5, None).is_empty());
    }

    #[test]
    fn find_similar_respects_threshold_and_type() {
        let mut db = test_db();
        let o1 = db.create_observation(&body("a")).unwrap();
        let mut decision = body("b");
        decision.observation_type = ObservationType::Decision;
        let o2 = db.create_observation(&decision).unwrap();

        db.upsert_embedding(&o1.id, &[1.0, 0.0]).unwrap();
        db.upsert_embedding(&o2.id, &[1.0, 0.0]).unwrap();

        let similar = db
            .find_similar(&[1.0, 0.0], ObservationType::Discovery, 0.9, 10)
            .unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].0.id, o1.id);
        assert!(similar[0].1 > 0.99);
    }

    #[test]
    fn pending_enqueue_is_idempotent() {
        let db = test_db();
        let first = db.enqueue_pending("s1", "Bash", "output", "call-1").unwrap();
        let second = db.enqueue_pending("s1", "Bash", "output", "call-1").unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(db.queue_status().unwrap().pending, 1);
    }

    #[test]
    fn claim_marks_processing_and_is_exclusive() {
        let mut db = test_db();
        db.enqueue_pending("s1", "Bash", "first", "c1").unwrap();
        db.enqueue_pending("s1", "Bash", "second", "c2").unwrap();

        let claimed = db.claim_pending(10).unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].tool_output, "first");
        assert!(claimed.iter().all(|m| m.status == PendingStatus::Processing));

        // Nothing left to claim
        assert!(db.claim_pending(10).unwrap().is_empty());
    }

    #[test]
    fn fail_retries_then_parks_as_failed() {
        let mut db = test_db();
        let msg = db
            .enqueue_pending("s1", "Bash", "output", "c1")
            .unwrap()
            .unwrap();

        db.claim_pending(1).unwrap();
        assert_eq!(
            db.fail_pending(&msg.id, "boom").unwrap(),
            PendingStatus::Pending
        );
        db.claim_pending(1).unwrap();
        assert_eq!(
            db.fail_pending(&msg.id, "boom").unwrap(),
            PendingStatus::Pending
        );
        db.claim_pending(1).unwrap();
        assert_eq!(
            db.fail_pending(&msg.id, "boom").unwrap(),
            PendingStatus::Failed
        );

        let status = db.queue_status().unwrap();
        assert_eq!(status.failed, 1);
        assert_eq!(status.pending, 0);
    }

    #[test]
    fn stale_processing_rows_revert() {
        let mut db = test_db();
        db.enqueue_pending("s1", "Bash", "output", "c1").unwrap();
        db.claim_pending(1).unwrap();

        // Zero threshold treats every claimed row as stale
        let reverted = db.revert_stale_pending(chrono::Duration::zero()).unwrap();
        assert_eq!(reverted, 1);
        assert_eq!(db.claim_pending(1).unwrap().len(), 1);
    }

    #[test]
    fn entity_dedupe_is_case_insensitive() {
        let db = test_db();
        let a = db.upsert_entity("module", "AuthService", None).unwrap();
        let b = db.upsert_entity("module", "authservice", None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn graph_neighbours_bounded_by_depth() {
        let db = test_db();
        let a = db.upsert_entity("module", "a", None).unwrap();
        let b = db.upsert_entity("module", "b", None).unwrap();
        let c = db.upsert_entity("module", "c", None).unwrap();
        let d = db.upsert_entity("module", "d", None).unwrap();
        db.insert_relationship("uses", a, b, "o1").unwrap();
        db.insert_relationship("uses", b, c, "o2").unwrap();
        db.insert_relationship("uses", c, d, "o3").unwrap();

        let hood = db.graph_neighbours("a", 2).unwrap();
        let names: Vec<_> = hood.entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"b"));
        assert!(names.contains(&"c"));
        assert!(!names.contains(&"d"));
        assert!(hood.observation_ids.contains(&"o1".to_string()));
    }

    #[test]
    fn session_lifecycle() {
        let db = test_db();
        let session = db.get_or_create_session("s9", "/project/alpha").unwrap();
        assert_eq!(session.status, SessionStatus::Active);

        db.set_session_status("s9", SessionStatus::Idle).unwrap();
        assert_eq!(
            db.get_session("s9").unwrap().unwrap().status,
            SessionStatus::Idle
        );

        db.set_session_status("s9", SessionStatus::Completed).unwrap();
        let completed = db.get_session("s9").unwrap().unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.ended_at.is_some());
    }

    #[test]
    fn summary_round_trip() {
        let db = test_db();
        let draft = SummaryDraft {
            summary: "did things".into(),
            key_decisions: vec!["chose sqlite".into()],
            files_modified: vec!["src/db.rs".into()],
            concepts: vec!["database".into()],
            request: Some("add storage".into()),
            investigated: None,
            learned: None,
            completed: None,
            next_steps: None,
        };
        let created = db.create_summary("s1", &draft, 25).unwrap();
        db.set_session_summary("s1", &created.id).unwrap();

        let fetched = db.get_summary_for_session("s1").unwrap().unwrap();
        assert_eq!(fetched.key_decisions, vec!["chose sqlite"]);
        assert_eq!(
            db.latest_summary_for_project("/project/alpha")
                .unwrap()
                .unwrap()
                .id,
            created.id
        );
    }

    #[test]
    fn import_merge_skips_existing_overwrite_replaces() {
        let db = test_db();
        let created = db.create_observation(&body("exported")).unwrap();

        let mut copy = created.clone();
        copy.title = "changed".into();

        assert!(!db.import_observation(&copy, ImportMode::Merge).unwrap());
        assert_eq!(
            db.get_observation(&created.id).unwrap().unwrap().title,
            "exported"
        );

        assert!(db.import_observation(&copy, ImportMode::Overwrite).unwrap());
        assert_eq!(
            db.get_observation(&created.id).unwrap().unwrap().title,
            "changed"
        );
    }

    #[test]
    fn stats_count_active_only() {
        let mut db = test_db();
        let keep = db.create_observation(&body("keep")).unwrap();
        let drop = db.create_observation(&body("drop")).unwrap();
        db.delete_observation(&drop.id).unwrap();

        let stats = db.memory_stats(Some("/project/alpha")).unwrap();
        assert_eq!(stats.total_observations, 1);
        assert_eq!(stats.total_token_count, u64::from(keep.token_count));
        assert_eq!(stats.total_sessions, 1);
    }

    #[test]
    fn around_timestamp_is_chronological() {
        let db = test_db();
        let a = db.create_observation(&body("a")).unwrap();
        let b = db.create_observation(&body("b")).unwrap();
        let c = db.create_observation(&body("c")).unwrap();

        let window = db
            .observations_around(&b.created_at, 2, 2, "/project/alpha")
            .unwrap();
        let ids: Vec<_> = window.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str(), c.id.as_str()]);
    }
}
