use std::sync::Arc;

use openmem_ai::testing::StaticCompressor;
use openmem_sdk::types::{
    ImportMode, ObservationBody, ObservationFilter, ObservationPatch, ObservationType, Scope,
    SearchRequest, SearchSignal, SearchStrategy,
};
use openmem_sdk::{Memory, MemoryConfig};
use tempfile::TempDir;

fn body(session_id: &str, title: &str, concepts: &[&str], files: &[&str]) -> ObservationBody {
    ObservationBody {
        session_id: session_id.into(),
        scope: Scope::Project,
        observation_type: ObservationType::Discovery,
        title: title.into(),
        subtitle: None,
        narrative: format!("narrative about {}", title),
        facts: vec![],
        concepts: concepts.iter().map(|s| s.to_string()).collect(),
        files_read: files.iter().map(|s| s.to_string()).collect(),
        files_modified: vec![],
        raw_tool_output: None,
        tool_name: None,
        token_count: 10,
        discovery_tokens: 100,
        importance: 3,
    }
}

async fn memory_in(temp_dir: &TempDir) -> Memory {
    Memory::builder(temp_dir.path())
        .without_processor()
        .connect()
        .await
        .unwrap()
}

#[tokio::test]
async fn project_isolation() {
    let temp_dir = TempDir::new().unwrap();
    let memory = memory_in(&temp_dir).await;

    memory
        .create_observation(&body(
            "session-a",
            "Alpha JWT authentication pattern",
            &["JWT", "authentication"],
            &["src/auth.ts"],
        ))
        .await
        .unwrap();

    // A foreign project's session sharing the database must stay invisible
    let foreign = openmem_store::Database::open(&openmem_core::database_path(
        &openmem_core::canonicalize_project_root(temp_dir.path()),
    ))
    .unwrap();
    foreign
        .get_or_create_session("session-b", "/project/beta")
        .unwrap();
    foreign
        .create_observation(&openmem_sdk::types::ObservationBody {
            session_id: "session-b".into(),
            ..body("session-b", "Beta JWT token validation", &["JWT", "validation"], &[])
        })
        .unwrap();

    let results = memory
        .search(SearchRequest::new("JWT", memory.project_path()))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].observation.title.starts_with("Alpha"));
}

#[tokio::test]
async fn revision_lineage() {
    let temp_dir = TempDir::new().unwrap();
    let memory = memory_in(&temp_dir).await;

    let mut o1_body = body("s1", "observation", &[], &[]);
    o1_body.narrative = "x".into();
    let o1 = memory.create_observation(&o1_body).await.unwrap();

    let o2 = memory
        .update_observation(
            &o1.id,
            &ObservationPatch {
                narrative: Some("y".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_ne!(o1.id, o2.id);
    assert_eq!(o2.revision_of.as_deref(), Some(o1.id.as_str()));
    assert_eq!(o2.narrative, "y");

    assert!(memory.get_observation(&o1.id).await.unwrap().is_none());
    let archived = memory
        .get_observation_including_archived(&o1.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(archived.superseded_by.as_deref(), Some(o2.id.as_str()));

    let lineage = memory.get_lineage(&o2.id).await.unwrap();
    assert_eq!(
        lineage.iter().map(|o| o.id.as_str()).collect::<Vec<_>>(),
        vec![o1.id.as_str(), o2.id.as_str()]
    );
}

#[tokio::test]
async fn tombstone_hides_from_search() {
    let temp_dir = TempDir::new().unwrap();
    let memory = memory_in(&temp_dir).await;

    let o = memory
        .create_observation(&body("s1", "hide-me", &[], &[]))
        .await
        .unwrap();
    memory.delete_observation(&o.id).await.unwrap();

    let results = memory
        .search(SearchRequest::new("hide-me", memory.project_path()))
        .await
        .unwrap();
    assert!(results.is_empty());

    // Still addressable for audit
    assert!(memory
        .get_observation_including_archived(&o.id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn filter_only_with_concept_terms() {
    let temp_dir = TempDir::new().unwrap();
    let memory = memory_in(&temp_dir).await;

    memory
        .create_observation(&body("s1", "auth notes", &["authentication"], &[]))
        .await
        .unwrap();
    memory
        .create_observation(&body("s1", "hook notes", &["hooks"], &[]))
        .await
        .unwrap();

    let mut request = SearchRequest::new("anything", memory.project_path());
    request.strategy = SearchStrategy::FilterOnly;
    request.concept = Some("authentication".into());
    request.concepts = vec!["hooks".into()];

    let results = memory.search(request).await.unwrap();
    assert_eq!(results.len(), 2);
    let mut ids: Vec<&str> = results.iter().map(|r| r.observation.id.as_str()).collect();
    ids.dedup();
    assert_eq!(ids.len(), 2);
    for result in &results {
        assert_eq!(result.matched_by, vec![SearchSignal::ConceptFilter]);
    }
}

#[tokio::test]
async fn mode_inheritance_cycle_falls_back_to_default() {
    let temp_dir = TempDir::new().unwrap();
    let modes_dir = temp_dir.path().join(".open-mem").join("modes");
    std::fs::create_dir_all(&modes_dir).unwrap();
    std::fs::write(
        modes_dir.join("a.json"),
        r#"{"id": "a", "extends": "b", "concepts": ["x"]}"#,
    )
    .unwrap();
    std::fs::write(
        modes_dir.join("b.json"),
        r#"{"id": "b", "extends": "a", "concepts": ["y"]}"#,
    )
    .unwrap();

    let mut config = MemoryConfig::default();
    config.mode = "a".into();
    let memory = Memory::builder(temp_dir.path())
        .with_config(config)
        .without_processor()
        .connect()
        .await
        .unwrap();

    assert_eq!(memory.mode().id, "code");
}

#[tokio::test]
async fn progressive_disclosure_budget() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = MemoryConfig::default();
    config.max_index_entries = 3;
    config.context_full_observation_count = 1;
    config.max_context_tokens = 200;
    let memory = Memory::builder(temp_dir.path())
        .with_config(config)
        .without_processor()
        .connect()
        .await
        .unwrap();

    for (narrative_len, title) in [(160, "first"), (120, "second"), (200, "third")] {
        let mut b = body("s1", title, &[], &[]);
        b.narrative = "x".repeat(narrative_len);
        b.token_count = narrative_len as u32 / 4;
        b.discovery_tokens = narrative_len as u32;
        memory.create_observation(&b).await.unwrap();
    }

    let fragment = memory.session_start_context().await.unwrap();
    assert!(fragment.contains("first"));
    assert!(fragment.contains("second"));
    assert!(fragment.contains("third"));
    assert!(fragment.contains("### third"));
    assert!(fragment.contains("% saved"));
    assert!(openmem_core::estimate_tokens(&fragment) <= 210);
}

#[tokio::test]
async fn idempotent_capture_produces_one_observation() {
    let temp_dir = TempDir::new().unwrap();
    let memory = Memory::builder(temp_dir.path())
        .with_compressor(Arc::new(StaticCompressor::default()))
        .without_processor()
        .connect()
        .await
        .unwrap();

    for _ in 0..2 {
        memory
            .on_tool_execute("s1", "Bash", "the same long tool output", "call-1")
            .await
            .unwrap();
    }
    memory.trigger_processing().await.unwrap();

    let listed = memory
        .list_observations(&ObservationFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(memory.queue_status().await.unwrap().pending, 0);
}

#[tokio::test]
async fn capture_to_context_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let memory = Memory::builder(temp_dir.path())
        .with_compressor(Arc::new(StaticCompressor::default()))
        .without_processor()
        .connect()
        .await
        .unwrap();

    memory
        .on_tool_execute(
            "s1",
            "Bash",
            "implemented retry logic in src/queue.rs\nall tests pass",
            "call-1",
        )
        .await
        .unwrap();

    // Session idle drains the queue
    memory
        .on_event("session-idle", &serde_json::json!({"sessionId": "s1"}))
        .await
        .unwrap();

    let fragment = memory.on_session_start("s2").await.unwrap();
    assert!(fragment.contains("implemented retry logic"));

    let compaction = memory.on_session_compacting("s1").await.unwrap();
    assert!(compaction.iter().any(|l| l.contains("implemented retry logic")));

    // Session end completes and summarizes
    memory
        .on_event("session-end", &serde_json::json!({"sessionId": "s1"}))
        .await
        .unwrap();
    let detail = memory.get_session("s1").await.unwrap().unwrap();
    assert_eq!(
        detail.session.status,
        openmem_sdk::types::SessionStatus::Completed
    );
    assert!(detail.summary.is_some());
}

#[tokio::test]
async fn private_blocks_never_reach_storage() {
    let temp_dir = TempDir::new().unwrap();
    let memory = Memory::builder(temp_dir.path())
        .with_compressor(Arc::new(StaticCompressor::default()))
        .without_processor()
        .connect()
        .await
        .unwrap();

    memory
        .on_tool_execute(
            "s1",
            "Bash",
            "deploy finished <private>password: hunter2</private> in 30s",
            "call-1",
        )
        .await
        .unwrap();
    memory.trigger_processing().await.unwrap();

    let listed = memory
        .list_observations(&ObservationFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    let raw = listed[0].raw_tool_output.as_deref().unwrap_or("");
    assert!(!raw.contains("hunter2"));
    assert!(!listed[0].narrative.contains("hunter2"));
}

#[tokio::test]
async fn chat_messages_capture_user_role_only() {
    let temp_dir = TempDir::new().unwrap();
    let memory = memory_in(&temp_dir).await;

    memory
        .on_chat_message("s1", "assistant", "assistant reply that is long enough")
        .await
        .unwrap();
    memory
        .on_chat_message("s1", "user", "please refactor the session store")
        .await
        .unwrap();

    let listed = memory
        .list_observations(&ObservationFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].observation_type, ObservationType::Discovery);
    assert!(listed[0].narrative.contains("refactor the session store"));
}

#[tokio::test]
async fn export_import_round_trip() {
    let source_dir = TempDir::new().unwrap();
    let source = memory_in(&source_dir).await;

    let o1 = source
        .create_observation(&body("s1", "kept decision", &["database"], &[]))
        .await
        .unwrap();
    let o2 = source
        .create_observation(&body("s1", "kept discovery", &[], &["src/db.rs"]))
        .await
        .unwrap();
    // Tombstoned rows are not part of an export of active observations
    let doomed = source
        .create_observation(&body("s1", "doomed", &[], &[]))
        .await
        .unwrap();
    source.delete_observation(&doomed.id).await.unwrap();

    let data = source.export(None, None).await.unwrap();
    assert_eq!(data.observations.len(), 2);

    let target_dir = TempDir::new().unwrap();
    let target = memory_in(&target_dir).await;
    let report = target.import(&data, ImportMode::Overwrite).await.unwrap();
    assert_eq!(report.imported, 2);

    // Same ids, same content; imported rows are searchable in the target
    // under the target's own project scope once their sessions carry it
    for id in [&o1.id, &o2.id] {
        let imported = target
            .get_observation_including_archived(id)
            .await
            .unwrap()
            .unwrap();
        let original = source
            .get_observation_including_archived(id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(imported.title, original.title);
        assert_eq!(imported.revision_of, original.revision_of);
        assert_eq!(imported.superseded_by, original.superseded_by);
    }
}

#[tokio::test]
async fn user_scope_store_lives_at_configured_path() {
    let temp_dir = TempDir::new().unwrap();
    let explicit = temp_dir.path().join("shared-memory");

    let memory = openmem_sdk::MemoryBuilder::user_scope(Some(explicit.to_str().unwrap()))
        .unwrap()
        .without_processor()
        .connect()
        .await
        .unwrap();

    memory
        .create_observation(&body("s1", "cross-project habit", &[], &[]))
        .await
        .unwrap();
    assert!(explicit.join(".open-mem").join("memory.db").exists());
    assert_eq!(memory.stats().await.unwrap().total_observations, 1);
}

#[tokio::test]
async fn monotone_state_transitions() {
    let temp_dir = TempDir::new().unwrap();
    let memory = memory_in(&temp_dir).await;

    let o1 = memory
        .create_observation(&body("s1", "versioned", &[], &[]))
        .await
        .unwrap();
    let o2 = memory
        .update_observation(
            &o1.id,
            &ObservationPatch {
                title: Some("versioned v2".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Superseded rows cannot be revised or tombstoned again
    assert!(memory
        .update_observation(&o1.id, &ObservationPatch::default())
        .await
        .is_err());
    assert!(memory.delete_observation(&o1.id).await.is_err());

    // Tombstone the successor; it can no longer be revised
    memory.delete_observation(&o2.id).await.unwrap();
    assert!(memory
        .update_observation(&o2.id, &ObservationPatch::default())
        .await
        .is_err());
}
