use rusqlite::Connection;

use crate::Result;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 1;

// NOTE: Storage Design Rationale
//
// Why JSON-in-TEXT for set-valued columns?
// - facts/concepts/files are read whole, never joined against
// - equality over them is order-independent and enforced in code
// - keeps the row shape stable while vocabularies evolve
//
// Why a standalone FTS5 table instead of external content?
// - only active observations are searchable (tombstones and superseded
//   rows must vanish from FTS), so the FTS rowset is a strict subset of
//   the observation table and is maintained inside the same transactions
//
// Why soft delete (deleted_at) on observations?
// - tombstoned rows stay addressable by id for audit
// - lineage chains survive for revision history

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version != 0 && current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            project_path TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            observation_count INTEGER NOT NULL DEFAULT 0,
            summary_id TEXT
        );

        CREATE TABLE IF NOT EXISTS observations (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            scope TEXT NOT NULL DEFAULT 'project',
            type TEXT NOT NULL,
            title TEXT NOT NULL,
            subtitle TEXT,
            narrative TEXT NOT NULL,
            facts TEXT NOT NULL DEFAULT '[]',
            concepts TEXT NOT NULL DEFAULT '[]',
            files_read TEXT NOT NULL DEFAULT '[]',
            files_modified TEXT NOT NULL DEFAULT '[]',
            raw_tool_output TEXT,
            tool_name TEXT,
            created_at TEXT NOT NULL,
            token_count INTEGER NOT NULL DEFAULT 0,
            discovery_tokens INTEGER NOT NULL DEFAULT 0,
            importance INTEGER NOT NULL DEFAULT 3,
            revision_of TEXT,
            superseded_by TEXT,
            superseded_at TEXT,
            deleted_at TEXT,
            FOREIGN KEY (session_id) REFERENCES sessions(id)
        );

        CREATE TABLE IF NOT EXISTS session_summaries (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            summary TEXT NOT NULL,
            key_decisions TEXT NOT NULL DEFAULT '[]',
            files_modified TEXT NOT NULL DEFAULT '[]',
            concepts TEXT NOT NULL DEFAULT '[]',
            request TEXT,
            investigated TEXT,
            learned TEXT,
            completed TEXT,
            next_steps TEXT,
            token_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            FOREIGN KEY (session_id) REFERENCES sessions(id)
        );

        CREATE TABLE IF NOT EXISTS pending_messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            tool_output TEXT NOT NULL,
            call_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            claimed_at TEXT,
            UNIQUE (session_id, call_id)
        );

        CREATE TABLE IF NOT EXISTS observation_vectors (
            observation_id TEXT PRIMARY KEY,
            dimension INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (observation_id) REFERENCES observations(id)
        );

        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            name TEXT NOT NULL COLLATE NOCASE,
            description TEXT,
            UNIQUE (entity_type, name)
        );

        CREATE TABLE IF NOT EXISTS relationships (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            relationship_type TEXT NOT NULL,
            from_entity_id INTEGER NOT NULL,
            to_entity_id INTEGER NOT NULL,
            observation_id TEXT NOT NULL,
            UNIQUE (relationship_type, from_entity_id, to_entity_id, observation_id),
            FOREIGN KEY (from_entity_id) REFERENCES entities(id),
            FOREIGN KEY (to_entity_id) REFERENCES entities(id)
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
            id UNINDEXED,
            title,
            narrative,
            facts,
            concepts,
            files
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_path);
        CREATE INDEX IF NOT EXISTS idx_observations_session ON observations(session_id);
        CREATE INDEX IF NOT EXISTS idx_observations_created ON observations(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_observations_type ON observations(type);
        CREATE INDEX IF NOT EXISTS idx_pending_status ON pending_messages(status, created_at);
        CREATE INDEX IF NOT EXISTS idx_relationships_from ON relationships(from_entity_id);
        CREATE INDEX IF NOT EXISTS idx_relationships_to ON relationships(to_entity_id);
        "#,
    )?;

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS relationships;
        DROP TABLE IF EXISTS entities;
        DROP TABLE IF EXISTS observation_vectors;
        DROP TABLE IF EXISTS pending_messages;
        DROP TABLE IF EXISTS session_summaries;
        DROP TABLE IF EXISTS observations_fts;
        DROP TABLE IF EXISTS observations;
        DROP TABLE IF EXISTS sessions;
        "#,
    )?;
    Ok(())
}
