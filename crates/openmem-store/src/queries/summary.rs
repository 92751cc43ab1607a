use chrono::Utc;
use openmem_types::{SessionSummary, SummaryDraft};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use crate::records::{fmt_ts, from_json, parse_ts, to_json};
use crate::Result;

const COLUMNS: &str = "ss.id, ss.session_id, ss.summary, ss.key_decisions, ss.files_modified, \
     ss.concepts, ss.request, ss.investigated, ss.learned, ss.completed, ss.next_steps, \
     ss.token_count, ss.created_at";

fn from_row(row: &Row) -> rusqlite::Result<SessionSummary> {
    let conv = |idx: usize, err: String| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, err)),
        )
    };
    let key_decisions: String = row.get(3)?;
    let files_modified: String = row.get(4)?;
    let concepts: String = row.get(5)?;
    let created_raw: String = row.get(12)?;
    Ok(SessionSummary {
        id: row.get(0)?,
        session_id: row.get(1)?,
        summary: row.get(2)?,
        key_decisions: from_json(&key_decisions).map_err(|e| conv(3, e.to_string()))?,
        files_modified: from_json(&files_modified).map_err(|e| conv(4, e.to_string()))?,
        concepts: from_json(&concepts).map_err(|e| conv(5, e.to_string()))?,
        request: row.get(6)?,
        investigated: row.get(7)?,
        learned: row.get(8)?,
        completed: row.get(9)?,
        next_steps: row.get(10)?,
        token_count: row.get(11)?,
        created_at: parse_ts(&created_raw).map_err(|e| conv(12, e.to_string()))?,
    })
}

pub fn create(
    conn: &Connection,
    session_id: &str,
    draft: &SummaryDraft,
    token_count: u32,
) -> Result<SessionSummary> {
    let summary = SessionSummary {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        summary: draft.summary.clone(),
        key_decisions: draft.key_decisions.clone(),
        files_modified: draft.files_modified.clone(),
        concepts: draft.concepts.clone(),
        request: draft.request.clone(),
        investigated: draft.investigated.clone(),
        learned: draft.learned.clone(),
        completed: draft.completed.clone(),
        next_steps: draft.next_steps.clone(),
        token_count,
        created_at: Utc::now(),
    };

    conn.execute(
        "INSERT INTO session_summaries (id, session_id, summary, key_decisions, files_modified, \
         concepts, request, investigated, learned, completed, next_steps, token_count, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            &summary.id,
            &summary.session_id,
            &summary.summary,
            to_json(&summary.key_decisions)?,
            to_json(&summary.files_modified)?,
            to_json(&summary.concepts)?,
            &summary.request,
            &summary.investigated,
            &summary.learned,
            &summary.completed,
            &summary.next_steps,
            summary.token_count,
            fmt_ts(&summary.created_at),
        ],
    )?;
    Ok(summary)
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<SessionSummary>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM session_summaries ss WHERE ss.id = ?1"),
            [id],
            from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn get_for_session(conn: &Connection, session_id: &str) -> Result<Option<SessionSummary>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM session_summaries ss \
                 WHERE ss.session_id = ?1 ORDER BY ss.created_at DESC LIMIT 1"
            ),
            [session_id],
            from_row,
        )
        .optional()?;
    Ok(row)
}

/// Most recent summary for any session of the project
pub fn latest_for_project(conn: &Connection, project_path: &str) -> Result<Option<SessionSummary>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM session_summaries ss \
                 JOIN sessions s ON ss.session_id = s.id \
                 WHERE s.project_path = ?1 ORDER BY ss.created_at DESC LIMIT 1"
            ),
            [project_path],
            from_row,
        )
        .optional()?;
    Ok(row)
}
