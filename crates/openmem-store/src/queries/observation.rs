use chrono::{DateTime, Utc};
use openmem_types::{
    Observation, ObservationBody, ObservationFilter, ObservationPatch, ObservationState, Scope,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;
use uuid::Uuid;

use crate::records::{fmt_ts, from_json, parse_ts, to_json};
use crate::vector::{cosine_similarity, decode_embedding, encode_embedding};
use crate::{Error, Result, records::SearchHit};

const COLUMNS: &str = "o.id, o.session_id, o.scope, o.type, o.title, o.subtitle, o.narrative, \
     o.facts, o.concepts, o.files_read, o.files_modified, o.raw_tool_output, o.tool_name, \
     o.created_at, o.token_count, o.discovery_tokens, o.importance, o.revision_of, \
     o.superseded_by, o.superseded_at, o.deleted_at";

/// How many recent rows the brute-force similarity scan considers
const SIMILARITY_SCAN_WINDOW: usize = 100;

/// Upper bound on FTS candidates gathered before in-memory filtering
const FTS_CANDIDATE_CAP: usize = 500;

fn conv_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn bad_enum(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    conv_err(
        idx,
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unknown {} '{}'", what, value),
        ),
    )
}

fn json_col(idx: usize, row: &Row) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    from_json(&raw).map_err(|err| conv_err(idx, err))
}

fn ts_col(idx: usize, row: &Row) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|err| conv_err(idx, err))
}

fn opt_ts_col(idx: usize, row: &Row) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(s) => Ok(Some(parse_ts(&s).map_err(|err| conv_err(idx, err))?)),
        None => Ok(None),
    }
}

pub fn from_row(row: &Row) -> rusqlite::Result<Observation> {
    let scope_raw: String = row.get(2)?;
    let type_raw: String = row.get(3)?;
    Ok(Observation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        scope: Scope::parse(&scope_raw).ok_or_else(|| bad_enum(2, "scope", &scope_raw))?,
        observation_type: openmem_types::ObservationType::parse(&type_raw)
            .ok_or_else(|| bad_enum(3, "observation type", &type_raw))?,
        title: row.get(4)?,
        subtitle: row.get(5)?,
        narrative: row.get(6)?,
        facts: json_col(7, row)?,
        concepts: json_col(8, row)?,
        files_read: json_col(9, row)?,
        files_modified: json_col(10, row)?,
        raw_tool_output: row.get(11)?,
        tool_name: row.get(12)?,
        created_at: ts_col(13, row)?,
        token_count: row.get(14)?,
        discovery_tokens: row.get(15)?,
        importance: row.get(16)?,
        revision_of: row.get(17)?,
        superseded_by: row.get(18)?,
        superseded_at: opt_ts_col(19, row)?,
        deleted_at: opt_ts_col(20, row)?,
    })
}

fn validate_body(body: &ObservationBody) -> Result<()> {
    if body.title.trim().is_empty() {
        return Err(Error::Validation("observation title must not be empty".into()));
    }
    if !(1..=5).contains(&body.importance) {
        return Err(Error::Validation(format!(
            "importance must be 1..=5, got {}",
            body.importance
        )));
    }
    Ok(())
}

pub fn create(conn: &Connection, body: &ObservationBody) -> Result<Observation> {
    validate_body(body)?;

    let observation = Observation {
        id: Uuid::new_v4().to_string(),
        session_id: body.session_id.clone(),
        scope: body.scope,
        observation_type: body.observation_type,
        title: body.title.clone(),
        subtitle: body.subtitle.clone(),
        narrative: body.narrative.clone(),
        facts: body.facts.clone(),
        concepts: body.concepts.clone(),
        files_read: body.files_read.clone(),
        files_modified: body.files_modified.clone(),
        raw_tool_output: body.raw_tool_output.clone(),
        tool_name: body.tool_name.clone(),
        created_at: Utc::now(),
        token_count: body.token_count,
        discovery_tokens: body.discovery_tokens,
        importance: body.importance,
        revision_of: None,
        superseded_by: None,
        superseded_at: None,
        deleted_at: None,
    };

    insert_row(conn, &observation)?;
    fts_insert(conn, &observation)?;
    Ok(observation)
}

/// Insert a fully-formed observation preserving id and lineage pointers.
/// Used by import; the FTS entry is only written for active rows.
pub fn insert_full(conn: &Connection, observation: &Observation, overwrite: bool) -> Result<bool> {
    let exists: Option<String> = conn
        .query_row(
            "SELECT id FROM observations WHERE id = ?1",
            [&observation.id],
            |row| row.get(0),
        )
        .optional()?;

    if exists.is_some() {
        if !overwrite {
            return Ok(false);
        }
        fts_delete(conn, &observation.id)?;
        conn.execute("DELETE FROM observations WHERE id = ?1", [&observation.id])?;
    }

    insert_row(conn, observation)?;
    if observation.is_active() {
        fts_insert(conn, observation)?;
    }
    Ok(true)
}

fn insert_row(conn: &Connection, o: &Observation) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO observations (
            id, session_id, scope, type, title, subtitle, narrative,
            facts, concepts, files_read, files_modified, raw_tool_output, tool_name,
            created_at, token_count, discovery_tokens, importance,
            revision_of, superseded_by, superseded_at, deleted_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
        "#,
        params![
            &o.id,
            &o.session_id,
            o.scope.as_str(),
            o.observation_type.as_str(),
            &o.title,
            &o.subtitle,
            &o.narrative,
            to_json(&o.facts)?,
            to_json(&o.concepts)?,
            to_json(&o.files_read)?,
            to_json(&o.files_modified)?,
            &o.raw_tool_output,
            &o.tool_name,
            fmt_ts(&o.created_at),
            o.token_count,
            o.discovery_tokens,
            o.importance,
            &o.revision_of,
            &o.superseded_by,
            o.superseded_at.as_ref().map(fmt_ts),
            o.deleted_at.as_ref().map(fmt_ts),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Observation>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM observations o \
                 WHERE o.id = ?1 AND o.superseded_by IS NULL AND o.deleted_at IS NULL"
            ),
            [id],
            from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn get_including_archived(conn: &Connection, id: &str) -> Result<Option<Observation>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM observations o WHERE o.id = ?1"),
            [id],
            from_row,
        )
        .optional()?;
    Ok(row)
}

/// Create a revision: a new active row carrying the patched fields, with
/// the predecessor atomically marked superseded. Fails with NotFound when
/// the id is absent or no longer active.
pub fn update(conn: &mut Connection, id: &str, patch: &ObservationPatch) -> Result<Observation> {
    let tx = conn.transaction()?;

    let existing = {
        let row = tx
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM observations o \
                     WHERE o.id = ?1 AND o.superseded_by IS NULL AND o.deleted_at IS NULL"
                ),
                [id],
                from_row,
            )
            .optional()?;
        row.ok_or_else(|| Error::NotFound(format!("active observation '{}'", id)))?
    };

    let now = Utc::now();
    let mut successor = existing.clone();
    successor.id = Uuid::new_v4().to_string();
    successor.created_at = now;
    successor.revision_of = Some(existing.id.clone());
    successor.superseded_by = None;
    successor.superseded_at = None;
    successor.deleted_at = None;

    if let Some(ty) = patch.observation_type {
        successor.observation_type = ty;
    }
    if let Some(title) = &patch.title {
        successor.title = title.clone();
    }
    if let Some(subtitle) = &patch.subtitle {
        successor.subtitle = Some(subtitle.clone());
    }
    if let Some(narrative) = &patch.narrative {
        successor.narrative = narrative.clone();
    }
    if let Some(facts) = &patch.facts {
        successor.facts = facts.clone();
    }
    if let Some(concepts) = &patch.concepts {
        successor.concepts = concepts.clone();
    }
    if let Some(files_read) = &patch.files_read {
        successor.files_read = files_read.clone();
    }
    if let Some(files_modified) = &patch.files_modified {
        successor.files_modified = files_modified.clone();
    }
    if let Some(importance) = patch.importance {
        if !(1..=5).contains(&importance) {
            return Err(Error::Validation(format!(
                "importance must be 1..=5, got {}",
                importance
            )));
        }
        successor.importance = importance;
    }

    {
        let conn: &Connection = &tx;
        insert_row(conn, &successor)?;
        conn.execute(
            "UPDATE observations SET superseded_by = ?1, superseded_at = ?2 WHERE id = ?3",
            params![&successor.id, fmt_ts(&now), id],
        )?;
        fts_delete(conn, id)?;
        fts_insert(conn, &successor)?;
        // The predecessor can never reappear in retrieval
        conn.execute(
            "DELETE FROM observation_vectors WHERE observation_id = ?1",
            [id],
        )?;
    }

    tx.commit()?;
    Ok(successor)
}

/// Tombstone an active row: it stays addressable by id but vanishes from
/// FTS and vector results.
pub fn delete(conn: &mut Connection, id: &str) -> Result<()> {
    let tx = conn.transaction()?;

    let affected = tx.execute(
        "UPDATE observations SET deleted_at = ?1 \
         WHERE id = ?2 AND superseded_by IS NULL AND deleted_at IS NULL",
        params![fmt_ts(&Utc::now()), id],
    )?;
    if affected == 0 {
        return Err(Error::NotFound(format!("active observation '{}'", id)));
    }

    {
        let conn: &Connection = &tx;
        fts_delete(conn, id)?;
        conn.execute(
            "DELETE FROM observation_vectors WHERE observation_id = ?1",
            [id],
        )?;
    }

    tx.commit()?;
    Ok(())
}

fn push_state_clause(clauses: &mut Vec<String>, state: ObservationState) {
    match state {
        ObservationState::Current => {
            clauses.push("o.superseded_by IS NULL AND o.deleted_at IS NULL".into());
        }
        ObservationState::Archived => {
            clauses.push("(o.superseded_by IS NOT NULL OR o.deleted_at IS NOT NULL)".into());
        }
        ObservationState::All => {}
    }
}

pub fn list_by_project(
    conn: &Connection,
    project_path: &str,
    filter: &ObservationFilter,
    limit: usize,
    offset: usize,
) -> Result<Vec<Observation>> {
    let mut clauses = vec!["s.project_path = ?".to_string()];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(project_path.to_string())];

    push_state_clause(&mut clauses, filter.state);
    if let Some(ty) = filter.observation_type {
        clauses.push("o.type = ?".into());
        params.push(Box::new(ty.as_str().to_string()));
    }
    if let Some(session_id) = &filter.session_id {
        clauses.push("o.session_id = ?".into());
        params.push(Box::new(session_id.clone()));
    }
    if let Some(min) = filter.importance_min {
        clauses.push("o.importance >= ?".into());
        params.push(Box::new(min));
    }
    if let Some(max) = filter.importance_max {
        clauses.push("o.importance <= ?".into());
        params.push(Box::new(max));
    }
    if let Some(after) = &filter.created_after {
        clauses.push("o.created_at > ?".into());
        params.push(Box::new(fmt_ts(after)));
    }
    if let Some(before) = &filter.created_before {
        clauses.push("o.created_at < ?".into());
        params.push(Box::new(fmt_ts(before)));
    }

    let query = format!(
        "SELECT {COLUMNS} FROM observations o \
         JOIN sessions s ON o.session_id = s.id \
         WHERE {} \
         ORDER BY o.created_at DESC, o.id DESC \
         LIMIT {} OFFSET {}",
        clauses.join(" AND "),
        limit,
        offset
    );

    let mut stmt = conn.prepare(&query)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Cross-session window of active rows strictly before then strictly after
/// the anchor timestamp, concatenated in chronological order.
pub fn around_timestamp(
    conn: &Connection,
    ts: &DateTime<Utc>,
    before: usize,
    after: usize,
    project_path: &str,
) -> Result<Vec<Observation>> {
    let anchor = fmt_ts(ts);

    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM observations o \
         JOIN sessions s ON o.session_id = s.id \
         WHERE s.project_path = ?1 AND o.superseded_by IS NULL AND o.deleted_at IS NULL \
           AND o.created_at < ?2 \
         ORDER BY o.created_at DESC, o.id DESC LIMIT {before}"
    ))?;
    let mut earlier = stmt
        .query_map(params![project_path, &anchor], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    earlier.reverse();

    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM observations o \
         JOIN sessions s ON o.session_id = s.id \
         WHERE s.project_path = ?1 AND o.superseded_by IS NULL AND o.deleted_at IS NULL \
           AND o.created_at > ?2 \
         ORDER BY o.created_at ASC, o.id ASC LIMIT {after}"
    ))?;
    let later = stmt
        .query_map(params![project_path, &anchor], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    earlier.extend(later);
    Ok(earlier)
}

/// Full revision chain, oldest to newest. Visited-set traversal keeps a
/// corrupted chain from looping.
pub fn lineage(conn: &Connection, id: &str) -> Result<Vec<Observation>> {
    let start = get_including_archived(conn, id)?
        .ok_or_else(|| Error::NotFound(format!("observation '{}'", id)))?;

    let mut visited = std::collections::HashSet::new();
    visited.insert(start.id.clone());

    let mut chain = std::collections::VecDeque::new();
    chain.push_back(start.clone());

    let mut cursor = start.revision_of.clone();
    while let Some(prev_id) = cursor {
        if !visited.insert(prev_id.clone()) {
            break;
        }
        match get_including_archived(conn, &prev_id)? {
            Some(prev) => {
                cursor = prev.revision_of.clone();
                chain.push_front(prev);
            }
            None => break,
        }
    }

    let mut cursor = start.superseded_by.clone();
    while let Some(next_id) = cursor {
        if !visited.insert(next_id.clone()) {
            break;
        }
        match get_including_archived(conn, &next_id)? {
            Some(next) => {
                cursor = next.superseded_by.clone();
                chain.push_back(next);
            }
            None => break,
        }
    }

    Ok(chain.into())
}

// --- full-text index maintenance -----------------------------------------

pub(crate) fn fts_insert(conn: &Connection, o: &Observation) -> Result<()> {
    let mut files = o.files_read.clone();
    files.extend(o.files_modified.iter().cloned());
    conn.execute(
        "INSERT INTO observations_fts (id, title, narrative, facts, concepts, files) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &o.id,
            &o.title,
            &o.narrative,
            o.facts.join(" "),
            o.concepts.join(" "),
            files.join(" "),
        ],
    )?;
    Ok(())
}

pub(crate) fn fts_delete(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM observations_fts WHERE id = ?1", [id])?;
    Ok(())
}

/// Turn free text into an FTS5 match expression: bare terms quoted and
/// joined with implicit AND. Returns None when no searchable token remains.
fn build_match_expr(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

fn column_match_expr(column: &str, term: &str) -> Option<String> {
    let cleaned = term.replace('"', "");
    if cleaned.trim().is_empty() {
        return None;
    }
    Some(format!("{}: \"{}\"", column, cleaned))
}

fn fts_hits(
    conn: &Connection,
    match_expr: &str,
    project_path: Option<&str>,
    cap: usize,
) -> Result<Vec<SearchHit>> {
    let (join, filter) = match project_path {
        Some(_) => (
            "JOIN sessions s ON o.session_id = s.id",
            "AND s.project_path = ?2",
        ),
        None => ("", ""),
    };
    let query = format!(
        "SELECT {COLUMNS}, observations_fts.rank FROM observations_fts \
         JOIN observations o ON o.id = observations_fts.id {join} \
         WHERE observations_fts MATCH ?1 \
           AND o.superseded_by IS NULL AND o.deleted_at IS NULL {filter} \
         ORDER BY observations_fts.rank ASC LIMIT {cap}"
    );

    let map = |row: &Row| -> rusqlite::Result<SearchHit> {
        Ok(SearchHit {
            observation: from_row(row)?,
            rank: row.get(21)?,
        })
    };

    let mut stmt = conn.prepare(&query)?;
    let collected = match project_path {
        Some(path) => stmt
            .query_map(params![match_expr, path], map)
            .and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>()),
        None => stmt
            .query_map(params![match_expr], map)
            .and_then(|rows| rows.collect::<std::result::Result<Vec<_>, _>>()),
    };

    // Malformed match expressions degrade to an empty result set
    match collected {
        Ok(hits) => Ok(hits),
        Err(err) => {
            debug!(error = %err, expr = match_expr, "FTS match failed, degrading to empty");
            Ok(Vec::new())
        }
    }
}

fn matches_filter(o: &Observation, filter: &ObservationFilter) -> bool {
    if let Some(ty) = filter.observation_type
        && o.observation_type != ty
    {
        return false;
    }
    if let Some(session_id) = &filter.session_id
        && &o.session_id != session_id
    {
        return false;
    }
    if let Some(min) = filter.importance_min
        && o.importance < min
    {
        return false;
    }
    if let Some(max) = filter.importance_max
        && o.importance > max
    {
        return false;
    }
    if let Some(after) = &filter.created_after
        && o.created_at <= *after
    {
        return false;
    }
    if let Some(before) = &filter.created_before
        && o.created_at >= *before
    {
        return false;
    }
    true
}

fn contains_ci(haystack: &[String], needle: &str) -> bool {
    haystack.iter().any(|h| h.eq_ignore_ascii_case(needle))
}

/// General FTS search with the full filter conjunction applied. Rank is the
/// FTS score, ascending (lower is better).
#[allow(clippy::too_many_arguments)]
pub fn search(
    conn: &Connection,
    query: &str,
    project_path: Option<&str>,
    filter: &ObservationFilter,
    concepts: &[String],
    files: &[String],
    limit: usize,
    offset: usize,
) -> Result<Vec<SearchHit>> {
    let Some(match_expr) = build_match_expr(query) else {
        return Ok(Vec::new());
    };

    let hits = fts_hits(conn, &match_expr, project_path, FTS_CANDIDATE_CAP)?;

    let filtered: Vec<SearchHit> = hits
        .into_iter()
        .filter(|hit| matches_filter(&hit.observation, filter))
        .filter(|hit| concepts.iter().all(|c| contains_ci(&hit.observation.concepts, c)))
        .filter(|hit| {
            files.iter().all(|f| {
                contains_ci(&hit.observation.files_read, f)
                    || contains_ci(&hit.observation.files_modified, f)
            })
        })
        .skip(offset)
        .take(limit)
        .collect();

    Ok(filtered)
}

/// FTS restricted to the concepts column
pub fn search_by_concept(
    conn: &Connection,
    concept: &str,
    limit: usize,
    project_path: Option<&str>,
) -> Result<Vec<Observation>> {
    let Some(expr) = column_match_expr("concepts", concept) else {
        return Ok(Vec::new());
    };
    let hits = fts_hits(conn, &expr, project_path, limit)?;
    Ok(hits.into_iter().map(|h| h.observation).collect())
}

/// FTS restricted to the files column
pub fn search_by_file(
    conn: &Connection,
    file: &str,
    limit: usize,
    project_path: Option<&str>,
) -> Result<Vec<Observation>> {
    let Some(expr) = column_match_expr("files", file) else {
        return Ok(Vec::new());
    };
    let hits = fts_hits(conn, &expr, project_path, limit)?;
    Ok(hits.into_iter().map(|h| h.observation).collect())
}

// --- vector operations ----------------------------------------------------

pub fn upsert_embedding(conn: &mut Connection, id: &str, vector: &[f32]) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM observation_vectors WHERE observation_id = ?1",
        [id],
    )?;
    tx.execute(
        "INSERT INTO observation_vectors (observation_id, dimension, embedding) VALUES (?1, ?2, ?3)",
        params![id, vector.len() as i64, encode_embedding(vector)],
    )?;
    tx.commit()?;
    Ok(())
}

fn scan_vectors(
    conn: &Connection,
    query: &[f32],
    extra_join: &str,
    extra_clause: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Vec<(String, f32)>> {
    let sql = format!(
        "SELECT v.observation_id, v.embedding FROM observation_vectors v \
         JOIN observations o ON o.id = v.observation_id {extra_join} \
         WHERE o.superseded_by IS NULL AND o.deleted_at IS NULL {extra_clause}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, |row| {
        let id: String = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        Ok((id, blob))
    })?;

    let mut scored = Vec::new();
    for row in rows {
        let (id, blob) = row?;
        let candidate = decode_embedding(&blob);
        if candidate.len() != query.len() {
            continue;
        }
        let similarity = cosine_similarity(query, &candidate);
        scored.push((id, 1.0 - similarity));
    }
    Ok(scored)
}

/// KNN over stored vectors: cosine distance ascending. Failures in the
/// vector path return empty so hybrid search degrades gracefully.
pub fn vec_search(
    conn: &Connection,
    query: &[f32],
    k: usize,
    project_path: Option<&str>,
) -> Vec<(String, f32)> {
    let result = match project_path {
        Some(path) => scan_vectors(
            conn,
            query,
            "JOIN sessions s ON o.session_id = s.id",
            "AND s.project_path = ?1",
            &[&path],
        ),
        None => scan_vectors(conn, query, "", "", &[]),
    };

    match result {
        Ok(mut scored) => {
            scored.sort_by(|a, b| a.1.total_cmp(&b.1));
            scored.truncate(k);
            scored
        }
        Err(err) => {
            debug!(error = %err, "vector search failed, degrading to empty");
            Vec::new()
        }
    }
}

/// KNN restricted to a candidate id set
pub fn vec_search_subset(
    conn: &Connection,
    query: &[f32],
    candidate_ids: &[String],
    k: usize,
) -> Vec<(String, f32)> {
    let result = scan_vectors(conn, query, "", "", &[]);
    match result {
        Ok(mut scored) => {
            scored.retain(|(id, _)| candidate_ids.contains(id));
            scored.sort_by(|a, b| a.1.total_cmp(&b.1));
            scored.truncate(k);
            scored
        }
        Err(err) => {
            debug!(error = %err, "vector subset search failed, degrading to empty");
            Vec::new()
        }
    }
}

/// Brute-force cosine similarity over the most recent active rows of one
/// type; used only for dedupe and conflict evaluation.
pub fn find_similar(
    conn: &Connection,
    embedding: &[f32],
    observation_type: openmem_types::ObservationType,
    threshold: f32,
    limit: usize,
) -> Result<Vec<(Observation, f32)>> {
    let sql = format!(
        "SELECT {COLUMNS}, v.embedding FROM observations o \
         JOIN observation_vectors v ON v.observation_id = o.id \
         WHERE o.type = ?1 AND o.superseded_by IS NULL AND o.deleted_at IS NULL \
         ORDER BY o.created_at DESC LIMIT {SIMILARITY_SCAN_WINDOW}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([observation_type.as_str()], |row| {
        let observation = from_row(row)?;
        let blob: Vec<u8> = row.get(21)?;
        Ok((observation, blob))
    })?;

    let mut matches = Vec::new();
    for row in rows {
        let (observation, blob) = row?;
        let candidate = decode_embedding(&blob);
        if candidate.len() != embedding.len() {
            continue;
        }
        let similarity = cosine_similarity(embedding, &candidate);
        if similarity >= threshold {
            matches.push((observation, similarity));
        }
    }
    matches.sort_by(|a, b| b.1.total_cmp(&a.1));
    matches.truncate(limit);
    Ok(matches)
}
