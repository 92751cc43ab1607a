use rusqlite::Connection;

use crate::Result;
use crate::records::{MemoryStats, TypeCount};

/// Aggregate figures over active observations, optionally project-scoped
pub fn memory_stats(conn: &Connection, project_path: Option<&str>) -> Result<MemoryStats> {
    let (join, filter) = match project_path {
        Some(_) => (
            "JOIN sessions s ON o.session_id = s.id",
            "AND s.project_path = ?1",
        ),
        None => ("", ""),
    };

    let totals_sql = format!(
        "SELECT COUNT(*), COALESCE(SUM(o.token_count), 0), COALESCE(SUM(o.discovery_tokens), 0) \
         FROM observations o {join} \
         WHERE o.superseded_by IS NULL AND o.deleted_at IS NULL {filter}"
    );
    let (total_observations, total_token_count, total_discovery_tokens): (u32, i64, i64) =
        match project_path {
            Some(path) => conn.query_row(&totals_sql, [path], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })?,
            None => conn.query_row(&totals_sql, [], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })?,
        };
    let total_token_count = total_token_count as u64;
    let total_discovery_tokens = total_discovery_tokens as u64;

    let by_type_sql = format!(
        "SELECT o.type, COUNT(*) FROM observations o {join} \
         WHERE o.superseded_by IS NULL AND o.deleted_at IS NULL {filter} \
         GROUP BY o.type ORDER BY COUNT(*) DESC"
    );
    let mut stmt = conn.prepare(&by_type_sql)?;
    let map = |row: &rusqlite::Row| -> rusqlite::Result<TypeCount> {
        Ok(TypeCount {
            observation_type: row.get(0)?,
            count: row.get(1)?,
        })
    };
    let by_type = match project_path {
        Some(path) => stmt
            .query_map([path], map)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
        None => stmt
            .query_map([], map)?
            .collect::<std::result::Result<Vec<_>, _>>()?,
    };

    let sessions_sql = match project_path {
        Some(_) => "SELECT COUNT(*) FROM sessions WHERE project_path = ?1",
        None => "SELECT COUNT(*) FROM sessions",
    };
    let total_sessions = match project_path {
        Some(path) => conn.query_row(sessions_sql, [path], |row| row.get(0))?,
        None => conn.query_row(sessions_sql, [], |row| row.get(0))?,
    };

    Ok(MemoryStats {
        total_observations,
        by_type,
        total_sessions,
        total_token_count,
        total_discovery_tokens,
    })
}
