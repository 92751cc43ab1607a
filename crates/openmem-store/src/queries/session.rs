use chrono::Utc;
use openmem_types::{Session, SessionStatus};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::records::{fmt_ts, parse_ts};
use crate::{Error, Result};

fn from_row(row: &Row) -> rusqlite::Result<Session> {
    let status_raw: String = row.get(4)?;
    let started_raw: String = row.get(2)?;
    let ended_raw: Option<String> = row.get(3)?;
    Ok(Session {
        id: row.get(0)?,
        project_path: row.get(1)?,
        started_at: parse_ts(&started_raw).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())),
            )
        })?,
        ended_at: match ended_raw {
            Some(s) => Some(parse_ts(&s).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        err.to_string(),
                    )),
                )
            })?),
            None => None,
        },
        status: SessionStatus::parse(&status_raw).unwrap_or(SessionStatus::Active),
        observation_count: row.get(5)?,
        summary_id: row.get(6)?,
    })
}

const COLUMNS: &str = "id, project_path, started_at, ended_at, status, observation_count, summary_id";

/// Fetch a session or create it bound to the given project path. The first
/// capture of a session is what births the row.
pub fn get_or_create(conn: &Connection, session_id: &str, project_path: &str) -> Result<Session> {
    if let Some(session) = get(conn, session_id)? {
        return Ok(session);
    }

    let session = Session {
        id: session_id.to_string(),
        project_path: project_path.to_string(),
        started_at: Utc::now(),
        ended_at: None,
        status: SessionStatus::Active,
        observation_count: 0,
        summary_id: None,
    };
    conn.execute(
        "INSERT INTO sessions (id, project_path, started_at, ended_at, status, observation_count, summary_id) \
         VALUES (?1, ?2, ?3, NULL, ?4, 0, NULL)",
        params![
            &session.id,
            &session.project_path,
            fmt_ts(&session.started_at),
            session.status.as_str(),
        ],
    )?;
    Ok(session)
}

pub fn get(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM sessions WHERE id = ?1"),
            [session_id],
            from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_by_project(
    conn: &Connection,
    project_path: &str,
    limit: usize,
) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM sessions WHERE project_path = ?1 \
         ORDER BY started_at DESC LIMIT {limit}"
    ))?;
    let sessions = stmt
        .query_map([project_path], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(sessions)
}

pub fn set_status(conn: &Connection, session_id: &str, status: SessionStatus) -> Result<()> {
    let affected = match status {
        SessionStatus::Completed => conn.execute(
            "UPDATE sessions SET status = ?1, ended_at = ?2 WHERE id = ?3",
            params![status.as_str(), fmt_ts(&Utc::now()), session_id],
        )?,
        _ => conn.execute(
            "UPDATE sessions SET status = ?1 WHERE id = ?2",
            params![status.as_str(), session_id],
        )?,
    };
    if affected == 0 {
        return Err(Error::NotFound(format!("session '{}'", session_id)));
    }
    Ok(())
}

pub fn increment_observation_count(conn: &Connection, session_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET observation_count = observation_count + 1 WHERE id = ?1",
        [session_id],
    )?;
    Ok(())
}

pub fn set_summary(conn: &Connection, session_id: &str, summary_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET summary_id = ?1 WHERE id = ?2",
        params![summary_id, session_id],
    )?;
    Ok(())
}
