use chrono::{Duration, Utc};
use openmem_types::{PendingMessage, PendingStatus};
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use crate::records::{QueueStatus, fmt_ts, parse_ts};
use crate::{Error, Result};

/// Attempts before a pending row is parked as failed
pub const MAX_RETRIES: u32 = 3;

const COLUMNS: &str =
    "id, session_id, tool_name, tool_output, call_id, created_at, status, retry_count, error";

fn from_row(row: &Row) -> rusqlite::Result<PendingMessage> {
    let created_raw: String = row.get(5)?;
    let status_raw: String = row.get(6)?;
    Ok(PendingMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        tool_name: row.get(2)?,
        tool_output: row.get(3)?,
        call_id: row.get(4)?,
        created_at: parse_ts(&created_raw).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())),
            )
        })?,
        status: PendingStatus::parse(&status_raw).unwrap_or(PendingStatus::Pending),
        retry_count: row.get(7)?,
        error: row.get(8)?,
    })
}

/// Persist a capture for later compression. Re-enqueues with the same
/// (session_id, call_id) are a no-op; the duplicate returns None.
pub fn enqueue(
    conn: &Connection,
    session_id: &str,
    tool_name: &str,
    tool_output: &str,
    call_id: &str,
) -> Result<Option<PendingMessage>> {
    let message = PendingMessage {
        id: Uuid::new_v4().to_string(),
        session_id: session_id.to_string(),
        tool_name: tool_name.to_string(),
        tool_output: tool_output.to_string(),
        call_id: call_id.to_string(),
        created_at: Utc::now(),
        status: PendingStatus::Pending,
        retry_count: 0,
        error: None,
    };

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO pending_messages \
         (id, session_id, tool_name, tool_output, call_id, created_at, status, retry_count, error) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, NULL)",
        params![
            &message.id,
            &message.session_id,
            &message.tool_name,
            &message.tool_output,
            &message.call_id,
            fmt_ts(&message.created_at),
        ],
    )?;

    Ok(if inserted > 0 { Some(message) } else { None })
}

/// Atomically mark up to `batch_size` oldest pending rows as processing and
/// return them. Claimed rows are invisible to other claimants until they
/// complete, fail, or go stale.
pub fn claim(conn: &mut Connection, batch_size: usize) -> Result<Vec<PendingMessage>> {
    let tx = conn.transaction()?;

    let claimed = {
        let mut stmt = tx.prepare(&format!(
            "SELECT {COLUMNS} FROM pending_messages WHERE status = 'pending' \
             ORDER BY created_at ASC, id ASC LIMIT {batch_size}"
        ))?;
        let rows = stmt
            .query_map([], from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let now = fmt_ts(&Utc::now());
        for message in &rows {
            tx.execute(
                "UPDATE pending_messages SET status = 'processing', claimed_at = ?1 WHERE id = ?2",
                params![&now, &message.id],
            )?;
        }
        rows
    };

    tx.commit()?;

    Ok(claimed
        .into_iter()
        .map(|mut m| {
            m.status = PendingStatus::Processing;
            m
        })
        .collect())
}

pub fn complete(conn: &Connection, id: &str) -> Result<()> {
    let affected = conn.execute("DELETE FROM pending_messages WHERE id = ?1", [id])?;
    if affected == 0 {
        return Err(Error::NotFound(format!("pending message '{}'", id)));
    }
    Ok(())
}

/// Record a processing failure. Rows below the retry ceiling return to
/// pending; the rest are parked as failed with the error attached.
pub fn fail(conn: &Connection, id: &str, error: &str) -> Result<PendingStatus> {
    let retry_count: u32 = conn
        .query_row(
            "SELECT retry_count FROM pending_messages WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .map_err(|_| Error::NotFound(format!("pending message '{}'", id)))?;

    let next_retry = retry_count + 1;
    let status = if next_retry < MAX_RETRIES {
        PendingStatus::Pending
    } else {
        PendingStatus::Failed
    };

    conn.execute(
        "UPDATE pending_messages SET status = ?1, retry_count = ?2, error = ?3, claimed_at = NULL \
         WHERE id = ?4",
        params![status.as_str(), next_retry, error, id],
    )?;
    Ok(status)
}

/// Return stale processing rows to pending. Run at startup so a batch cut
/// short by process death is retried.
pub fn revert_stale(conn: &Connection, older_than: Duration) -> Result<usize> {
    let cutoff = fmt_ts(&(Utc::now() - older_than));
    let affected = conn.execute(
        "UPDATE pending_messages SET status = 'pending', claimed_at = NULL \
         WHERE status = 'processing' AND (claimed_at IS NULL OR claimed_at < ?1)",
        [&cutoff],
    )?;
    Ok(affected)
}

pub fn counts(conn: &Connection) -> Result<QueueStatus> {
    let mut status = QueueStatus::default();
    let mut stmt =
        conn.prepare("SELECT status, COUNT(*) FROM pending_messages GROUP BY status")?;
    let rows = stmt.query_map([], |row| {
        let status: String = row.get(0)?;
        let count: u32 = row.get(1)?;
        Ok((status, count))
    })?;
    for row in rows {
        let (kind, count) = row?;
        match kind.as_str() {
            "pending" => status.pending = count,
            "processing" => status.processing = count,
            "failed" => status.failed = count,
            _ => {}
        }
    }
    Ok(status)
}
