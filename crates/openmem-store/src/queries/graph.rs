use std::collections::{HashSet, VecDeque};

use openmem_types::{Entity, GraphNeighbourhood};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::Result;

/// Traversal ceiling for neighbourhood queries
pub const MAX_DEPTH: usize = 2;

fn from_row(row: &Row) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
    })
}

/// Insert or refresh an entity addressed by (type, name). Names compare
/// case-insensitively; the stored casing is the first one seen.
pub fn upsert_entity(
    conn: &Connection,
    entity_type: &str,
    name: &str,
    description: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO entities (entity_type, name, description) VALUES (?1, ?2, ?3) \
         ON CONFLICT(entity_type, name) DO UPDATE SET \
             description = COALESCE(?3, description)",
        params![entity_type, name, description],
    )?;

    let id: i64 = conn.query_row(
        "SELECT id FROM entities WHERE entity_type = ?1 AND name = ?2",
        params![entity_type, name],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn get_entity(conn: &Connection, entity_type: &str, name: &str) -> Result<Option<Entity>> {
    let row = conn
        .query_row(
            "SELECT id, entity_type, name, description FROM entities \
             WHERE entity_type = ?1 AND name = ?2",
            params![entity_type, name],
            from_row,
        )
        .optional()?;
    Ok(row)
}

/// Record a directed edge with the observation that introduced it.
/// Duplicate edges from the same observation are ignored.
pub fn insert_relationship(
    conn: &Connection,
    relationship_type: &str,
    from_entity_id: i64,
    to_entity_id: i64,
    observation_id: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO relationships \
         (relationship_type, from_entity_id, to_entity_id, observation_id) \
         VALUES (?1, ?2, ?3, ?4)",
        params![relationship_type, from_entity_id, to_entity_id, observation_id],
    )?;
    Ok(())
}

/// Entities reachable from any entity with the given name within `depth`
/// hops, together with the observation ids on the traversed edges.
/// Direction is ignored for traversal; edges stay directed in storage.
pub fn neighbours(conn: &Connection, name: &str, depth: usize) -> Result<GraphNeighbourhood> {
    let depth = depth.min(MAX_DEPTH);

    let mut seeds_stmt = conn.prepare(
        "SELECT id, entity_type, name, description FROM entities WHERE name = ?1",
    )?;
    let seeds = seeds_stmt
        .query_map([name], from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut visited: HashSet<i64> = seeds.iter().map(|e| e.id).collect();
    let mut queue: VecDeque<(i64, usize)> = seeds.iter().map(|e| (e.id, 0)).collect();
    let mut result = GraphNeighbourhood::default();
    let mut observation_ids: HashSet<String> = HashSet::new();

    let mut edges_stmt = conn.prepare(
        "SELECT from_entity_id, to_entity_id, observation_id FROM relationships \
         WHERE from_entity_id = ?1 OR to_entity_id = ?1",
    )?;
    let mut entity_stmt = conn.prepare(
        "SELECT id, entity_type, name, description FROM entities WHERE id = ?1",
    )?;

    while let Some((entity_id, dist)) = queue.pop_front() {
        if dist >= depth {
            continue;
        }
        let edges = edges_stmt
            .query_map([entity_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (from_id, to_id, observation_id) in edges {
            observation_ids.insert(observation_id);
            let other = if from_id == entity_id { to_id } else { from_id };
            if visited.insert(other) {
                if let Some(entity) =
                    entity_stmt.query_row([other], from_row).optional()?
                {
                    result.entities.push(entity);
                }
                queue.push_back((other, dist + 1));
            }
        }
    }

    result.observation_ids = observation_ids.into_iter().collect();
    result.observation_ids.sort();
    Ok(result)
}
