use serde::{Deserialize, Serialize};

/// Domain entity extracted from observation narratives.
///
/// Entities are addressed by (entity_type, name) with case-insensitive
/// name matching; the store owns dedupe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub entity_type: String,
    pub name: String,
    pub description: Option<String>,
}

/// Directed edge between two entities, with the observation that introduced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: i64,
    pub relationship_type: String,
    pub from_entity_id: i64,
    pub to_entity_id: i64,
    pub observation_id: String,
}

/// Extractor output before the store assigns entity ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntity {
    pub entity_type: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRelationship {
    pub relationship_type: String,
    pub from: String,
    pub to: String,
}

/// Neighbourhood query result: entities reachable from a seed plus the
/// observation ids on the traversed edges
#[derive(Debug, Clone, Default)]
pub struct GraphNeighbourhood {
    pub entities: Vec<Entity>,
    pub observation_ids: Vec<String>,
}
