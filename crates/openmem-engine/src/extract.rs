use once_cell::sync::Lazy;
use openmem_store::{Database, Result};
use openmem_types::{
    ExtractedEntity, ExtractedRelationship, MemoryMode, Observation,
};
use regex::Regex;
use tracing::trace;

// Capitalized words or phrases; candidate entity mentions.
static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-zA-Z0-9]+(?:\s+[A-Z][a-zA-Z0-9]+)*)\b").unwrap());

// Verb patterns between two mentions: "X uses Y", "X depends on Y", ...
static VERB_EDGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b([A-Z][a-zA-Z0-9_]+)\s+(uses|modifies|implements|extends|calls|depends\s+on|relates\s+to)\s+([A-Z][a-zA-Z0-9_]+)\b",
    )
    .unwrap()
});

// Sentence-leading words and common prose starters are not entities
const STOPWORDS: &[&str] = &[
    "The", "This", "That", "These", "Those", "It", "We", "They", "When", "After", "Before",
    "While", "Then", "Now", "First", "Second", "Next", "Also", "However", "Because",
];

/// Minimum mention length kept as an entity
const MIN_NAME_LEN: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct EntityExtraction {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
}

/// Pattern-based extractor over observation narratives.
///
/// Files named by the observation become `file` entities; capitalized
/// mentions become `concept` entities; verb patterns between mentions
/// become relationships. Everything is filtered through the mode's
/// entity and relationship vocabularies.
#[derive(Debug, Default)]
pub struct EntityExtractor;

impl EntityExtractor {
    pub fn extract(&self, observation: &Observation, mode: &MemoryMode) -> EntityExtraction {
        let mut extraction = EntityExtraction::default();

        if mode.entity_types.iter().any(|t| t == "file") {
            for file in observation
                .files_read
                .iter()
                .chain(observation.files_modified.iter())
            {
                push_entity(&mut extraction.entities, "file", file);
            }
        }

        if mode.entity_types.iter().any(|t| t == "concept") {
            for cap in MENTION.captures_iter(&observation.narrative) {
                let name = cap[1].trim();
                if name.len() < MIN_NAME_LEN || STOPWORDS.contains(&name) {
                    continue;
                }
                push_entity(&mut extraction.entities, "concept", name);
            }
        }

        for cap in VERB_EDGE.captures_iter(&observation.narrative) {
            let from = cap[1].to_string();
            let verb = normalize_verb(&cap[2]);
            let to = cap[3].to_string();
            if !mode.relationship_types.iter().any(|t| t == &verb) {
                continue;
            }
            // Both endpoints must survive as entities
            push_entity(&mut extraction.entities, "concept", &from);
            push_entity(&mut extraction.entities, "concept", &to);
            let edge = ExtractedRelationship {
                relationship_type: verb,
                from,
                to,
            };
            if !extraction.relationships.contains(&edge) {
                extraction.relationships.push(edge);
            }
        }

        trace!(
            entities = extraction.entities.len(),
            relationships = extraction.relationships.len(),
            "extracted from narrative"
        );
        extraction
    }
}

fn push_entity(entities: &mut Vec<ExtractedEntity>, entity_type: &str, name: &str) {
    let candidate = ExtractedEntity {
        entity_type: entity_type.to_string(),
        name: name.to_string(),
    };
    let duplicate = entities
        .iter()
        .any(|e| e.entity_type == candidate.entity_type && e.name.eq_ignore_ascii_case(&candidate.name));
    if !duplicate {
        entities.push(candidate);
    }
}

fn normalize_verb(verb: &str) -> String {
    verb.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Persist an extraction against the observation that produced it
pub fn store_extraction(
    db: &Database,
    observation_id: &str,
    extraction: &EntityExtraction,
) -> Result<()> {
    for entity in &extraction.entities {
        db.upsert_entity(&entity.entity_type, &entity.name, None)?;
    }
    for edge in &extraction.relationships {
        let from = db.upsert_entity("concept", &edge.from, None)?;
        let to = db.upsert_entity("concept", &edge.to, None)?;
        db.insert_relationship(&edge.relationship_type, from, to, observation_id)?;
    }
    Ok(())
}
