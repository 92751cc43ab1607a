use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A named bundle of vocabularies steering compression and extraction.
///
/// Modes may extend one another; resolution merges the chain root-first so a
/// child's additions land after its parent's. A missing or cyclic `extends`
/// chain resolves to the built-in default without error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMode {
    pub id: String,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub observation_types: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub relationship_types: Vec<String>,
}

pub const DEFAULT_MODE_ID: &str = "code";

impl MemoryMode {
    /// Built-in mode used when nothing is configured or resolution fails
    pub fn default_mode() -> Self {
        Self {
            id: DEFAULT_MODE_ID.to_string(),
            extends: None,
            observation_types: vec![
                "decision".into(),
                "bugfix".into(),
                "feature".into(),
                "refactor".into(),
                "discovery".into(),
                "change".into(),
            ],
            concepts: vec![
                "authentication".into(),
                "api".into(),
                "database".into(),
                "testing".into(),
                "configuration".into(),
                "performance".into(),
                "security".into(),
                "error-handling".into(),
                "hooks".into(),
                "routing".into(),
                "state-management".into(),
                "validation".into(),
            ],
            entity_types: vec![
                "file".into(),
                "function".into(),
                "module".into(),
                "service".into(),
                "config".into(),
                "concept".into(),
            ],
            relationship_types: vec![
                "uses".into(),
                "modifies".into(),
                "depends_on".into(),
                "implements".into(),
                "relates_to".into(),
            ],
        }
    }
}

/// Resolve a mode id against a loaded mode set, flattening `extends` chains.
///
/// Traversal tracks visited ids; a cycle or a dangling parent falls back to
/// the default mode deterministically.
pub fn resolve_mode(modes: &HashMap<String, MemoryMode>, id: &str) -> MemoryMode {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut cursor = Some(id.to_string());

    while let Some(current) = cursor {
        if !visited.insert(current.clone()) {
            return MemoryMode::default_mode();
        }
        match modes.get(&current) {
            Some(mode) => {
                cursor = mode.extends.clone();
                chain.push(mode);
            }
            None => return MemoryMode::default_mode(),
        }
    }

    // Root-first merge: parents contribute before children
    let mut resolved = MemoryMode {
        id: id.to_string(),
        extends: None,
        observation_types: Vec::new(),
        concepts: Vec::new(),
        entity_types: Vec::new(),
        relationship_types: Vec::new(),
    };
    for mode in chain.iter().rev() {
        merge_unique(&mut resolved.observation_types, &mode.observation_types);
        merge_unique(&mut resolved.concepts, &mode.concepts);
        merge_unique(&mut resolved.entity_types, &mode.entity_types);
        merge_unique(&mut resolved.relationship_types, &mode.relationship_types);
    }
    resolved
}

fn merge_unique(target: &mut Vec<String>, additions: &[String]) {
    for item in additions {
        if !target.iter().any(|existing| existing == item) {
            target.push(item.clone());
        }
    }
}
