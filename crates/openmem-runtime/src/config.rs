use std::collections::HashMap;
use std::path::{Path, PathBuf};

use openmem_types::{MemoryMode, ObservationType, resolve_mode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// User-tunable configuration, loaded from `<project>/.open-mem/config.json`.
/// Absent file or absent fields mean defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryConfig {
    /// Pending rows claimed per batch
    pub batch_size: usize,
    /// Interval trigger for the queue processor, in seconds
    pub process_interval_secs: u64,
    /// Processing rows older than this revert to pending at startup
    pub stale_claim_secs: u64,
    /// Per-call AI timeout, in seconds
    pub ai_timeout_secs: u64,

    pub conflict_resolution: bool,
    /// Neighbour gathering band for conflict evaluation
    pub similarity_band: f32,
    pub supersede_threshold: f32,
    pub drop_threshold: f32,

    pub entity_extraction: bool,
    pub graph_search: bool,
    pub reranking_max_candidates: usize,

    pub max_index_entries: usize,
    pub context_full_observation_count: usize,
    pub max_context_tokens: u32,
    /// Observation types surfaced in the context index; empty means all
    pub context_types: Vec<String>,

    /// Extra case-insensitive redaction patterns
    pub redaction_patterns: Vec<String>,
    /// Redacted captures shorter than this are suppressed
    pub min_capture_len: usize,
    /// User chat messages are truncated to this many characters
    pub chat_message_cap: usize,

    /// Active mode id; resolution falls back to the built-in default
    pub mode: String,
    /// Directory of mode JSON files (defaults to `<memory dir>/modes`)
    pub modes_dir: Option<PathBuf>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            process_interval_secs: 30,
            stale_claim_secs: 300,
            ai_timeout_secs: 30,
            conflict_resolution: true,
            similarity_band: 0.80,
            supersede_threshold: 0.90,
            drop_threshold: 0.97,
            entity_extraction: true,
            graph_search: true,
            reranking_max_candidates: 20,
            max_index_entries: 50,
            context_full_observation_count: 3,
            max_context_tokens: 2000,
            context_types: Vec::new(),
            redaction_patterns: Vec::new(),
            min_capture_len: openmem_core::DEFAULT_MIN_OUTPUT_LEN,
            chat_message_cap: 2000,
            mode: openmem_types::DEFAULT_MODE_ID.to_string(),
            modes_dir: None,
        }
    }
}

impl MemoryConfig {
    pub fn load(project_root: &Path) -> Result<Self> {
        Self::load_from(&openmem_core::config_path(project_root))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: MemoryConfig = serde_json::from_str(&content)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|err| Error::Config(err.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Parse the configured context type filter; unknown names are dropped
    pub fn context_type_filter(&self) -> Option<Vec<ObservationType>> {
        if self.context_types.is_empty() {
            return None;
        }
        let parsed: Vec<ObservationType> = self
            .context_types
            .iter()
            .filter_map(|s| ObservationType::parse(s))
            .collect();
        Some(parsed)
    }

    /// Resolve the active mode against the configured modes directory.
    /// Missing directories, unreadable files, and cyclic `extends` chains
    /// all land on the built-in default mode.
    pub fn resolve_active_mode(&self, project_root: &Path) -> MemoryMode {
        let modes_dir = self
            .modes_dir
            .clone()
            .unwrap_or_else(|| openmem_core::memory_dir(project_root).join("modes"));
        let modes = load_modes(&modes_dir);
        resolve_mode(&modes, &self.mode)
    }
}

/// Load every `*.json` mode definition in a directory. Files that fail to
/// parse are skipped with a warning.
pub fn load_modes(dir: &Path) -> HashMap<String, MemoryMode> {
    let mut modes = HashMap::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return modes;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<MemoryMode>(&content) {
                Ok(mode) => {
                    modes.insert(mode.id.clone(), mode);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unparseable mode file");
                }
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable mode file");
            }
        }
    }
    modes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_nonexistent_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = MemoryConfig::load(temp_dir.path()).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.process_interval_secs, 30);
    }

    #[test]
    fn save_and_load_round_trip() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.json");

        let mut config = MemoryConfig::default();
        config.batch_size = 25;
        config.redaction_patterns = vec!["secret-\\d+".into()];
        config.save_to(&path)?;

        let loaded = MemoryConfig::load_from(&path)?;
        assert_eq!(loaded.batch_size, 25);
        assert_eq!(loaded.redaction_patterns, vec!["secret-\\d+"]);
        Ok(())
    }

    #[test]
    fn partial_config_keeps_defaults() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{"batchSize": 3}"#)?;

        let loaded = MemoryConfig::load_from(&path)?;
        assert_eq!(loaded.batch_size, 3);
        assert_eq!(loaded.max_context_tokens, 2000);
        Ok(())
    }

    #[test]
    fn mode_files_load_and_cycles_fall_back() {
        let temp_dir = TempDir::new().unwrap();
        let modes_dir = temp_dir.path().join(".open-mem").join("modes");
        std::fs::create_dir_all(&modes_dir).unwrap();
        std::fs::write(
            modes_dir.join("a.json"),
            r#"{"id": "a", "extends": "b", "concepts": ["x"]}"#,
        )
        .unwrap();
        std::fs::write(
            modes_dir.join("b.json"),
            r#"{"id": "b", "extends": "a", "concepts": ["y"]}"#,
        )
        .unwrap();

        let mut config = MemoryConfig::default();
        config.mode = "a".into();
        let resolved = config.resolve_active_mode(temp_dir.path());
        assert_eq!(resolved.id, openmem_types::DEFAULT_MODE_ID);
    }

    #[test]
    fn mode_extends_merges_vocabularies() {
        let temp_dir = TempDir::new().unwrap();
        let modes_dir = temp_dir.path().join("modes");
        std::fs::create_dir_all(&modes_dir).unwrap();
        std::fs::write(
            modes_dir.join("base.json"),
            r#"{"id": "base", "concepts": ["api"]}"#,
        )
        .unwrap();
        std::fs::write(
            modes_dir.join("web.json"),
            r#"{"id": "web", "extends": "base", "concepts": ["routing"]}"#,
        )
        .unwrap();

        let mut config = MemoryConfig::default();
        config.mode = "web".into();
        config.modes_dir = Some(modes_dir);
        let resolved = config.resolve_active_mode(temp_dir.path());
        assert_eq!(resolved.id, "web");
        assert_eq!(resolved.concepts, vec!["api", "routing"]);
    }
}
