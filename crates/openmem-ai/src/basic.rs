use std::collections::BTreeSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use openmem_types::{
    MemoryMode, Observation, ObservationDraft, ObservationType, SummaryDraft,
};
use regex::Regex;

use crate::{CaptureInput, Compressor, Result, Summarizer};

/// Narrative cap for the basic extraction path
const NARRATIVE_CAP: usize = 500;

// Path-like tokens: anything with a directory separator, or a bare filename
// with a known source/config extension.
static PATH_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:[\w.-]+/)+[\w.-]+|\b[\w-]+\.(?:rs|ts|tsx|js|jsx|py|go|java|rb|c|h|cpp|json|toml|yaml|yml|md|sql|sh)\b",
    )
    .unwrap()
});

/// Deterministic best-effort extraction used when no AI provider is
/// reachable: tool name as title, path-like tokens as files, the first
/// 500 characters of output as narrative. Always a `discovery` at default
/// importance.
#[derive(Debug, Default, Clone)]
pub struct BasicExtractor;

impl BasicExtractor {
    pub fn extract(&self, capture: &CaptureInput) -> ObservationDraft {
        let narrative: String = capture.tool_output.chars().take(NARRATIVE_CAP).collect();

        let files: BTreeSet<String> = PATH_TOKEN
            .find_iter(&capture.tool_output)
            .map(|m| m.as_str().to_string())
            .collect();

        ObservationDraft {
            observation_type: ObservationType::Discovery,
            title: format!("{} output", capture.tool_name),
            subtitle: None,
            narrative,
            facts: Vec::new(),
            concepts: Vec::new(),
            files_read: files.into_iter().collect(),
            files_modified: Vec::new(),
            importance: 3,
        }
    }
}

#[async_trait]
impl Compressor for BasicExtractor {
    async fn compress(
        &self,
        capture: &CaptureInput,
        _mode: &MemoryMode,
    ) -> Result<ObservationDraft> {
        Ok(self.extract(capture))
    }

    fn name(&self) -> &str {
        "basic-extractor"
    }
}

/// Deterministic recap used when no AI summarizer is wired: observation
/// titles become the summary, decision titles the key decisions, and the
/// modified-file union carries over.
#[derive(Debug, Default, Clone)]
pub struct BasicSummarizer;

#[async_trait]
impl Summarizer for BasicSummarizer {
    async fn summarize(
        &self,
        observations: &[Observation],
        _mode: &MemoryMode,
    ) -> Result<SummaryDraft> {
        let titles: Vec<&str> = observations.iter().map(|o| o.title.as_str()).collect();

        let key_decisions: Vec<String> = observations
            .iter()
            .filter(|o| o.observation_type == ObservationType::Decision)
            .map(|o| o.title.clone())
            .collect();

        let mut files_modified = BTreeSet::new();
        let mut concepts = BTreeSet::new();
        for o in observations {
            files_modified.extend(o.files_modified.iter().cloned());
            concepts.extend(o.concepts.iter().cloned());
        }

        Ok(SummaryDraft {
            summary: titles.join("; "),
            key_decisions,
            files_modified: files_modified.into_iter().collect(),
            concepts: concepts.into_iter().collect(),
            request: None,
            investigated: None,
            learned: None,
            completed: None,
            next_steps: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_paths_and_caps_narrative() {
        let capture = CaptureInput {
            tool_name: "Bash".into(),
            tool_output: format!(
                "compiled src/auth.rs and src/lib.rs, see notes.md {}",
                "x".repeat(600)
            ),
        };
        let draft = BasicExtractor.extract(&capture);
        assert_eq!(draft.title, "Bash output");
        assert_eq!(draft.observation_type, ObservationType::Discovery);
        assert!(draft.files_read.contains(&"src/auth.rs".to_string()));
        assert!(draft.files_read.contains(&"notes.md".to_string()));
        assert_eq!(draft.narrative.chars().count(), 500);
    }

    #[test]
    fn extraction_is_deterministic() {
        let capture = CaptureInput {
            tool_name: "Read".into(),
            tool_output: "content of src/main.rs".into(),
        };
        let a = BasicExtractor.extract(&capture);
        let b = BasicExtractor.extract(&capture);
        assert_eq!(a.files_read, b.files_read);
        assert_eq!(a.narrative, b.narrative);
    }
}
