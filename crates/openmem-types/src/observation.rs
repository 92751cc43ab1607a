use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Visibility scope of a memory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Project,
    User,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Project => "project",
            Scope::User => "user",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "project" => Some(Scope::Project),
            "user" => Some(Scope::User),
            _ => None,
        }
    }
}

/// Classification of a distilled observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    Decision,
    Bugfix,
    Feature,
    Refactor,
    Discovery,
    Change,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::Decision => "decision",
            ObservationType::Bugfix => "bugfix",
            ObservationType::Feature => "feature",
            ObservationType::Refactor => "refactor",
            ObservationType::Discovery => "discovery",
            ObservationType::Change => "change",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "decision" => Some(ObservationType::Decision),
            "bugfix" => Some(ObservationType::Bugfix),
            "feature" => Some(ObservationType::Feature),
            "refactor" => Some(ObservationType::Refactor),
            "discovery" => Some(ObservationType::Discovery),
            "change" => Some(ObservationType::Change),
            _ => None,
        }
    }

    /// Single-glyph marker used in the context index
    pub fn icon(&self) -> &'static str {
        match self {
            ObservationType::Decision => "⚖",
            ObservationType::Bugfix => "🐛",
            ObservationType::Feature => "✨",
            ObservationType::Refactor => "♻",
            ObservationType::Discovery => "🔍",
            ObservationType::Change => "✏",
        }
    }

    pub fn all() -> &'static [ObservationType] {
        &[
            ObservationType::Decision,
            ObservationType::Bugfix,
            ObservationType::Feature,
            ObservationType::Refactor,
            ObservationType::Discovery,
            ObservationType::Change,
        ]
    }
}

/// Lineage state filter for listing and retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObservationState {
    /// Active rows only: not superseded, not tombstoned
    #[default]
    Current,
    /// Superseded or tombstoned rows
    Archived,
    All,
}

/// One immutable distilled memory record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub session_id: String,
    pub scope: Scope,
    #[serde(rename = "type")]
    pub observation_type: ObservationType,

    pub title: String,
    pub subtitle: Option<String>,
    pub narrative: String,
    pub facts: Vec<String>,
    /// Set semantics: order is not significant
    pub concepts: Vec<String>,
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,

    pub raw_tool_output: Option<String>,
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,

    /// Distilled size, computed once at creation
    pub token_count: u32,
    /// Raw pre-compression size
    pub discovery_tokens: u32,
    /// 1 (noise) to 5 (load-bearing), default 3
    pub importance: u8,

    pub revision_of: Option<String>,
    pub superseded_by: Option<String>,
    pub superseded_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Observation {
    /// Active iff neither superseded nor tombstoned
    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none() && self.deleted_at.is_none()
    }
}

/// Compressor output: an observation body without identity or lineage fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationDraft {
    #[serde(rename = "type")]
    pub observation_type: ObservationType,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    pub narrative: String,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default = "default_importance")]
    pub importance: u8,
}

fn default_importance() -> u8 {
    3
}

/// Everything the store needs to mint a new observation row
#[derive(Debug, Clone)]
pub struct ObservationBody {
    pub session_id: String,
    pub scope: Scope,
    pub observation_type: ObservationType,
    pub title: String,
    pub subtitle: Option<String>,
    pub narrative: String,
    pub facts: Vec<String>,
    pub concepts: Vec<String>,
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,
    pub raw_tool_output: Option<String>,
    pub tool_name: Option<String>,
    pub token_count: u32,
    pub discovery_tokens: u32,
    pub importance: u8,
}

impl ObservationBody {
    pub fn from_draft(
        session_id: impl Into<String>,
        scope: Scope,
        draft: ObservationDraft,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            scope,
            observation_type: draft.observation_type,
            title: draft.title,
            subtitle: draft.subtitle,
            narrative: draft.narrative,
            facts: draft.facts,
            concepts: draft.concepts,
            files_read: draft.files_read,
            files_modified: draft.files_modified,
            raw_tool_output: None,
            tool_name: None,
            token_count: 0,
            discovery_tokens: 0,
            importance: draft.importance.clamp(1, 5),
        }
    }
}

/// Partial update applied through a revision; `None` keeps the predecessor value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationPatch {
    #[serde(rename = "type", default)]
    pub observation_type: Option<ObservationType>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub narrative: Option<String>,
    #[serde(default)]
    pub facts: Option<Vec<String>>,
    #[serde(default)]
    pub concepts: Option<Vec<String>>,
    #[serde(default)]
    pub files_read: Option<Vec<String>>,
    #[serde(default)]
    pub files_modified: Option<Vec<String>>,
    #[serde(default)]
    pub importance: Option<u8>,
}
