use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue state of a raw capture awaiting compression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Processing => "processing",
            PendingStatus::Completed => "completed",
            PendingStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PendingStatus::Pending),
            "processing" => Some(PendingStatus::Processing),
            "completed" => Some(PendingStatus::Completed),
            "failed" => Some(PendingStatus::Failed),
            _ => None,
        }
    }
}

/// One durable queue row: a redacted capture waiting for the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: String,
    pub session_id: String,
    pub tool_name: String,
    pub tool_output: String,
    /// Host-side call id; (session_id, call_id) dedupes re-enqueues
    pub call_id: String,
    pub created_at: DateTime<Utc>,
    pub status: PendingStatus,
    pub retry_count: u32,
    pub error: Option<String>,
}
