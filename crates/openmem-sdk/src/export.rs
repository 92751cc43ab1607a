use chrono::{DateTime, Utc};
use openmem_runtime::Result;
use openmem_store::{Database, ImportMode};
use openmem_types::{Observation, ObservationFilter, ObservationType, Session};
use serde::{Deserialize, Serialize};

pub const EXPORT_VERSION: u32 = 1;

/// JSON dump of a project's active observations, with the sessions they
/// reference so an import into a fresh database keeps project scoping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportData {
    pub version: u32,
    pub project_path: String,
    pub exported_at: DateTime<Utc>,
    pub sessions: Vec<Session>,
    pub observations: Vec<Observation>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

pub(crate) fn export(
    db: &Database,
    project_path: &str,
    observation_type: Option<ObservationType>,
    limit: Option<usize>,
) -> Result<ExportData> {
    let filter = ObservationFilter {
        observation_type,
        ..Default::default()
    };
    let observations =
        db.list_observations(project_path, &filter, limit.unwrap_or(usize::MAX >> 1), 0)?;

    let mut sessions: Vec<Session> = Vec::new();
    for observation in &observations {
        if sessions.iter().any(|s| s.id == observation.session_id) {
            continue;
        }
        if let Some(session) = db.get_session(&observation.session_id)? {
            sessions.push(session);
        }
    }

    Ok(ExportData {
        version: EXPORT_VERSION,
        project_path: project_path.to_string(),
        exported_at: Utc::now(),
        sessions,
        observations,
    })
}

pub(crate) fn import(db: &Database, data: &ExportData, mode: ImportMode) -> Result<ImportReport> {
    for session in &data.sessions {
        db.get_or_create_session(&session.id, &session.project_path)?;
    }

    let mut report = ImportReport::default();
    for observation in &data.observations {
        if db.import_observation(observation, mode)? {
            report.imported += 1;
        } else {
            report.skipped += 1;
        }
    }
    Ok(report)
}
