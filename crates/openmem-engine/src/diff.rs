use std::collections::HashSet;

use openmem_store::{Database, Error, Result};
use openmem_types::Observation;
use serde::Serialize;

/// One changed field between two revisions
#[derive(Debug, Clone, Serialize)]
pub struct FieldDiff {
    pub field: String,
    pub before: String,
    pub after: String,
    pub summary: String,
}

/// Field-level difference between two observations on the same lineage.
/// Order is ignored for set-valued fields. Fails with Validation when the
/// ids do not share a revision chain.
pub fn diff_revisions(db: &Database, old_id: &str, new_id: &str) -> Result<Vec<FieldDiff>> {
    let chain = db.get_lineage(old_id)?;
    let old = chain
        .iter()
        .find(|o| o.id == old_id)
        .ok_or_else(|| Error::NotFound(format!("observation '{}'", old_id)))?;
    let new = chain.iter().find(|o| o.id == new_id).ok_or_else(|| {
        Error::Validation(format!(
            "observations '{}' and '{}' are not on the same lineage",
            old_id, new_id
        ))
    })?;

    Ok(diff_fields(old, new))
}

fn diff_fields(old: &Observation, new: &Observation) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();

    scalar_diff(&mut diffs, "title", &old.title, &new.title);
    scalar_diff(
        &mut diffs,
        "subtitle",
        old.subtitle.as_deref().unwrap_or(""),
        new.subtitle.as_deref().unwrap_or(""),
    );
    scalar_diff(&mut diffs, "narrative", &old.narrative, &new.narrative);
    scalar_diff(
        &mut diffs,
        "type",
        old.observation_type.as_str(),
        new.observation_type.as_str(),
    );
    set_diff(&mut diffs, "facts", &old.facts, &new.facts);
    set_diff(&mut diffs, "concepts", &old.concepts, &new.concepts);
    set_diff(&mut diffs, "files_read", &old.files_read, &new.files_read);
    set_diff(
        &mut diffs,
        "files_modified",
        &old.files_modified,
        &new.files_modified,
    );
    scalar_diff(
        &mut diffs,
        "importance",
        &old.importance.to_string(),
        &new.importance.to_string(),
    );

    diffs
}

fn scalar_diff(diffs: &mut Vec<FieldDiff>, field: &str, before: &str, after: &str) {
    if before != after {
        diffs.push(FieldDiff {
            field: field.to_string(),
            before: before.to_string(),
            after: after.to_string(),
            summary: format!("{} changed", field),
        });
    }
}

fn set_diff(diffs: &mut Vec<FieldDiff>, field: &str, before: &[String], after: &[String]) {
    let before_set: HashSet<&String> = before.iter().collect();
    let after_set: HashSet<&String> = after.iter().collect();
    if before_set == after_set {
        return;
    }
    let added = after_set.difference(&before_set).count();
    let removed = before_set.difference(&after_set).count();
    diffs.push(FieldDiff {
        field: field.to_string(),
        before: before.join(", "),
        after: after.join(", "),
        summary: format!("{}: {} added, {} removed", field, added, removed),
    });
}
