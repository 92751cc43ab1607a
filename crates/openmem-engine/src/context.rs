use openmem_core::estimate_tokens;
use openmem_store::{Database, Result};
use openmem_types::{Observation, ObservationFilter, ObservationType};

/// Assembly knobs wired from configuration
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub max_index_entries: usize,
    pub context_full_observation_count: usize,
    /// Hard budget for the whole fragment, in approximate tokens
    pub max_context_tokens: u32,
    /// When set, only these types appear in the index
    pub include_types: Option<Vec<ObservationType>>,
    pub include_summary: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_index_entries: 50,
            context_full_observation_count: 3,
            max_context_tokens: 2000,
            include_types: None,
            include_summary: true,
        }
    }
}

/// Budget split for compaction context: index, details, decisions
#[derive(Debug, Clone)]
pub struct CompactionContext {
    pub index: Vec<String>,
    pub details: Vec<String>,
    pub decisions: Vec<String>,
}

fn index_line(o: &Observation) -> String {
    let tokens = estimate_tokens(&o.narrative);
    let files: Vec<&str> = o
        .files_modified
        .iter()
        .chain(o.files_read.iter())
        .take(2)
        .map(String::as_str)
        .collect();
    let mut line = format!(
        "{} [{}] {} (~{}t)",
        o.observation_type.icon(),
        o.observation_type.as_str(),
        o.title,
        tokens
    );
    if !files.is_empty() {
        line.push_str(" — ");
        line.push_str(&files.join(", "));
    }
    line
}

fn detail_block(o: &Observation) -> String {
    let mut block = format!("### {}\n{}", o.title, o.narrative);
    for fact in &o.facts {
        block.push_str("\n- ");
        block.push_str(fact);
    }
    block
}

fn recent_observations(
    db: &Database,
    project_path: &str,
    options: &ContextOptions,
) -> Result<Vec<Observation>> {
    let observations = db.list_observations(
        project_path,
        &ObservationFilter::default(),
        options.max_index_entries,
        0,
    )?;
    Ok(match &options.include_types {
        Some(types) => observations
            .into_iter()
            .filter(|o| types.contains(&o.observation_type))
            .collect(),
        None => observations,
    })
}

/// Build the session-start prompt fragment under a hard token budget.
///
/// Blocks fill in priority order: index lines, then full-detail expansions
/// of the most recent observations, then the last session summary. A block
/// that would cross the budget is omitted whole, so the fragment is always
/// well formed. The memory-economics footer is reserved up front.
pub fn assemble_context(
    db: &Database,
    project_path: &str,
    options: &ContextOptions,
) -> Result<String> {
    let observations = recent_observations(db, project_path, options)?;
    if observations.is_empty() {
        return Ok(String::new());
    }

    let stats = db.memory_stats(Some(project_path))?;
    let footer = economics_footer(stats.total_discovery_tokens, stats.total_token_count);

    let mut remaining =
        options.max_context_tokens.saturating_sub(estimate_tokens(&footer));
    let mut sections: Vec<String> = Vec::new();

    // Priority 1: index lines
    let mut index_lines = Vec::new();
    for o in &observations {
        let line = index_line(o);
        let cost = estimate_tokens(&line);
        if cost > remaining {
            break;
        }
        remaining -= cost;
        index_lines.push(line);
    }
    if !index_lines.is_empty() {
        sections.push(format!("## Recent memory\n{}", index_lines.join("\n")));
    }

    // Priority 2: full detail for the most recent observations
    for o in observations.iter().take(options.context_full_observation_count) {
        let block = detail_block(o);
        let cost = estimate_tokens(&block);
        if cost > remaining {
            continue;
        }
        remaining -= cost;
        sections.push(block);
    }

    // Priority 3: last session summary key fields
    if options.include_summary
        && let Some(summary) = db.latest_summary_for_project(project_path)?
    {
        let mut block = format!("## Last session\n{}", summary.summary);
        if !summary.key_decisions.is_empty() {
            block.push_str("\nKey decisions:");
            for decision in &summary.key_decisions {
                block.push_str("\n- ");
                block.push_str(decision);
            }
        }
        if let Some(next_steps) = &summary.next_steps {
            block.push_str("\nNext steps: ");
            block.push_str(next_steps);
        }
        let cost = estimate_tokens(&block);
        if cost <= remaining {
            sections.push(block);
        }
    }

    sections.push(footer);
    Ok(sections.join("\n\n"))
}

fn economics_footer(discovery_tokens: u64, injected_tokens: u64) -> String {
    let saved_pct = if discovery_tokens > 0 {
        100 - (injected_tokens * 100 / discovery_tokens).min(100)
    } else {
        0
    };
    format!(
        "Memory: {} raw tokens distilled to {} ({}% saved)",
        discovery_tokens, injected_tokens, saved_pct
    )
}

/// Context for host-side compaction: a 40% index, 40% observation details,
/// 20% key decisions split of the given budget.
pub fn assemble_compaction(
    db: &Database,
    project_path: &str,
    budget_tokens: u32,
    options: &ContextOptions,
) -> Result<CompactionContext> {
    let observations = recent_observations(db, project_path, options)?;

    let index_budget = budget_tokens * 40 / 100;
    let detail_budget = budget_tokens * 40 / 100;
    let decision_budget = budget_tokens * 20 / 100;

    let mut index = Vec::new();
    let mut remaining = index_budget;
    for o in &observations {
        let line = index_line(o);
        let cost = estimate_tokens(&line);
        if cost > remaining {
            break;
        }
        remaining -= cost;
        index.push(line);
    }

    let mut details = Vec::new();
    let mut remaining = detail_budget;
    for o in &observations {
        let block = format!("{}: {}", o.title, o.narrative);
        let cost = estimate_tokens(&block);
        if cost > remaining {
            continue;
        }
        remaining -= cost;
        details.push(block);
    }

    let mut decisions = Vec::new();
    let mut remaining = decision_budget;
    for o in observations
        .iter()
        .filter(|o| o.observation_type == ObservationType::Decision)
    {
        let cost = estimate_tokens(&o.title);
        if cost > remaining {
            break;
        }
        remaining -= cost;
        decisions.push(o.title.clone());
    }

    Ok(CompactionContext {
        index,
        details,
        decisions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use openmem_core::estimate_tokens;
    use openmem_types::{ObservationBody, Scope};

    fn seed(narrative_len: usize, title: &str) -> ObservationBody {
        ObservationBody {
            session_id: "s1".into(),
            scope: Scope::Project,
            observation_type: ObservationType::Discovery,
            title: title.into(),
            subtitle: None,
            narrative: "x".repeat(narrative_len),
            facts: vec![],
            concepts: vec![],
            files_read: vec!["src/a.rs".into()],
            files_modified: vec![],
            raw_tool_output: None,
            tool_name: None,
            token_count: (narrative_len / 4) as u32,
            discovery_tokens: (narrative_len * 10 / 4) as u32,
            importance: 3,
        }
    }

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.get_or_create_session("s1", "/p").unwrap();
        db
    }

    #[test]
    fn fragment_stays_within_budget() {
        let db = test_db();
        // Token sizes roughly 40 / 30 / 50
        db.create_observation(&seed(160, "first change")).unwrap();
        db.create_observation(&seed(120, "second change")).unwrap();
        db.create_observation(&seed(200, "third change")).unwrap();

        let options = ContextOptions {
            max_index_entries: 3,
            context_full_observation_count: 1,
            max_context_tokens: 200,
            include_types: None,
            include_summary: true,
        };
        let fragment = assemble_context(&db, "/p", &options).unwrap();

        assert!(fragment.contains("first change"));
        assert!(fragment.contains("second change"));
        assert!(fragment.contains("third change"));
        // Most recent observation expanded in full
        assert!(fragment.contains("### third change"));
        assert!(fragment.contains("% saved"));
        assert!(estimate_tokens(&fragment) <= 200 + 10);
    }

    #[test]
    fn index_line_format() {
        let observation = openmem_types::Observation {
            id: "o1".into(),
            session_id: "s1".into(),
            scope: Scope::Project,
            observation_type: ObservationType::Discovery,
            title: "Observed retry behavior".into(),
            subtitle: None,
            narrative: "x".repeat(52),
            facts: vec![],
            concepts: vec![],
            files_read: vec!["src/queue.rs".into()],
            files_modified: vec![],
            raw_tool_output: None,
            tool_name: None,
            created_at: chrono::Utc::now(),
            token_count: 13,
            discovery_tokens: 130,
            importance: 3,
            revision_of: None,
            superseded_by: None,
            superseded_at: None,
            deleted_at: None,
        };
        insta::assert_snapshot!(
            index_line(&observation),
            @"🔍 [discovery] Observed retry behavior (~13t) — src/queue.rs"
        );
    }

    #[test]
    fn empty_project_produces_empty_fragment() {
        let db = test_db();
        assert_eq!(assemble_context(&db, "/p", &ContextOptions::default()).unwrap(), "");
    }

    #[test]
    fn oversized_detail_block_is_omitted_whole() {
        let db = test_db();
        db.create_observation(&seed(4000, "huge")).unwrap();

        let options = ContextOptions {
            max_index_entries: 3,
            context_full_observation_count: 1,
            max_context_tokens: 100,
            include_types: None,
            include_summary: false,
        };
        let fragment = assemble_context(&db, "/p", &options).unwrap();
        // Index line fits, the thousand-token narrative does not
        assert!(fragment.contains("[discovery] huge"));
        assert!(!fragment.contains("### huge"));
    }

    #[test]
    fn type_filter_limits_index() {
        let db = test_db();
        db.create_observation(&seed(40, "kept")).unwrap();
        let mut decision = seed(40, "dropped");
        decision.observation_type = ObservationType::Decision;
        db.create_observation(&decision).unwrap();

        let options = ContextOptions {
            include_types: Some(vec![ObservationType::Discovery]),
            ..Default::default()
        };
        let fragment = assemble_context(&db, "/p", &options).unwrap();
        assert!(fragment.contains("kept"));
        assert!(!fragment.contains("dropped"));
    }

    #[test]
    fn compaction_split_respects_sub_budgets() {
        let db = test_db();
        for i in 0..5 {
            db.create_observation(&seed(100, &format!("observation {}", i)))
                .unwrap();
        }
        let mut decision = seed(40, "use sqlite for storage");
        decision.observation_type = ObservationType::Decision;
        db.create_observation(&decision).unwrap();

        let ctx =
            assemble_compaction(&db, "/p", 400, &ContextOptions::default()).unwrap();
        assert!(!ctx.index.is_empty());
        assert!(!ctx.details.is_empty());
        assert_eq!(ctx.decisions, vec!["use sqlite for storage"]);

        let index_cost: u32 = ctx.index.iter().map(|l| estimate_tokens(l)).sum();
        assert!(index_cost <= 160);
    }
}
