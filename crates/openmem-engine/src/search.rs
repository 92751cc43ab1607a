use std::collections::HashMap;

use openmem_ai::{Embedder, RerankCandidate, Reranker};
use openmem_store::{Database, Result};
use openmem_types::{
    Observation, ObservationFilter, SearchExplain, SearchRequest, SearchResult, SearchSignal,
    SearchStrategy, SignalScore,
};
use tracing::{debug, warn};

/// RRF constant; the usual k = 60
const RRF_K: f64 = 60.0;

/// How far past the requested window each signal over-fetches before fusion
const GATHER_SLACK: usize = 30;

/// Orchestrator knobs wired from configuration
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub graph_enabled: bool,
    /// 0 disables the reranking pass
    pub rerank_max_candidates: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            graph_enabled: true,
            rerank_max_candidates: 0,
        }
    }
}

fn filter_from_request(req: &SearchRequest) -> ObservationFilter {
    ObservationFilter {
        session_id: req.session_id.clone(),
        observation_type: req.observation_type,
        importance_min: req.importance_min,
        importance_max: req.importance_max,
        created_after: req.created_after,
        created_before: req.created_before,
        state: openmem_types::ObservationState::Current,
    }
}

fn matches_filter(o: &Observation, filter: &ObservationFilter) -> bool {
    if let Some(ty) = filter.observation_type
        && o.observation_type != ty
    {
        return false;
    }
    if let Some(session_id) = &filter.session_id
        && &o.session_id != session_id
    {
        return false;
    }
    if let Some(min) = filter.importance_min
        && o.importance < min
    {
        return false;
    }
    if let Some(max) = filter.importance_max
        && o.importance > max
    {
        return false;
    }
    if let Some(after) = &filter.created_after
        && o.created_at <= *after
    {
        return false;
    }
    if let Some(before) = &filter.created_before
        && o.created_at >= *before
    {
        return false;
    }
    true
}

fn contains_ci(haystack: &[String], needle: &str) -> bool {
    haystack.iter().any(|h| h.eq_ignore_ascii_case(needle))
}

fn matches_term_conjunction(o: &Observation, concepts: &[String], files: &[String]) -> bool {
    concepts.iter().all(|c| contains_ci(&o.concepts, c))
        && files
            .iter()
            .all(|f| contains_ci(&o.files_read, f) || contains_ci(&o.files_modified, f))
}

/// Verify an observation belongs to the requested project. Results never
/// cross project boundaries regardless of which signal produced them.
fn in_project(db: &Database, o: &Observation, project_path: &str) -> bool {
    match db.get_session(&o.session_id) {
        Ok(Some(session)) => session.project_path == project_path,
        Ok(None) => false,
        Err(err) => {
            warn!(error = %err, "session lookup failed during isolation check");
            false
        }
    }
}

/// Strategy dispatcher. The default strategy is hybrid; semantic degrades
/// to filter-only when no embedder is wired.
pub async fn search(
    db: &Database,
    req: &SearchRequest,
    embedder: Option<&dyn Embedder>,
    reranker: Option<&dyn Reranker>,
    options: &SearchOptions,
) -> Result<Vec<SearchResult>> {
    match req.strategy {
        SearchStrategy::FilterOnly => filter_only(db, req),
        SearchStrategy::Semantic => match embedder {
            Some(embedder) => semantic(db, req, embedder).await,
            None => filter_only(db, req),
        },
        SearchStrategy::Hybrid => hybrid(db, req, embedder, reranker, options).await,
    }
}

/// Gather by concept terms, else file terms, else general FTS; then apply
/// the remaining filters as a conjunction. Terms that drove the gather are
/// consumed by it and not re-applied.
fn filter_only(db: &Database, req: &SearchRequest) -> Result<Vec<SearchResult>> {
    let filter = filter_from_request(req);
    let concept_terms = req.concept_terms();
    let file_terms = req.file_terms();
    let fetch = req.limit + req.offset + GATHER_SLACK;

    let (gathered, signal): (Vec<Observation>, SearchSignal) = if !concept_terms.is_empty() {
        let mut seen = Vec::new();
        for term in &concept_terms {
            for o in db.search_by_concept(term, fetch, Some(&req.project_path))? {
                if !seen.iter().any(|s: &Observation| s.id == o.id) {
                    seen.push(o);
                }
            }
        }
        (seen, SearchSignal::ConceptFilter)
    } else if !file_terms.is_empty() {
        let mut seen = Vec::new();
        for term in &file_terms {
            for o in db.search_by_file(term, fetch, Some(&req.project_path))? {
                if !seen.iter().any(|s: &Observation| s.id == o.id) {
                    seen.push(o);
                }
            }
        }
        (seen, SearchSignal::FileFilter)
    } else {
        let hits = db.search_observations(
            &req.query,
            Some(&req.project_path),
            &filter,
            &[],
            &[],
            fetch,
            0,
        )?;
        (hits.into_iter().map(|h| h.observation).collect(), SearchSignal::Fts)
    };

    // Terms used for gathering are consumed; the opposite family still
    // applies as a conjunction, as do the scalar filters.
    let (residual_concepts, residual_files): (&[String], &[String]) = match signal {
        SearchSignal::ConceptFilter => (&[], &file_terms),
        SearchSignal::FileFilter => (&concept_terms, &[]),
        _ => (&concept_terms, &file_terms),
    };

    let results = gathered
        .into_iter()
        .filter(|o| matches_filter(o, &filter))
        .filter(|o| matches_term_conjunction(o, residual_concepts, residual_files))
        .skip(req.offset)
        .take(req.limit)
        .enumerate()
        .map(|(i, o)| make_result(o, i + 1, vec![signal], None))
        .collect();
    Ok(results)
}

async fn semantic(
    db: &Database,
    req: &SearchRequest,
    embedder: &dyn Embedder,
) -> Result<Vec<SearchResult>> {
    let query_vector = match embedder.embed(&req.query).await {
        Ok(v) => v,
        Err(err) => {
            debug!(error = %err, "query embedding failed, degrading to filter-only");
            return filter_only(db, req);
        }
    };

    let filter = filter_from_request(req);
    let fetch = req.limit + req.offset + GATHER_SLACK;
    let scored = db.vec_search(&query_vector, fetch, Some(&req.project_path));

    let mut results = Vec::new();
    for (id, distance) in scored {
        let Some(observation) = db.get_observation(&id)? else {
            continue;
        };
        if !matches_filter(&observation, &filter)
            || !matches_term_conjunction(&observation, &req.concept_terms(), &req.file_terms())
        {
            continue;
        }
        results.push((observation, distance));
    }

    Ok(results
        .into_iter()
        .skip(req.offset)
        .take(req.limit)
        .enumerate()
        .map(|(i, (o, distance))| make_result(o, i + 1, vec![SearchSignal::Vector], Some(distance)))
        .collect())
}

struct Fused {
    observation: Observation,
    score: f64,
    signals: Vec<SignalScore>,
    vector_distance: Option<f32>,
}

/// FTS, vector KNN, and (optionally) graph neighbourhoods run independently
/// under the same filter set, then fuse by Reciprocal Rank Fusion.
async fn hybrid(
    db: &Database,
    req: &SearchRequest,
    embedder: Option<&dyn Embedder>,
    reranker: Option<&dyn Reranker>,
    options: &SearchOptions,
) -> Result<Vec<SearchResult>> {
    let filter = filter_from_request(req);
    let concept_terms = req.concept_terms();
    let file_terms = req.file_terms();
    let fetch = req.limit + req.offset + GATHER_SLACK;

    let mut fused: HashMap<String, Fused> = HashMap::new();
    let mut add_signal =
        |o: Observation, signal: SearchSignal, rank: usize, distance: Option<f32>| {
            let contribution = 1.0 / (RRF_K + rank as f64);
            let entry = fused.entry(o.id.clone()).or_insert_with(|| Fused {
                observation: o,
                score: 0.0,
                signals: Vec::new(),
                vector_distance: None,
            });
            entry.score += contribution;
            entry.signals.push(SignalScore {
                signal,
                score: contribution,
                rank: Some(rank),
            });
            if let Some(d) = distance {
                entry.vector_distance = Some(d);
            }
        };

    // FTS branch
    let fts_hits = db.search_observations(
        &req.query,
        Some(&req.project_path),
        &filter,
        &concept_terms,
        &file_terms,
        fetch,
        0,
    )?;
    for (i, hit) in fts_hits.into_iter().enumerate() {
        add_signal(hit.observation, SearchSignal::Fts, i + 1, None);
    }

    // Vector branch
    if let Some(embedder) = embedder {
        match embedder.embed(&req.query).await {
            Ok(query_vector) => {
                let scored = db.vec_search(&query_vector, fetch, Some(&req.project_path));
                let mut rank = 0;
                for (id, distance) in scored {
                    let Some(observation) = db.get_observation(&id)? else {
                        continue;
                    };
                    if !matches_filter(&observation, &filter)
                        || !matches_term_conjunction(&observation, &concept_terms, &file_terms)
                    {
                        continue;
                    }
                    rank += 1;
                    add_signal(observation, SearchSignal::Vector, rank, Some(distance));
                }
            }
            Err(err) => {
                debug!(error = %err, "query embedding failed, skipping vector signal");
            }
        }
    }

    // Graph branch: neighbourhoods of any concept term contribute a signal
    if options.graph_enabled && !concept_terms.is_empty() {
        let mut rank = 0;
        for term in &concept_terms {
            let hood = db.graph_neighbours(term, 1)?;
            for id in hood.observation_ids {
                let Some(observation) = db.get_observation(&id)? else {
                    continue;
                };
                if !in_project(db, &observation, &req.project_path)
                    || !matches_filter(&observation, &filter)
                {
                    continue;
                }
                rank += 1;
                add_signal(observation, SearchSignal::Graph, rank, None);
            }
        }
    }

    let mut ordered: Vec<Fused> = fused.into_values().collect();
    ordered.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.observation.importance.cmp(&a.observation.importance))
            .then_with(|| b.observation.created_at.cmp(&a.observation.created_at))
            .then_with(|| a.observation.id.cmp(&b.observation.id))
    });

    // Optional rerank of the fused head; failures keep the RRF order
    if let Some(reranker) = reranker
        && options.rerank_max_candidates > 0
    {
        let head_len = ordered.len().min(options.rerank_max_candidates);
        let candidates: Vec<RerankCandidate> = ordered[..head_len]
            .iter()
            .map(|f| RerankCandidate {
                id: f.observation.id.clone(),
                title: f.observation.title.clone(),
                snippet: f.observation.narrative.chars().take(200).collect(),
            })
            .collect();
        match reranker.rerank(&req.query, &candidates).await {
            Ok(order) if order.len() == head_len => {
                let mut head: Vec<Option<Fused>> =
                    ordered.drain(..head_len).map(Some).collect();
                let mut reordered = Vec::with_capacity(head_len);
                for idx in order {
                    if let Some(slot) = head.get_mut(idx)
                        && let Some(f) = slot.take()
                    {
                        reordered.push(f);
                    }
                }
                // Anything the reranker dropped keeps its fused position
                reordered.extend(head.into_iter().flatten());
                reordered.extend(ordered);
                ordered = reordered;
            }
            Ok(_) => {
                debug!("reranker returned a partial ordering, keeping fused order");
            }
            Err(err) => {
                debug!(error = %err, "rerank failed, keeping fused order");
            }
        }
    }

    Ok(ordered
        .into_iter()
        .skip(req.offset)
        .take(req.limit)
        .enumerate()
        .map(|(i, f)| {
            let matched_by: Vec<SearchSignal> = f.signals.iter().map(|s| s.signal).collect();
            let mut result = make_result(f.observation, i + 1, matched_by, f.vector_distance);
            result.explain = SearchExplain { signals: f.signals };
            result
        })
        .collect())
}

fn make_result(
    observation: Observation,
    rank: usize,
    matched_by: Vec<SearchSignal>,
    vector_distance: Option<f32>,
) -> SearchResult {
    let snippet = observation.title.clone();
    let explain = SearchExplain {
        signals: matched_by
            .iter()
            .map(|signal| SignalScore {
                signal: *signal,
                score: 1.0,
                rank: Some(rank),
            })
            .collect(),
    };
    SearchResult {
        observation,
        rank,
        snippet,
        matched_by,
        vector_distance,
        vector_similarity: vector_distance.map(|d| 1.0 - d),
        explain,
    }
}
