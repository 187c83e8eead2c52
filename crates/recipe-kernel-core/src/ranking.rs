use serde::{Deserialize, Serialize};

use crate::config::{OverrunPenalty, RankingConfig};
use crate::corpus::{Corpus, RecipeRecord};
use crate::index::SimilarityIndex;
use crate::preferences::PreferenceState;
use crate::KernelError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub semantic: f64,
    pub preference: f64,
    pub time_bonus: f64,
    pub final_score: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RankedRecipe {
    /// 1-based position in the full sorted candidate list, not within the page.
    pub rank: usize,
    pub corpus_index: usize,
    pub recipe: RecipeRecord,
    pub scores: ScoreBreakdown,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RankedPage {
    pub items: Vec<RankedRecipe>,
    /// Set when nothing fit the tolerance window and longer recipes were kept.
    pub time_relaxed: bool,
    /// Candidates that survived filtering, before pagination.
    pub total_candidates: usize,
    pub offset: usize,
}

impl RankedPage {
    fn empty(offset: usize) -> Self {
        Self { items: Vec::new(), time_relaxed: false, total_candidates: 0, offset }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Retrieval query text: cuisine, course, then every keyword, space separated.
#[must_use]
pub fn build_query(state: &PreferenceState) -> String {
    state
        .cuisine
        .iter()
        .chain(state.course.iter())
        .chain(state.keywords.iter())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

struct Candidate<'a> {
    corpus_index: usize,
    record: &'a RecipeRecord,
    semantic: f64,
}

/// Run one retrieval pass and return the page at `state.offset`.
///
/// The pipeline is broad recall from the similarity index, course/cuisine
/// substring filters, a two-phase cook-time window, then the blended score.
/// The result is fully determined by `corpus`, `state` and `config`.
///
/// # Errors
/// Returns [`KernelError::Query`] when `index` was not built from `corpus`.
pub fn recommend(
    corpus: &Corpus,
    index: &SimilarityIndex,
    state: &PreferenceState,
    config: &RankingConfig,
) -> Result<RankedPage, KernelError> {
    if index.len() != corpus.len() {
        return Err(KernelError::Query(format!(
            "similarity index covers {} documents but corpus has {} records",
            index.len(),
            corpus.len()
        )));
    }

    let query = build_query(state);
    let recall = index.rank(&query, corpus.len().min(config.recall_limit));

    let course = state.course.as_deref().map(str::to_lowercase);
    let cuisine = state.cuisine.as_deref().map(str::to_lowercase);
    let mut candidates = recall
        .into_iter()
        .filter_map(|scored| {
            corpus.get(scored.index).map(|record| Candidate {
                corpus_index: scored.index,
                record,
                semantic: scored.score,
            })
        })
        .filter(|candidate| matches_filter(&candidate.record.course, course.as_deref()))
        .filter(|candidate| matches_filter(&candidate.record.cuisine, cuisine.as_deref()))
        .collect::<Vec<_>>();

    if candidates.is_empty() {
        return Ok(RankedPage::empty(state.offset));
    }

    // A zero cap carries no information and would divide by zero below.
    let cap = state.max_cook_time.filter(|minutes| *minutes > 0);
    let mut time_relaxed = false;
    if let Some(cap) = cap {
        let window = f64::from(cap) * config.time_tolerance;
        let within_window = candidates
            .iter()
            .any(|candidate| f64::from(candidate.record.total_time_minutes) <= window);
        if within_window {
            candidates.retain(|candidate| f64::from(candidate.record.total_time_minutes) <= window);
        } else {
            time_relaxed = true;
        }
    }

    let mut scored = candidates
        .into_iter()
        .map(|candidate| {
            let preference = preference_score(candidate.record, state, cap, config);
            let time_bonus = time_bonus(candidate.record, cap, config.overrun_penalty);
            let scores = ScoreBreakdown {
                semantic: candidate.semantic,
                preference,
                time_bonus,
                final_score: candidate.semantic + preference + time_bonus,
            };
            (candidate, scores)
        })
        .collect::<Vec<_>>();

    // `sort_by` is stable: equal scores keep recall order.
    scored.sort_by(|(_, lhs), (_, rhs)| rhs.final_score.total_cmp(&lhs.final_score));

    let total_candidates = scored.len();
    let items = scored
        .into_iter()
        .enumerate()
        .skip(state.offset)
        .take(config.page_size)
        .map(|(position, (candidate, scores))| RankedRecipe {
            rank: position + 1,
            corpus_index: candidate.corpus_index,
            recipe: candidate.record.clone(),
            scores,
        })
        .collect();

    Ok(RankedPage { items, time_relaxed, total_candidates, offset: state.offset })
}

/// Substring containment; an unset preference admits everything.
fn matches_filter(field: &str, wanted: Option<&str>) -> bool {
    match wanted {
        Some(wanted) => field.contains(wanted),
        None => true,
    }
}

fn preference_score(
    record: &RecipeRecord,
    state: &PreferenceState,
    cap: Option<u32>,
    config: &RankingConfig,
) -> f64 {
    let mut score = 0.0;

    for keyword in &state.keywords {
        if record.has_keyword_tag(keyword) {
            score += config.keyword_tag_weight;
        }
        if record.summary.contains(keyword.as_str()) {
            score += config.summary_keyword_weight;
        }
    }

    for ingredient in &state.selected_ingredients {
        if record.ingredient_set.contains(ingredient) {
            score += config.ingredient_weight;
        }
    }

    if let Some(cap) = cap {
        let cap = f64::from(cap);
        score += ((cap - f64::from(record.total_time_minutes)) / cap).max(0.0);
    }

    score
}

fn time_bonus(record: &RecipeRecord, cap: Option<u32>, penalty: OverrunPenalty) -> f64 {
    let Some(cap) = cap else {
        return 0.0;
    };
    let overrun = f64::from(record.total_time_minutes.saturating_sub(cap));
    match penalty {
        OverrunPenalty::Relative => -overrun / f64::from(cap),
        OverrunPenalty::PerMinute { rate } => -overrun * rate,
    }
}
