use serde::{Deserialize, Serialize};

use crate::config::RankingConfig;
use crate::corpus::{Corpus, RecipeRecord};
use crate::explain::{explain_recommendation, Explanation};
use crate::index::SimilarityIndex;
use crate::policy::{
    follow_up_question, missing_signals, next_action, relax_preferences, DialogueAction, RelaxStep,
    Signal,
};
use crate::preferences::{PreferenceDelta, PreferenceField, PreferenceState};
use crate::ranking::{recommend, RankedPage, ScoreBreakdown};
use crate::KernelError;

const RELAXED_NOTICE: &str = "I relaxed some constraints to find better matches.";
const NOTHING_AFTER_RELAXING: &str = "I couldn’t find any recipes even after relaxing preferences.";
const NOTHING_MATCHES: &str =
    "No recipes match your preferences. Try changing cuisine, time, or ingredients.";

/// Corpus, similarity index and ranking constants, built once and shared read-only by
/// every session.
#[derive(Debug, Clone)]
pub struct RecipeEngine {
    corpus: Corpus,
    index: SimilarityIndex,
    config: RankingConfig,
}

impl RecipeEngine {
    /// # Errors
    /// Returns [`KernelError::Validation`] when `config` fails [`RankingConfig::validate`].
    pub fn new(corpus: Corpus, config: RankingConfig) -> Result<Self, KernelError> {
        config.validate()?;
        let index = SimilarityIndex::from_corpus(&corpus);
        Ok(Self { corpus, index, config })
    }

    #[must_use]
    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    #[must_use]
    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    #[must_use]
    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    /// # Errors
    /// Propagates [`recommend`] errors.
    pub fn recommend(&self, state: &PreferenceState) -> Result<RankedPage, KernelError> {
        recommend(&self.corpus, &self.index, state, &self.config)
    }

    #[must_use]
    pub fn explain_page(&self, page: &RankedPage, state: &PreferenceState) -> Vec<ExplainedRecipe> {
        page.items
            .iter()
            .map(|item| ExplainedRecipe {
                rank: item.rank,
                recipe: item.recipe.clone(),
                scores: item.scores,
                explanation: explain_recommendation(&item.recipe, state),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExplainedRecipe {
    pub rank: usize,
    pub recipe: RecipeRecord,
    pub scores: ScoreBreakdown,
    pub explanation: Explanation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchReason {
    /// Nothing was left to loosen.
    RelaxationExhausted,
    /// This turn already spent its one relaxation.
    RelaxationAlreadyUsed,
    /// One constraint was loosened and the retry still came back empty.
    EmptyAfterRelaxing,
}

impl NoMatchReason {
    #[must_use]
    pub fn prompt(self) -> &'static str {
        match self {
            Self::RelaxationExhausted | Self::EmptyAfterRelaxing => NOTHING_AFTER_RELAXING,
            Self::RelaxationAlreadyUsed => NOTHING_MATCHES,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnReply {
    Question {
        field: PreferenceField,
        prompt: String,
    },
    FollowUp {
        missing: Vec<Signal>,
        prompt: String,
    },
    Recommendations {
        items: Vec<ExplainedRecipe>,
        time_relaxed: bool,
        relaxed: Option<RelaxStep>,
        notices: Vec<String>,
    },
    NoMatch {
        reason: NoMatchReason,
        prompt: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TurnOutcome {
    pub action: DialogueAction,
    pub reply: TurnReply,
    /// Preference state after the turn, including any relaxation applied.
    pub preferences: PreferenceState,
}

/// One user's conversation: the accumulated preferences and the per-turn relaxation flag.
///
/// A session has a single writer. Callers that share sessions across threads wrap
/// them in their own lock.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub preferences: PreferenceState,
    pub relaxed_this_turn: bool,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one user turn: merge the primary extraction, then the refinement delta,
    /// then decide, retrieve and relax at most once.
    ///
    /// # Errors
    /// Propagates retrieval errors from the engine.
    pub fn take_turn(
        &mut self,
        engine: &RecipeEngine,
        primary: &PreferenceDelta,
        refinement: &PreferenceDelta,
    ) -> Result<TurnOutcome, KernelError> {
        self.relaxed_this_turn = false;
        self.preferences.merge(primary);
        self.preferences.merge(refinement);
        self.respond(engine)
    }

    /// Advance to the next page of the current preferences. Counts as a new turn.
    ///
    /// The offset only moves once the preferences are complete enough to rank; before
    /// that the pending question is repeated and paging stays at the first page.
    ///
    /// # Errors
    /// Propagates retrieval errors from the engine.
    pub fn show_more(&mut self, engine: &RecipeEngine) -> Result<TurnOutcome, KernelError> {
        self.relaxed_this_turn = false;
        if self.ready_to_recommend() {
            self.preferences.offset =
                self.preferences.offset.saturating_add(engine.config().page_size);
        }
        self.respond(engine)
    }

    fn ready_to_recommend(&self) -> bool {
        next_action(&self.preferences) == DialogueAction::Recommend
            && missing_signals(&self.preferences).is_empty()
    }

    pub fn reset(&mut self) {
        self.preferences.reset();
        self.relaxed_this_turn = false;
    }

    /// Evaluate the dialogue policy against the current state and produce a reply
    /// without merging anything new.
    ///
    /// # Errors
    /// Propagates retrieval errors from the engine.
    pub fn respond(&mut self, engine: &RecipeEngine) -> Result<TurnOutcome, KernelError> {
        let action = next_action(&self.preferences);
        if let DialogueAction::Ask(field) = action {
            let prompt = action.question().unwrap_or_default().to_string();
            return Ok(self.outcome(action, TurnReply::Question { field, prompt }));
        }

        let missing = missing_signals(&self.preferences);
        if !missing.is_empty() {
            let prompt = follow_up_question(&missing).to_string();
            return Ok(self.outcome(action, TurnReply::FollowUp { missing, prompt }));
        }

        let mut page = engine.recommend(&self.preferences)?;
        let mut relaxed = None;
        if page.is_empty() {
            if self.relaxed_this_turn {
                return Ok(self.no_match(action, NoMatchReason::RelaxationAlreadyUsed));
            }

            let outcome = relax_preferences(&self.preferences);
            let Some(step) = outcome.step else {
                return Ok(self.no_match(action, NoMatchReason::RelaxationExhausted));
            };
            self.preferences = outcome.state;
            self.relaxed_this_turn = true;
            relaxed = Some(step);

            page = engine.recommend(&self.preferences)?;
            if page.is_empty() {
                return Ok(self.no_match(action, NoMatchReason::EmptyAfterRelaxing));
            }
        }

        let mut notices = Vec::new();
        if relaxed.is_some() {
            notices.push(RELAXED_NOTICE.to_string());
        }
        if page.time_relaxed {
            if let Some(cap) = self.preferences.max_cook_time {
                notices.push(format!(
                    "Nothing fits within {cap} minutes, so these recipes take a little longer."
                ));
            }
        }

        let items = engine.explain_page(&page, &self.preferences);
        Ok(self.outcome(
            action,
            TurnReply::Recommendations { items, time_relaxed: page.time_relaxed, relaxed, notices },
        ))
    }

    fn no_match(&self, action: DialogueAction, reason: NoMatchReason) -> TurnOutcome {
        self.outcome(action, TurnReply::NoMatch { reason, prompt: reason.prompt().to_string() })
    }

    fn outcome(&self, action: DialogueAction, reply: TurnReply) -> TurnOutcome {
        TurnOutcome { action, reply, preferences: self.preferences.clone() }
    }
}
