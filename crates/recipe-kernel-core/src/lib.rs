mod config;
mod conversation;
mod corpus;
mod explain;
mod index;
mod policy;
mod preferences;
mod ranking;
mod stopwords;

pub use config::{OverrunPenalty, RankingConfig};
pub use conversation::{
    ExplainedRecipe, NoMatchReason, RecipeEngine, Session, TurnOutcome, TurnReply,
};
pub use corpus::{Corpus, CorpusReport, CorpusStats, Nutrition, RecipeId, RecipeInput, RecipeRecord};
pub use explain::{explain_recommendation, Explanation};
pub use index::{ScoredDocument, SimilarityIndex};
pub use policy::{
    follow_up_question, missing_signals, next_action, relax_preferences, DialogueAction,
    RelaxOutcome, RelaxStep, Signal,
};
pub use preferences::{
    merge_preferences, normalize_course, PreferenceDelta, PreferenceField, PreferenceState,
};
pub use ranking::{build_query, recommend, RankedPage, RankedRecipe, ScoreBreakdown};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum KernelError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("corpus error: {0}")]
    Corpus(String),
    #[error("query error: {0}")]
    Query(String),
}
