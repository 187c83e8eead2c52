use serde::{Deserialize, Serialize};

use crate::preferences::{PreferenceField, PreferenceState};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", content = "field", rename_all = "snake_case")]
pub enum DialogueAction {
    Ask(PreferenceField),
    Recommend,
}

impl DialogueAction {
    /// Prompt shown to the user for an `Ask` decision.
    #[must_use]
    pub fn question(self) -> Option<&'static str> {
        match self {
            Self::Ask(PreferenceField::Course) => {
                Some("Is this for breakfast, lunch, dinner, or a snack?")
            }
            Self::Ask(PreferenceField::MaxCookTime) => {
                Some("How much time do you want to spend cooking?")
            }
            Self::Ask(field) => match field {
                PreferenceField::Cuisine => Some(CUISINE_QUESTION),
                PreferenceField::Keywords => Some(KEYWORD_QUESTION),
                _ => Some(GENERIC_QUESTION),
            },
            Self::Recommend => None,
        }
    }
}

/// Decide whether to ask for a missing slot or proceed to recommendation.
///
/// Priority: course, then cook time. Skipped fields are never asked.
#[must_use]
pub fn next_action(state: &PreferenceState) -> DialogueAction {
    if state.course.is_none() && !state.is_skipped(PreferenceField::Course) {
        return DialogueAction::Ask(PreferenceField::Course);
    }

    if state.max_cook_time.is_none() && !state.is_skipped(PreferenceField::MaxCookTime) {
        return DialogueAction::Ask(PreferenceField::MaxCookTime);
    }

    DialogueAction::Recommend
}

/// Signals required before retrieval is worth running.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Cuisine,
    Course,
    Keyword,
}

/// Second gate behind [`next_action`]: cuisine, course and at least one keyword,
/// reported in that priority order unless skipped.
#[must_use]
pub fn missing_signals(state: &PreferenceState) -> Vec<Signal> {
    let mut missing = Vec::new();

    if state.cuisine.is_none() && !state.is_skipped(PreferenceField::Cuisine) {
        missing.push(Signal::Cuisine);
    }

    if state.course.is_none() && !state.is_skipped(PreferenceField::Course) {
        missing.push(Signal::Course);
    }

    if state.keywords.is_empty() && !state.is_skipped(PreferenceField::Keywords) {
        missing.push(Signal::Keyword);
    }

    missing
}

const CUISINE_QUESTION: &str =
    "Which cuisine are you in the mood for? (e.g., Pakistani, Italian, Chinese)";
const COURSE_FOLLOW_UP: &str = "What kind of dish do you want? Main course, appetizer, or dessert?";
const KEYWORD_QUESTION: &str = "Any specific ingredient or craving you have in mind?";
const GENERIC_QUESTION: &str = "Tell me a bit more about what you'd like to cook.";

#[must_use]
pub fn follow_up_question(missing: &[Signal]) -> &'static str {
    if missing.contains(&Signal::Cuisine) {
        return CUISINE_QUESTION;
    }
    if missing.contains(&Signal::Course) {
        return COURSE_FOLLOW_UP;
    }
    if missing.contains(&Signal::Keyword) {
        return KEYWORD_QUESTION;
    }
    GENERIC_QUESTION
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RelaxStep {
    ClearedCourse,
    ClearedCuisine,
    ClearedKeywords,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaxOutcome {
    pub state: PreferenceState,
    /// `None` when there was nothing left to loosen; `state` then equals the input.
    pub step: Option<RelaxStep>,
}

/// Loosen exactly one constraint: course, else cuisine, else keywords.
///
/// A successful step also rewinds pagination to the first page.
#[must_use]
pub fn relax_preferences(state: &PreferenceState) -> RelaxOutcome {
    let mut relaxed = state.clone();
    let step = if relaxed.course.is_some() {
        relaxed.course = None;
        Some(RelaxStep::ClearedCourse)
    } else if relaxed.cuisine.is_some() {
        relaxed.cuisine = None;
        Some(RelaxStep::ClearedCuisine)
    } else if !relaxed.keywords.is_empty() {
        relaxed.keywords.clear();
        Some(RelaxStep::ClearedKeywords)
    } else {
        None
    };

    if step.is_some() {
        relaxed.offset = 0;
    }

    RelaxOutcome { state: relaxed, step }
}
