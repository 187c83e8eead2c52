use serde::{Deserialize, Serialize};

use crate::corpus::RecipeRecord;
use crate::preferences::PreferenceState;

const REASON_SEPARATOR: &str = " • ";
const FALLBACK_REASON: &str = "is a strong overall match to your preferences";

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Explanation {
    pub reasons: Vec<String>,
    pub text: String,
}

/// Describe why `record` fits `state`.
///
/// Reasons are evaluated independently, in order: cuisine, course, matched keywords,
/// time limit. When none applies a generic reason is used, so `reasons` is never empty.
#[must_use]
pub fn explain_recommendation(record: &RecipeRecord, state: &PreferenceState) -> Explanation {
    let mut reasons = Vec::new();

    if let Some(cuisine) = state.cuisine.as_deref() {
        if record.cuisine.contains(&cuisine.to_lowercase()) {
            reasons.push(format!("matches your interest in {cuisine} cuisine"));
        }
    }

    if let Some(course) = state.course.as_deref() {
        if record.course.contains(&course.to_lowercase()) {
            reasons.push(format!("fits your selected course ({course})"));
        }
    }

    let ingredients = record.ingredients_text();
    let matched = state
        .keywords
        .iter()
        .filter(|keyword| {
            let keyword = keyword.to_lowercase();
            record.summary.contains(&keyword) || ingredients.contains(&keyword)
        })
        .map(String::as_str)
        .collect::<Vec<_>>();
    if !matched.is_empty() {
        reasons.push(format!("includes {}", matched.join(", ")));
    }

    if let Some(cap) = state.max_cook_time.filter(|minutes| *minutes > 0) {
        if record.total_time_minutes <= cap {
            reasons.push("respects your time limit".to_string());
        }
    }

    if reasons.is_empty() {
        reasons.push(FALLBACK_REASON.to_string());
    }

    let text = reasons.join(REASON_SEPARATOR);
    Explanation { reasons, text }
}
