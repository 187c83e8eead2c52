use serde::{Deserialize, Serialize};

use crate::KernelError;

/// How recipes that run past the time cap are penalized in the final score.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OverrunPenalty {
    /// `-(time - cap) / cap`: overage measured as a fraction of the cap.
    #[default]
    Relative,
    /// `-(time - cap) * rate`: a flat penalty per minute over the cap.
    PerMinute { rate: f64 },
}

impl OverrunPenalty {
    pub const DEFAULT_PER_MINUTE_RATE: f64 = 0.05;
}

/// Tunable ranking constants. Defaults reproduce the production formula.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RankingConfig {
    /// Bonus per user keyword found in a recipe's keyword tags.
    pub keyword_tag_weight: f64,
    /// Bonus per user keyword found in a recipe's summary.
    pub summary_keyword_weight: f64,
    /// Bonus per selected ingredient present in a recipe.
    pub ingredient_weight: f64,
    /// Multiplier on `max_cook_time` for the strict time window.
    pub time_tolerance: f64,
    /// Upper bound on candidates pulled from the similarity index.
    pub recall_limit: usize,
    /// Recipes per page.
    pub page_size: usize,
    pub overrun_penalty: OverrunPenalty,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            keyword_tag_weight: 2.0,
            summary_keyword_weight: 1.0,
            ingredient_weight: 1.5,
            time_tolerance: 1.2,
            recall_limit: 100,
            page_size: 5,
            overrun_penalty: OverrunPenalty::Relative,
        }
    }
}

impl RankingConfig {
    /// Check that every constant is usable by the ranking formula.
    ///
    /// # Errors
    /// Returns [`KernelError::Validation`] for negative or non-finite weights, a time
    /// tolerance below 1.0, or a zero recall limit or page size.
    pub fn validate(&self) -> Result<(), KernelError> {
        for (name, weight) in [
            ("keyword_tag_weight", self.keyword_tag_weight),
            ("summary_keyword_weight", self.summary_keyword_weight),
            ("ingredient_weight", self.ingredient_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(KernelError::Validation(format!(
                    "{name} MUST be a finite, non-negative number"
                )));
            }
        }

        if !self.time_tolerance.is_finite() || self.time_tolerance < 1.0 {
            return Err(KernelError::Validation("time_tolerance MUST be >= 1.0".to_string()));
        }

        if self.recall_limit == 0 {
            return Err(KernelError::Validation("recall_limit MUST be >= 1".to_string()));
        }

        if self.page_size == 0 {
            return Err(KernelError::Validation("page_size MUST be >= 1".to_string()));
        }

        if let OverrunPenalty::PerMinute { rate } = self.overrun_penalty {
            if !rate.is_finite() || rate < 0.0 {
                return Err(KernelError::Validation(
                    "overrun_penalty.rate MUST be a finite, non-negative number".to_string(),
                ));
            }
        }

        Ok(())
    }
}
