use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::KernelError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceField {
    Course,
    Cuisine,
    Keywords,
    MaxCookTime,
    SelectedIngredients,
    ExcludedIngredients,
    Diet,
    NutritionFilters,
}

impl PreferenceField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Cuisine => "cuisine",
            Self::Keywords => "keywords",
            Self::MaxCookTime => "max_cook_time",
            Self::SelectedIngredients => "selected_ingredients",
            Self::ExcludedIngredients => "excluded_ingredients",
            Self::Diet => "diet",
            Self::NutritionFilters => "nutrition_filters",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "course" => Some(Self::Course),
            "cuisine" => Some(Self::Cuisine),
            "keywords" | "keyword" => Some(Self::Keywords),
            "max_cook_time" => Some(Self::MaxCookTime),
            "selected_ingredients" => Some(Self::SelectedIngredients),
            "excluded_ingredients" => Some(Self::ExcludedIngredients),
            "diet" => Some(Self::Diet),
            "nutrition_filters" => Some(Self::NutritionFilters),
            _ => None,
        }
    }
}

/// Map a free-form course phrase onto the canonical course vocabulary.
///
/// Rules are ordered substring checks; the first match wins. Lunch maps to dinner
/// because the corpus only models dinner-style recipes. Unrecognized phrases pass
/// through lowercased and trimmed.
#[must_use]
pub fn normalize_course(raw: &str) -> Option<String> {
    const RULES: [(&str, &str); 9] = [
        ("dinner", "dinner"),
        ("lunch", "dinner"),
        ("breakfast", "breakfast"),
        ("snack", "snack"),
        ("dessert", "dessert"),
        ("main", "main course"),
        ("appetizer", "appetizer"),
        ("soup", "soup"),
        ("side", "side dish"),
    ];

    let course = raw.trim().to_lowercase();
    if course.is_empty() {
        return None;
    }

    let canonical = RULES
        .iter()
        .find(|(needle, _)| course.contains(needle))
        .map_or(course.clone(), |(_, canonical)| (*canonical).to_string());
    Some(canonical)
}

/// Accumulated per-session preferences. Mutated only through [`PreferenceState::merge`],
/// relaxation, and [`PreferenceState::reset`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PreferenceState {
    pub course: Option<String>,
    pub cuisine: Option<String>,
    pub keywords: BTreeSet<String>,
    pub max_cook_time: Option<u32>,
    pub nutrition_filters: BTreeMap<String, Value>,
    pub selected_ingredients: BTreeSet<String>,
    pub excluded_ingredients: BTreeSet<String>,
    pub diet: Option<String>,
    pub offset: usize,
    pub skipped_fields: BTreeSet<PreferenceField>,
}

/// New signals from one extractor pass. Every field empty means "nothing new".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PreferenceDelta {
    pub course: Option<String>,
    pub cuisine: Option<String>,
    pub keywords: BTreeSet<String>,
    pub max_cook_time: Option<u32>,
    pub nutrition_filters: BTreeMap<String, Value>,
    pub selected_ingredients: BTreeSet<String>,
    pub excluded_ingredients: BTreeSet<String>,
    pub diet: Option<String>,
    pub offset: usize,
    pub skipped_fields: BTreeSet<PreferenceField>,
}

impl PreferenceDelta {
    /// Map an untyped extractor payload onto the preference schema.
    ///
    /// Unknown keys are ignored and invalid values become empty; this never fails.
    /// Strings are lowercased and trimmed, the course is canonicalized, and
    /// `max_cook_time` survives only as a positive whole number of minutes.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let Value::Object(object) = value else {
            return Self::default();
        };

        Self {
            course: object.get("course").and_then(Value::as_str).and_then(normalize_course),
            cuisine: object.get("cuisine").and_then(clean_string),
            keywords: object.get("keywords").map(clean_string_set).unwrap_or_default(),
            max_cook_time: object.get("max_cook_time").and_then(positive_minutes),
            nutrition_filters: object
                .get("nutrition_filters")
                .and_then(Value::as_object)
                .map(|filters| {
                    filters.iter().map(|(key, value)| (key.trim().to_lowercase(), value.clone())).collect()
                })
                .unwrap_or_default(),
            selected_ingredients: object
                .get("selected_ingredients")
                .map(clean_string_set)
                .unwrap_or_default(),
            excluded_ingredients: object
                .get("excluded_ingredients")
                .map(clean_string_set)
                .unwrap_or_default(),
            diet: object.get("diet").and_then(clean_string),
            offset: object
                .get("offset")
                .and_then(Value::as_u64)
                .and_then(|offset| usize::try_from(offset).ok())
                .unwrap_or(0),
            skipped_fields: object
                .get("skipped_fields")
                .map(clean_string_set)
                .unwrap_or_default()
                .iter()
                .filter_map(|name| PreferenceField::parse(name))
                .collect(),
        }
    }

    /// Parse raw extractor output.
    ///
    /// # Errors
    /// Returns [`KernelError::Validation`] when `raw` is not JSON at all; callers that
    /// want fail-soft behavior treat that as an empty delta.
    pub fn from_json_str(raw: &str) -> Result<Self, KernelError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|err| KernelError::Validation(format!("extractor output is not JSON: {err}")))?;
        Ok(Self::from_value(&value))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn clean_string(value: &Value) -> Option<String> {
    value.as_str().map(|raw| raw.trim().to_lowercase()).filter(|cleaned| !cleaned.is_empty())
}

fn clean_string_set(value: &Value) -> BTreeSet<String> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(clean_string).collect())
        .unwrap_or_default()
}

fn positive_minutes(value: &Value) -> Option<u32> {
    if let Some(minutes) = value.as_u64() {
        return u32::try_from(minutes).ok().filter(|minutes| *minutes > 0);
    }

    let minutes = value.as_f64()?;
    if !(minutes.is_finite() && minutes >= 1.0 && minutes.fract() == 0.0) {
        return None;
    }
    if minutes > f64::from(u32::MAX) {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = minutes as u32;
    Some(whole)
}

impl PreferenceState {
    /// Fold one delta into the state.
    ///
    /// Set fields take the union, `offset` adds the delta, and scalar fields are
    /// overwritten. Empty fields in `delta` leave the state untouched, so merge never
    /// removes information.
    pub fn merge(&mut self, delta: &PreferenceDelta) {
        if delta.course.is_some() {
            self.course.clone_from(&delta.course);
        }
        if delta.cuisine.is_some() {
            self.cuisine.clone_from(&delta.cuisine);
        }
        if delta.max_cook_time.is_some() {
            self.max_cook_time = delta.max_cook_time;
        }
        if delta.diet.is_some() {
            self.diet.clone_from(&delta.diet);
        }
        if !delta.nutrition_filters.is_empty() {
            self.nutrition_filters.clone_from(&delta.nutrition_filters);
        }

        self.keywords.extend(delta.keywords.iter().cloned());
        self.selected_ingredients.extend(delta.selected_ingredients.iter().cloned());
        self.excluded_ingredients.extend(delta.excluded_ingredients.iter().cloned());
        self.skipped_fields.extend(delta.skipped_fields.iter().copied());
        self.offset = self.offset.saturating_add(delta.offset);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[must_use]
    pub fn is_skipped(&self, field: PreferenceField) -> bool {
        self.skipped_fields.contains(&field)
    }

    /// Bullet lines describing the current state, for display next to a conversation.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(course) = &self.course {
            lines.push(format!("• Course: {}", title_case(course)));
        }
        if let Some(cuisine) = &self.cuisine {
            lines.push(format!("• Cuisine: {}", title_case(cuisine)));
        }
        if !self.keywords.is_empty() {
            lines.push(format!("• Keywords: {}", join(&self.keywords)));
        }
        if let Some(minutes) = self.max_cook_time {
            lines.push(format!("• Max Cook Time: {minutes} minutes"));
        }
        if !self.selected_ingredients.is_empty() {
            lines.push(format!("• Include: {}", join(&self.selected_ingredients)));
        }
        if !self.excluded_ingredients.is_empty() {
            lines.push(format!("• Exclude: {}", join(&self.excluded_ingredients)));
        }
        if let Some(diet) = &self.diet {
            lines.push(format!("• Diet: {}", title_case(diet)));
        }
        lines
    }
}

/// Functional form of [`PreferenceState::merge`].
#[must_use]
pub fn merge_preferences(old: &PreferenceState, new: &PreferenceDelta) -> PreferenceState {
    let mut merged = old.clone();
    merged.merge(new);
    merged
}

fn join(values: &BTreeSet<String>) -> String {
    values.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn title_case(value: &str) -> String {
    value
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| first.to_uppercase().chain(chars).collect())
        })
        .collect::<Vec<_>>()
        .join(" ")
}
