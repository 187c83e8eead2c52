use std::io::Read;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use recipe_kernel_core::{Nutrition, RecipeInput};
use regex_lite::Regex;
use serde::Deserialize;

/// Columns every raw dataset must carry. `Times` is capitalized in the source files.
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "name",
    "imgurl",
    "course",
    "cuisine",
    "keyword",
    "summary",
    "ingredients",
    "nutritions",
    "Times",
];

static TIME_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(\d+)\s*(hours?|hrs?|minutes?|mins?)").ok());
static PAIR_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r#"(?:'([^']*)'|"([^"]*)")\s*:\s*(?:'([^']*)'|"([^"]*)")"#).ok()
});
static ITEM_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r#"'([^']*)'|"([^"]*)""#).ok());
static NUMBER_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)").ok());

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to open dataset {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to read dataset: {0}")]
    Csv(#[from] csv::Error),
    #[error("dataset missing columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
}

/// Raw rows mapped onto the corpus input contract, ready for `Corpus::build`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDataset {
    pub recipes: Vec<RecipeInput>,
    pub rows_read: usize,
}

#[derive(Debug, Deserialize)]
struct RawRecipeRow {
    name: String,
    imgurl: String,
    course: String,
    cuisine: String,
    keyword: String,
    summary: String,
    ingredients: String,
    nutritions: String,
    #[serde(rename = "Times")]
    times: String,
}

impl RawRecipeRow {
    fn into_input(self) -> RecipeInput {
        let image_url = Some(self.imgurl.trim().to_string()).filter(|url| !url.is_empty());
        RecipeInput {
            name: clean(&self.name),
            course: clean(&self.course),
            cuisine: clean(&self.cuisine),
            summary: clean(&self.summary),
            keywords: parse_tags(&self.keyword),
            ingredients: parse_ingredients_literal(&self.ingredients),
            total_time_minutes: total_time_from_literal(&self.times),
            nutrition: parse_nutrition_literal(&self.nutritions),
            image_url,
        }
    }
}

/// Load a recipe CSV from disk.
///
/// # Errors
/// Returns [`DatasetError::Open`] when the file cannot be opened, and otherwise the
/// errors of [`load_dataset_reader`].
pub fn load_dataset_csv(path: &Path) -> Result<LoadedDataset, DatasetError> {
    let reader = reader_builder()
        .from_path(path)
        .map_err(|source| DatasetError::Open { path: path.to_path_buf(), source })?;
    load_rows(reader)
}

/// Load a recipe CSV from any reader. The first row is the header.
///
/// Every row is returned, including ones the corpus will later drop for a missing
/// cook time; admission is the corpus's decision.
///
/// # Errors
/// Returns [`DatasetError::MissingColumns`] when a required column is absent and
/// [`DatasetError::Csv`] for malformed CSV.
pub fn load_dataset_reader<R: Read>(reader: R) -> Result<LoadedDataset, DatasetError> {
    load_rows(reader_builder().from_reader(reader))
}

fn reader_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.has_headers(true).trim(csv::Trim::Headers);
    builder
}

fn load_rows<R: Read>(mut reader: csv::Reader<R>) -> Result<LoadedDataset, DatasetError> {
    let headers = reader.headers()?.clone();
    let missing = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|header| header == **column))
        .map(|column| (*column).to_string())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Err(DatasetError::MissingColumns(missing));
    }

    let mut recipes = Vec::new();
    for row in reader.deserialize::<RawRecipeRow>() {
        recipes.push(row?.into_input());
    }

    Ok(LoadedDataset { rows_read: recipes.len(), recipes })
}

fn clean(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Minutes in the first `<n> hour(s)|hr(s)|minute(s)|min(s)` phrase of `value`; 0 when
/// there is none.
#[must_use]
pub fn parse_time_to_minutes(value: &str) -> i64 {
    let Some(pattern) = TIME_PATTERN.as_ref() else {
        return 0;
    };
    let lowered = value.to_lowercase();
    let Some(captures) = pattern.captures(&lowered) else {
        return 0;
    };

    let amount = captures.get(1).and_then(|raw| raw.as_str().parse::<i64>().ok()).unwrap_or(0);
    let unit = captures.get(2).map_or("", |unit| unit.as_str());
    if unit.starts_with('h') {
        amount.saturating_mul(60)
    } else {
        amount
    }
}

/// Sum the durations of a `{'Prep Time': '15 mins', 'Cook Time': '1 hour'}` literal.
///
/// A value that is not a mapping is read as a single duration.
#[must_use]
pub fn total_time_from_literal(literal: &str) -> i64 {
    let pairs = mapping_pairs(literal);
    if pairs.is_empty() {
        return parse_time_to_minutes(literal);
    }
    pairs
        .iter()
        .map(|(_, value)| parse_time_to_minutes(value))
        .fold(0_i64, i64::saturating_add)
}

/// Macros from a `{'Calories': '250 kcal', 'Fat': '9 g', ...}` literal.
///
/// Keys containing "calorie", "protein" or "carbohydrate" match loosely; fat must be
/// exactly "fat" so "saturated fat" is ignored. Unparseable values are 0.
#[must_use]
pub fn parse_nutrition_literal(literal: &str) -> Nutrition {
    let mut nutrition = Nutrition::default();
    for (key, value) in mapping_pairs(literal) {
        let key = key.trim().to_lowercase();
        let amount = first_number(&value);
        if key.contains("calorie") {
            nutrition.calories_kcal = amount;
        } else if key.contains("protein") {
            nutrition.protein_g = amount;
        } else if key.contains("carbohydrate") {
            nutrition.carbs_g = amount;
        } else if key == "fat" {
            nutrition.fat_g = amount;
        }
    }
    nutrition
}

/// Ingredients from a `['2 cups rice', 'salt']` literal, lowercased with blanks dropped.
/// Plain comma-separated text is accepted too.
#[must_use]
pub fn parse_ingredients_literal(literal: &str) -> Vec<String> {
    let trimmed = literal.trim();
    if !trimmed.starts_with('[') {
        return parse_tags(trimmed);
    }

    let Some(pattern) = ITEM_PATTERN.as_ref() else {
        return Vec::new();
    };
    pattern
        .captures_iter(trimmed)
        .filter_map(|captures| captures.get(1).or_else(|| captures.get(2)))
        .map(|item| item.as_str().trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Comma-separated tags, lowercased and trimmed; brackets and quotes around a tag are
/// stripped.
#[must_use]
pub fn parse_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|tag| tag.trim().trim_matches(|ch| matches!(ch, '[' | ']' | '\'' | '"')).trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn mapping_pairs(literal: &str) -> Vec<(String, String)> {
    let Some(pattern) = PAIR_PATTERN.as_ref() else {
        return Vec::new();
    };
    pattern
        .captures_iter(literal)
        .filter_map(|captures| {
            let key = captures.get(1).or_else(|| captures.get(2))?;
            let value = captures.get(3).or_else(|| captures.get(4))?;
            Some((key.as_str().to_string(), value.as_str().to_string()))
        })
        .collect()
}

fn first_number(value: &str) -> f64 {
    NUMBER_PATTERN
        .as_ref()
        .and_then(|pattern| pattern.captures(value))
        .and_then(|captures| captures.get(1))
        .and_then(|number| number.as_str().parse::<f64>().ok())
        .unwrap_or(0.0)
}
