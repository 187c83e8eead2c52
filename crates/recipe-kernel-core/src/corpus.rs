use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::KernelError;

/// Stable recipe identity derived from `(name, cuisine, course)`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RecipeId(pub String);

impl RecipeId {
    #[must_use]
    pub fn fingerprint(name: &str, cuisine: &str, course: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{name}_{cuisine}_{course}").as_bytes());
        let digest_hex = format!("{:x}", hasher.finalize());
        Self(digest_hex[..32].to_string())
    }
}

impl Display for RecipeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Nutrition {
    #[serde(default)]
    pub calories_kcal: f64,
    #[serde(default)]
    pub protein_g: f64,
    #[serde(default)]
    pub carbs_g: f64,
    #[serde(default)]
    pub fat_g: f64,
}

impl Nutrition {
    /// Negative or non-finite macros collapse to zero.
    #[must_use]
    pub fn sanitized(self) -> Self {
        fn clamp(value: f64) -> f64 {
            if value.is_finite() && value > 0.0 {
                value
            } else {
                0.0
            }
        }

        Self {
            calories_kcal: clamp(self.calories_kcal),
            protein_g: clamp(self.protein_g),
            carbs_g: clamp(self.carbs_g),
            fat_g: clamp(self.fat_g),
        }
    }
}

/// One row of the corpus input contract, as handed over by the data-loading collaborator.
///
/// Every field except `nutrition` and `image_url` is required; deserializing a payload
/// without them fails, which makes a malformed corpus fatal at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeInput {
    pub name: String,
    pub course: String,
    pub cuisine: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub ingredients: Vec<String>,
    pub total_time_minutes: i64,
    #[serde(default)]
    pub nutrition: Nutrition,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecipeRecord {
    pub id: RecipeId,
    pub name: String,
    pub course: String,
    pub cuisine: String,
    pub summary: String,
    pub keywords: BTreeSet<String>,
    pub ingredients: Vec<String>,
    #[serde(skip)]
    pub ingredient_set: BTreeSet<String>,
    pub total_time_minutes: u32,
    pub nutrition: Nutrition,
    pub image_url: Option<String>,
    #[serde(skip)]
    pub document_text: String,
}

impl RecipeRecord {
    fn from_input(input: RecipeInput, total_time_minutes: u32) -> Self {
        let name = normalize_text(&input.name);
        let course = normalize_text(&input.course);
        let cuisine = normalize_text(&input.cuisine);
        let summary = normalize_text(&input.summary);
        let keywords = input
            .keywords
            .iter()
            .map(|keyword| normalize_text(keyword))
            .filter(|keyword| !keyword.is_empty())
            .collect::<BTreeSet<_>>();
        let ingredients = input
            .ingredients
            .iter()
            .map(|ingredient| normalize_text(ingredient))
            .filter(|ingredient| !ingredient.is_empty())
            .collect::<Vec<_>>();
        let ingredient_set = ingredients.iter().cloned().collect::<BTreeSet<_>>();
        let document_text =
            format!("{name} {summary} {} {cuisine} {course}", ingredients.join(", "));

        Self {
            id: RecipeId::fingerprint(&name, &cuisine, &course),
            name,
            course,
            cuisine,
            summary,
            keywords,
            ingredients,
            ingredient_set,
            total_time_minutes,
            nutrition: input.nutrition.sanitized(),
            image_url: input.image_url.map(|url| url.trim().to_string()).filter(|url| !url.is_empty()),
            document_text,
        }
    }

    /// True when `keyword` occurs inside any of the recipe's own keyword tags.
    #[must_use]
    pub fn has_keyword_tag(&self, keyword: &str) -> bool {
        self.keywords.iter().any(|tag| tag.contains(keyword))
    }

    #[must_use]
    pub fn ingredients_text(&self) -> String {
        self.ingredients.join(", ")
    }
}

fn normalize_text(value: &str) -> String {
    value.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct CorpusReport {
    pub input_rows: usize,
    pub accepted: usize,
    pub dropped_non_positive_time: usize,
    /// Rows whose cook time does not fit in `u32` minutes.
    #[serde(default)]
    pub dropped_oversized_time: usize,
    pub dropped_missing_identity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusStats {
    pub records: usize,
    pub courses: BTreeMap<String, usize>,
    pub cuisines: BTreeMap<String, usize>,
    pub min_time_minutes: u32,
    pub max_time_minutes: u32,
    pub median_time_minutes: u32,
    pub report: CorpusReport,
}

/// Immutable, validated recipe collection. Built once and shared read-only.
#[derive(Debug, Clone)]
pub struct Corpus {
    records: Vec<RecipeRecord>,
    report: CorpusReport,
}

impl Corpus {
    /// Normalize and admit recipe rows into an immutable corpus.
    ///
    /// Rows with a blank name or course, or with a cook time that is not positive or does
    /// not fit in `u32` minutes, are dropped and counted in the [`CorpusReport`].
    ///
    /// # Errors
    /// Returns [`KernelError::Corpus`] when no row survives admission.
    pub fn build(inputs: Vec<RecipeInput>) -> Result<Self, KernelError> {
        let mut report = CorpusReport { input_rows: inputs.len(), ..CorpusReport::default() };
        let mut records = Vec::with_capacity(inputs.len());

        for input in inputs {
            if input.name.trim().is_empty() || input.course.trim().is_empty() {
                report.dropped_missing_identity += 1;
                continue;
            }

            if input.total_time_minutes <= 0 {
                report.dropped_non_positive_time += 1;
                continue;
            }
            let Ok(total_time_minutes) = u32::try_from(input.total_time_minutes) else {
                report.dropped_oversized_time += 1;
                continue;
            };

            records.push(RecipeRecord::from_input(input, total_time_minutes));
        }

        report.accepted = records.len();
        if records.is_empty() {
            return Err(KernelError::Corpus(format!(
                "corpus MUST contain at least one recipe with total_time_minutes > 0 \
                 ({} rows read, {} without cook time, {} with oversized cook time, \
                 {} without name/course)",
                report.input_rows,
                report.dropped_non_positive_time,
                report.dropped_oversized_time,
                report.dropped_missing_identity
            )));
        }

        Ok(Self { records, report })
    }

    #[must_use]
    pub fn records(&self) -> &[RecipeRecord] {
        &self.records
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&RecipeRecord> {
        self.records.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn report(&self) -> CorpusReport {
        self.report
    }

    pub fn documents(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|record| record.document_text.as_str())
    }

    #[must_use]
    pub fn stats(&self) -> CorpusStats {
        let mut courses = BTreeMap::new();
        let mut cuisines = BTreeMap::new();
        for record in &self.records {
            for tag in split_tags(&record.course) {
                *courses.entry(tag).or_insert(0) += 1;
            }
            for tag in split_tags(&record.cuisine) {
                *cuisines.entry(tag).or_insert(0) += 1;
            }
        }

        let mut times = self.records.iter().map(|record| record.total_time_minutes).collect::<Vec<_>>();
        times.sort_unstable();

        CorpusStats {
            records: self.records.len(),
            courses,
            cuisines,
            min_time_minutes: times.first().copied().unwrap_or(0),
            max_time_minutes: times.last().copied().unwrap_or(0),
            median_time_minutes: times.get(times.len() / 2).copied().unwrap_or(0),
            report: self.report,
        }
    }
}

fn split_tags(value: &str) -> impl Iterator<Item = String> + '_ {
    value.split(',').map(str::trim).filter(|tag| !tag.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_input(name: &str, total_time_minutes: i64) -> RecipeInput {
        RecipeInput {
            name: name.to_string(),
            course: "Dinner Recipes, Main Course".to_string(),
            cuisine: " Italian ".to_string(),
            summary: "A Weeknight Classic".to_string(),
            keywords: vec!["Pasta".to_string(), " ".to_string()],
            ingredients: vec!["Garlic".to_string(), "Olive Oil".to_string()],
            total_time_minutes,
            nutrition: Nutrition { calories_kcal: -5.0, protein_g: 12.0, carbs_g: f64::NAN, fat_g: 3.5 },
            image_url: None,
        }
    }

    // Test IDs: TCRP-001
    #[test]
    fn build_normalizes_text_and_derives_document() {
        let corpus = Corpus::build(vec![mk_input("Spaghetti Aglio", 25)])
            .unwrap_or_else(|err| panic!("corpus should build: {err}"));
        let record = &corpus.records()[0];

        assert_eq!(record.name, "spaghetti aglio");
        assert_eq!(record.cuisine, "italian");
        assert_eq!(record.keywords.iter().cloned().collect::<Vec<_>>(), vec!["pasta".to_string()]);
        assert!(record.ingredient_set.contains("olive oil"));
        assert_eq!(
            record.document_text,
            "spaghetti aglio a weeknight classic garlic, olive oil italian dinner recipes, main course"
        );
        assert!(record.nutrition.calories_kcal.abs() < f64::EPSILON);
        assert!(record.nutrition.carbs_g.abs() < f64::EPSILON);
        assert!((record.nutrition.fat_g - 3.5).abs() < f64::EPSILON);
    }

    // Test IDs: TCRP-002
    #[test]
    fn build_drops_rows_without_positive_cook_time() {
        let corpus = Corpus::build(vec![
            mk_input("keep", 10),
            mk_input("zero", 0),
            mk_input("negative", -4),
            mk_input("  ", 15),
            mk_input("forever", i64::from(u32::MAX) + 1),
        ])
        .unwrap_or_else(|err| panic!("corpus should build: {err}"));

        assert_eq!(corpus.len(), 1);
        assert!(corpus.records().iter().all(|record| record.total_time_minutes > 0));
        let report = corpus.report();
        assert_eq!(report.input_rows, 5);
        assert_eq!(report.dropped_non_positive_time, 2);
        assert_eq!(report.dropped_oversized_time, 1);
        assert_eq!(report.dropped_missing_identity, 1);
    }

    // Test IDs: TCRP-003
    #[test]
    fn build_rejects_corpus_without_valid_rows() {
        let err = match Corpus::build(vec![mk_input("zero", 0)]) {
            Ok(_) => panic!("expected empty corpus to be rejected"),
            Err(err) => err,
        };
        assert!(matches!(err, KernelError::Corpus(_)));

        assert!(Corpus::build(Vec::new()).is_err());
    }

    // Test IDs: TCRP-004
    #[test]
    fn fingerprint_is_stable_and_identity_sensitive() {
        let a = RecipeId::fingerprint("lasagna", "italian", "dinner");
        let b = RecipeId::fingerprint("lasagna", "italian", "dinner");
        let c = RecipeId::fingerprint("lasagna", "italian", "lunch");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.0.len(), 32);
    }

    // Test IDs: TCRP-005
    #[test]
    fn input_missing_required_field_fails_to_deserialize() {
        let payload = serde_json::json!({
            "name": "toast",
            "course": "breakfast",
            "cuisine": "british",
            "keywords": [],
            "ingredients": ["bread"],
            "total_time_minutes": 5
        });
        assert!(serde_json::from_value::<RecipeInput>(payload).is_err());
    }

    // Test IDs: TCRP-006
    #[test]
    fn stats_split_course_tags_and_report_times() {
        let corpus = Corpus::build(vec![mk_input("a", 10), mk_input("b", 30), mk_input("c", 20)])
            .unwrap_or_else(|err| panic!("corpus should build: {err}"));
        let stats = corpus.stats();

        assert_eq!(stats.records, 3);
        assert_eq!(stats.courses.get("main course"), Some(&3));
        assert_eq!(stats.courses.get("dinner recipes"), Some(&3));
        assert_eq!(stats.min_time_minutes, 10);
        assert_eq!(stats.max_time_minutes, 30);
        assert_eq!(stats.median_time_minutes, 20);
    }
}
