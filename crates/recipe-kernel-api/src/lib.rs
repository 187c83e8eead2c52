use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use parking_lot::{Mutex, RwLock};
use recipe_kernel_core::{
    build_query, merge_preferences, Corpus, CorpusStats, ExplainedRecipe, PreferenceDelta,
    PreferenceState, RankingConfig, RecipeEngine, RecipeInput, RecipeRecord, Session, TurnOutcome,
    TurnReply,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use ulid::Ulid;

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RefinementConfig {
    /// Cook-time cap applied when the user asks for something faster or quick.
    pub quick_cook_minutes: u32,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self { quick_cook_minutes: 30 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub ranking: RankingConfig,
    pub refinement: RefinementConfig,
}

impl KernelConfig {
    /// Load a YAML config file. Missing keys take their defaults.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read, is not valid YAML for this
    /// schema, or holds unusable ranking constants.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error for invalid ranking constants or a zero quick-cook cap.
    pub fn validate(&self) -> Result<()> {
        self.ranking.validate()?;
        if self.refinement.quick_cook_minutes == 0 {
            bail!("refinement.quick_cook_minutes MUST be >= 1");
        }
        Ok(())
    }
}

/// Rule-based refinement signals read straight from the user's text.
///
/// "another"/"next" advance one page, "faster"/"quick" tighten the cook time,
/// "vegetarian" sets the diet, and "exclude ... chicken" excludes chicken.
#[must_use]
pub fn detect_refinement(text: &str, page_size: usize, config: &RefinementConfig) -> PreferenceDelta {
    let text = text.to_lowercase();
    let mut delta = PreferenceDelta::default();

    if text.contains("another") || text.contains("next") {
        delta.offset = page_size;
    }

    if text.contains("faster") || text.contains("quick") {
        delta.max_cook_time = Some(config.quick_cook_minutes);
    }

    if text.contains("vegetarian") {
        delta.diet = Some("vegetarian".to_string());
    }

    if text.contains("exclude") {
        let words = text
            .split_whitespace()
            .map(|word| word.trim_matches(|ch: char| !ch.is_alphanumeric()))
            .collect::<Vec<_>>();
        if words.contains(&"chicken") {
            delta.excluded_ingredients.insert("chicken".to_string());
        }
    }

    delta
}

/// One user turn. Every field is optional; a missing or malformed extraction is
/// treated as no new information.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TurnRequest {
    /// Raw user text, used for rule-based refinement detection.
    pub text: Option<String>,
    /// Structured output of the preference extractor.
    pub extraction: Option<Value>,
    /// Explicit refinement delta. Replaces detection from `text` when present.
    pub refinement: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecommendRequest {
    pub preferences: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecommendResult {
    pub query: String,
    pub preferences: PreferenceState,
    pub time_relaxed: bool,
    pub total_candidates: usize,
    pub offset: usize,
    pub items: Vec<ExplainedRecipe>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchHit {
    pub rank: usize,
    pub score: f64,
    pub recipe: RecipeRecord,
}

/// Facade over the shared recipe engine. Cloning is cheap; all clones share one
/// corpus and index.
#[derive(Debug, Clone)]
pub struct RecipeKernelApi {
    engine: Arc<RecipeEngine>,
    config: KernelConfig,
}

impl RecipeKernelApi {
    /// Build the engine over an already admitted corpus.
    ///
    /// # Errors
    /// Returns an error when `config` is invalid.
    pub fn from_corpus(corpus: Corpus, config: KernelConfig) -> Result<Self> {
        config.validate()?;
        let report = corpus.report();
        tracing::info!(
            accepted = report.accepted,
            input_rows = report.input_rows,
            dropped_non_positive_time = report.dropped_non_positive_time,
            dropped_oversized_time = report.dropped_oversized_time,
            dropped_missing_identity = report.dropped_missing_identity,
            "recipe corpus ready"
        );
        let engine = RecipeEngine::new(corpus, config.ranking.clone())?;
        tracing::debug!(vocabulary = engine.index().vocabulary_size(), "similarity index built");
        Ok(Self { engine: Arc::new(engine), config })
    }

    /// # Errors
    /// Returns an error when no recipe survives admission or `config` is invalid.
    pub fn from_recipes(recipes: Vec<RecipeInput>, config: KernelConfig) -> Result<Self> {
        let corpus = Corpus::build(recipes)?;
        Self::from_corpus(corpus, config)
    }

    /// Load a corpus file and build the engine. `.csv` files go through the raw dataset
    /// loader; `.json` files must hold an array of already-normalized recipe inputs.
    ///
    /// # Errors
    /// Returns an error when the file is unreadable, has an unknown extension, misses
    /// required fields, or yields no valid recipe.
    pub fn open(corpus_path: &Path, config: KernelConfig) -> Result<Self> {
        let extension = corpus_path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_ascii_lowercase);
        let recipes = match extension.as_deref() {
            Some("csv") => {
                let dataset = recipe_kernel_dataset::load_dataset_csv(corpus_path)?;
                tracing::debug!(rows = dataset.rows_read, path = %corpus_path.display(), "dataset loaded");
                dataset.recipes
            }
            Some("json") => {
                let raw = std::fs::read_to_string(corpus_path)
                    .with_context(|| format!("failed to read corpus {}", corpus_path.display()))?;
                serde_json::from_str::<Vec<RecipeInput>>(&raw)
                    .with_context(|| format!("invalid recipe corpus {}", corpus_path.display()))?
            }
            _ => bail!(
                "unsupported corpus format for {}; expected .csv or .json",
                corpus_path.display()
            ),
        };
        Self::from_recipes(recipes, config)
    }

    #[must_use]
    pub fn engine(&self) -> &RecipeEngine {
        &self.engine
    }

    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub fn corpus_stats(&self) -> CorpusStats {
        self.engine.corpus().stats()
    }

    /// Run one conversation turn against `session`.
    ///
    /// # Errors
    /// Returns an error when retrieval fails.
    pub fn handle_turn(&self, session: &mut Session, request: &TurnRequest) -> Result<TurnOutcome> {
        let primary = request
            .extraction
            .as_ref()
            .map(PreferenceDelta::from_value)
            .unwrap_or_default();
        let refinement = match (&request.refinement, &request.text) {
            (Some(refinement), _) => PreferenceDelta::from_value(refinement),
            (None, Some(text)) => self.detect(text),
            (None, None) => PreferenceDelta::default(),
        };

        let outcome = session.take_turn(&self.engine, &primary, &refinement)?;
        log_outcome(&outcome);
        Ok(outcome)
    }

    /// Run one turn from raw user text and the extractor's raw output string.
    ///
    /// Extractor output that is not JSON is logged and treated as no new information.
    ///
    /// # Errors
    /// Returns an error when retrieval fails.
    pub fn handle_text_turn(
        &self,
        session: &mut Session,
        text: &str,
        raw_extraction: Option<&str>,
    ) -> Result<TurnOutcome> {
        let primary = match raw_extraction.map(PreferenceDelta::from_json_str) {
            Some(Ok(delta)) => delta,
            Some(Err(err)) => {
                tracing::warn!(error = %err, "ignoring malformed extractor output");
                PreferenceDelta::default()
            }
            None => PreferenceDelta::default(),
        };
        let refinement = self.detect(text);

        let outcome = session.take_turn(&self.engine, &primary, &refinement)?;
        log_outcome(&outcome);
        Ok(outcome)
    }

    /// # Errors
    /// Returns an error when retrieval fails.
    pub fn show_more(&self, session: &mut Session) -> Result<TurnOutcome> {
        let outcome = session.show_more(&self.engine)?;
        log_outcome(&outcome);
        Ok(outcome)
    }

    /// Rank against a one-off preference payload with no dialogue gating or relaxation.
    ///
    /// # Errors
    /// Returns an error when retrieval fails.
    pub fn recommend_stateless(&self, request: &RecommendRequest) -> Result<RecommendResult> {
        let preferences = merge_preferences(
            &PreferenceState::default(),
            &PreferenceDelta::from_value(&request.preferences),
        );
        let page = self.engine.recommend(&preferences)?;
        let items = self.engine.explain_page(&page, &preferences);
        Ok(RecommendResult {
            query: build_query(&preferences),
            time_relaxed: page.time_relaxed,
            total_candidates: page.total_candidates,
            offset: page.offset,
            items,
            preferences,
        })
    }

    /// Raw similarity search over the corpus documents.
    ///
    /// # Errors
    /// Returns an error when `limit` is zero.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        if limit == 0 {
            bail!("search limit MUST be >= 1");
        }
        let corpus = self.engine.corpus();
        Ok(self
            .engine
            .index()
            .rank(query, limit)
            .into_iter()
            .enumerate()
            .filter_map(|(position, scored)| {
                corpus.get(scored.index).map(|record| SearchHit {
                    rank: position + 1,
                    score: scored.score,
                    recipe: record.clone(),
                })
            })
            .collect())
    }

    fn detect(&self, text: &str) -> PreferenceDelta {
        detect_refinement(text, self.engine.config().page_size, &self.config.refinement)
    }
}

fn log_outcome(outcome: &TurnOutcome) {
    match &outcome.reply {
        TurnReply::Question { field, .. } => {
            tracing::debug!(field = field.as_str(), "asking for missing preference");
        }
        TurnReply::FollowUp { missing, .. } => {
            tracing::debug!(missing = ?missing, "asking follow-up before retrieval");
        }
        TurnReply::Recommendations { items, relaxed, time_relaxed, .. } => {
            if let Some(step) = relaxed {
                tracing::info!(step = ?step, "relaxed preferences after empty result");
            }
            tracing::debug!(count = items.len(), time_relaxed, "recommendations served");
        }
        TurnReply::NoMatch { reason, .. } => {
            tracing::info!(reason = ?reason, "no recipes matched");
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: Ulid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub turns: u64,
    pub session: Session,
    pub summary: Vec<String>,
}

#[derive(Debug)]
struct SessionEntry {
    session: Session,
    created_at: OffsetDateTime,
    last_active: OffsetDateTime,
    turns: u64,
}

impl SessionEntry {
    fn snapshot(&self, session_id: Ulid) -> SessionSnapshot {
        SessionSnapshot {
            session_id,
            created_at: self.created_at,
            turns: self.turns,
            session: self.session.clone(),
            summary: self.session.preferences.summary_lines(),
        }
    }
}

/// In-memory sessions for the lifetime of the process.
///
/// Each session has its own lock, so turns on different sessions never wait on
/// each other. Nothing is persisted; sessions leave the map through [`Self::remove`]
/// or an idle sweep with [`Self::evict_idle`].
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Ulid, Arc<Mutex<SessionEntry>>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> SessionSnapshot {
        let session_id = Ulid::new();
        let now = OffsetDateTime::now_utc();
        let entry = SessionEntry { session: Session::new(), created_at: now, last_active: now, turns: 0 };
        let snapshot = entry.snapshot(session_id);
        self.sessions.write().insert(session_id, Arc::new(Mutex::new(entry)));
        tracing::debug!(%session_id, "session created");
        snapshot
    }

    #[must_use]
    pub fn get(&self, session_id: Ulid) -> Option<SessionSnapshot> {
        let entry = self.entry(session_id)?;
        let guard = entry.lock();
        Some(guard.snapshot(session_id))
    }

    /// Run `apply` as one turn on the session. `Ok(None)` means the session does not
    /// exist.
    ///
    /// # Errors
    /// Returns the error produced by `apply`; the turn counter is not advanced then.
    pub fn with_session<T>(
        &self,
        session_id: Ulid,
        apply: impl FnOnce(&mut Session) -> Result<T>,
    ) -> Result<Option<T>> {
        let Some(entry) = self.entry(session_id) else {
            return Ok(None);
        };
        let mut guard = entry.lock();
        let value = apply(&mut guard.session)?;
        guard.turns += 1;
        guard.last_active = OffsetDateTime::now_utc();
        Ok(Some(value))
    }

    pub fn reset(&self, session_id: Ulid) -> Option<SessionSnapshot> {
        let entry = self.entry(session_id)?;
        let mut guard = entry.lock();
        guard.session.reset();
        guard.turns = 0;
        guard.last_active = OffsetDateTime::now_utc();
        Some(guard.snapshot(session_id))
    }

    pub fn remove(&self, session_id: Ulid) -> bool {
        self.sessions.write().remove(&session_id).is_some()
    }

    /// Drop every session whose last turn (or creation) is older than `max_idle` at
    /// `now`. Returns how many were removed. A session whose lock is held by a
    /// running turn is kept.
    pub fn evict_idle(&self, now: OffsetDateTime, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| {
            entry.try_lock().map_or(true, |guard| now - guard.last_active <= max_idle)
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = sessions.len(), "evicted idle sessions");
        }
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn entry(&self, session_id: Ulid) -> Option<Arc<Mutex<SessionEntry>>> {
        self.sessions.read().get(&session_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use recipe_kernel_core::{DialogueAction, Nutrition, PreferenceField, RelaxStep};

    use super::*;

    fn mk_recipe(name: &str, course: &str, cuisine: &str, minutes: i64) -> RecipeInput {
        RecipeInput {
            name: name.to_string(),
            course: course.to_string(),
            cuisine: cuisine.to_string(),
            summary: format!("homestyle {name}"),
            keywords: vec![format!("{cuisine} recipes")],
            ingredients: vec!["onion".to_string(), "garlic".to_string()],
            total_time_minutes: minutes,
            nutrition: Nutrition::default(),
            image_url: None,
        }
    }

    fn fixture_api() -> RecipeKernelApi {
        let recipes = vec![
            mk_recipe("chana masala", "dinner", "north indian", 35),
            mk_recipe("aloo paratha", "breakfast", "north indian", 40),
            mk_recipe("mushroom risotto", "dinner", "italian", 45),
            mk_recipe("caprese salad", "appetizer", "italian", 10),
            mk_recipe("veg fried rice", "dinner", "chinese", 25),
            mk_recipe("broken", "dinner", "italian", 0),
        ];
        match RecipeKernelApi::from_recipes(recipes, KernelConfig::default()) {
            Ok(api) => api,
            Err(err) => panic!("fixture api should build: {err}"),
        }
    }

    fn unique_temp_path(extension: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("recipekernel-api-{}.{extension}", Ulid::new()))
    }

    // Test IDs: TAPI-001
    #[test]
    fn refinement_detector_reads_text_signals() {
        let config = RefinementConfig::default();
        let delta = detect_refinement("Show me another QUICK vegetarian one, exclude chicken!", 5, &config);
        assert_eq!(delta.offset, 5);
        assert_eq!(delta.max_cook_time, Some(30));
        assert_eq!(delta.diet.as_deref(), Some("vegetarian"));
        assert!(delta.excluded_ingredients.contains("chicken"));

        assert!(detect_refinement("something with chickenpeas, exclude nuts", 5, &config).is_empty());
        assert!(detect_refinement("pasta please", 5, &config).is_empty());
    }

    // Test IDs: TAPI-002
    #[test]
    fn full_conversation_through_the_facade() -> Result<()> {
        let api = fixture_api();
        let mut session = Session::new();

        let first = api.handle_turn(&mut session, &TurnRequest::default())?;
        assert_eq!(first.action, DialogueAction::Ask(PreferenceField::Course));

        let second = api.handle_turn(
            &mut session,
            &TurnRequest {
                text: Some("Something Indian for dinner with chana, quick please".to_string()),
                extraction: Some(serde_json::json!({
                    "course": "dinner",
                    "cuisine": "north indian",
                    "keywords": ["chana"]
                })),
                refinement: None,
            },
        )?;

        assert_eq!(second.preferences.max_cook_time, Some(30));
        match &second.reply {
            TurnReply::Recommendations { items, time_relaxed, .. } => {
                assert_eq!(items[0].recipe.name, "chana masala");
                assert!(!time_relaxed);
            }
            other => panic!("expected recommendations, got {other:?}"),
        }
        Ok(())
    }

    // Test IDs: TAPI-003
    #[test]
    fn malformed_extractor_output_is_ignored() -> Result<()> {
        let api = fixture_api();
        let mut session = Session::new();
        let outcome = api.handle_text_turn(&mut session, "hello there", Some("{not json"))?;
        assert_eq!(outcome.preferences, PreferenceState::default());
        assert_eq!(outcome.action, DialogueAction::Ask(PreferenceField::Course));

        let outcome = api.handle_text_turn(
            &mut session,
            "dinner",
            Some(r#"{"course": "Dinner", "max_cook_time": "soon", "keywords": "rice"}"#),
        )?;
        assert_eq!(outcome.preferences.course.as_deref(), Some("dinner"));
        assert_eq!(outcome.preferences.max_cook_time, None);
        assert!(outcome.preferences.keywords.is_empty());
        Ok(())
    }

    // Test IDs: TAPI-004
    #[test]
    fn relaxation_is_reported_through_the_facade() -> Result<()> {
        let api = fixture_api();
        let mut session = Session::new();
        let outcome = api.handle_turn(
            &mut session,
            &TurnRequest {
                text: None,
                extraction: Some(serde_json::json!({
                    "course": "dessert",
                    "cuisine": "chinese",
                    "keywords": ["rice"],
                    "max_cook_time": 30
                })),
                refinement: None,
            },
        )?;

        match outcome.reply {
            TurnReply::Recommendations { items, relaxed, .. } => {
                assert_eq!(relaxed, Some(RelaxStep::ClearedCourse));
                assert_eq!(items[0].recipe.name, "veg fried rice");
            }
            other => panic!("expected relaxed recommendations, got {other:?}"),
        }
        Ok(())
    }

    // Test IDs: TAPI-005
    #[test]
    fn stateless_recommend_and_search() -> Result<()> {
        let api = fixture_api();
        let result = api.recommend_stateless(&RecommendRequest {
            preferences: serde_json::json!({"cuisine": "italian", "max_cook_time": 15}),
        })?;
        assert_eq!(result.query, "italian");
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].recipe.name, "caprese salad");

        let hits = api.search("mushroom risotto", 2)?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].recipe.name, "mushroom risotto");
        assert_eq!(hits[0].rank, 1);
        assert!(api.search("anything", 0).is_err());

        let stats = api.corpus_stats();
        assert_eq!(stats.records, 5);
        assert_eq!(stats.report.dropped_non_positive_time, 1);
        Ok(())
    }

    // Test IDs: TAPI-006
    #[test]
    fn session_registry_lifecycle() -> Result<()> {
        let api = fixture_api();
        let registry = SessionRegistry::new();
        let created = registry.create();
        assert_eq!(created.turns, 0);
        assert_eq!(registry.len(), 1);

        let outcome = registry.with_session(created.session_id, |session| {
            api.handle_turn(
                session,
                &TurnRequest {
                    extraction: Some(serde_json::json!({"course": "breakfast", "cuisine": "north indian"})),
                    ..TurnRequest::default()
                },
            )
        })?;
        assert!(matches!(
            outcome.map(|outcome| outcome.action),
            Some(DialogueAction::Ask(PreferenceField::MaxCookTime))
        ));

        let snapshot = registry
            .get(created.session_id)
            .unwrap_or_else(|| panic!("session should exist"));
        assert_eq!(snapshot.turns, 1);
        assert_eq!(snapshot.summary, vec!["• Course: Breakfast", "• Cuisine: North Indian"]);

        let reset = registry
            .reset(created.session_id)
            .unwrap_or_else(|| panic!("session should exist"));
        assert_eq!(reset.session, Session::default());

        assert!(registry.remove(created.session_id));
        assert!(!registry.remove(created.session_id));
        assert!(registry.get(created.session_id).is_none());
        assert!(registry.with_session(created.session_id, |_| Ok(()))?.is_none());
        Ok(())
    }

    // Test IDs: TAPI-008
    #[test]
    fn idle_sessions_are_evicted_and_active_ones_kept() -> Result<()> {
        let registry = SessionRegistry::new();
        let idle = registry.create();
        let active = registry.create();
        registry.with_session(active.session_id, |_| Ok(()))?;

        let now = OffsetDateTime::now_utc();
        assert_eq!(registry.evict_idle(now, Duration::hours(1)), 0);
        assert_eq!(registry.len(), 2);

        let later = now + Duration::minutes(90);
        assert_eq!(registry.evict_idle(later, Duration::hours(1)), 2);
        assert!(registry.is_empty());
        assert!(registry.get(idle.session_id).is_none());

        let fresh = registry.create();
        assert_eq!(registry.evict_idle(OffsetDateTime::now_utc(), Duration::hours(1)), 0);
        assert!(registry.get(fresh.session_id).is_some());
        Ok(())
    }

    // Test IDs: TAPI-007
    #[test]
    fn config_and_corpus_files_load() -> Result<()> {
        let config_path = unique_temp_path("yaml");
        std::fs::write(
            &config_path,
            "ranking:\n  page_size: 2\n  overrun_penalty:\n    mode: per_minute\n    rate: 0.05\nrefinement:\n  quick_cook_minutes: 20\n",
        )?;
        let config = KernelConfig::load(&config_path)?;
        assert_eq!(config.ranking.page_size, 2);
        assert_eq!(config.ranking.recall_limit, 100);
        assert_eq!(config.refinement.quick_cook_minutes, 20);

        std::fs::write(&config_path, "ranking:\n  time_tolerance: 0.5\n")?;
        assert!(KernelConfig::load(&config_path).is_err());
        let _ = std::fs::remove_file(&config_path);

        let corpus_path = unique_temp_path("json");
        std::fs::write(
            &corpus_path,
            serde_json::to_string(&[mk_recipe("dal tadka", "dinner", "indian", 30)])?,
        )?;
        let api = RecipeKernelApi::open(&corpus_path, config)?;
        assert_eq!(api.corpus_stats().records, 1);
        assert_eq!(api.engine().config().page_size, 2);
        let _ = std::fs::remove_file(&corpus_path);

        assert!(RecipeKernelApi::open(Path::new("recipes.parquet"), KernelConfig::default()).is_err());
        Ok(())
    }
}
