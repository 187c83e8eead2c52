use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use jsonschema::JSONSchema;
use serde_json::Value;

const FIXTURE_CSV: &str = "name,imgurl,course,cuisine,keyword,summary,ingredients,nutritions,Times
Creamy Garlic Pasta,https://img/pasta.jpg,Dinner,Italian Recipes,\"Pasta, Quick Dinners\",Creamy garlic pasta finished with parmesan,\"['Spaghetti', 'Garlic', 'Parmesan']\",\"{'Calories': '540 kcal', 'Protein': '18 g'}\",\"{'Prep Time': '10 minutes', 'Cook Time': '15 minutes'}\"
Slow Baked Lasagna,,Dinner,Italian Recipes,\"Baked, Sunday\",Layered beef ragu with bechamel,\"['Lasagna Sheets', 'Beef', 'Tomato']\",{},\"{'Prep Time': '30 minutes', 'Cook Time': '1 hour'}\"
Chicken Karahi,,Dinner,Pakistani Recipes,\"Chicken, Spicy\",Wok cooked chicken with tomato and green chillies,\"['Chicken', 'Tomato', 'Green Chilli']\",{},\"{'Cook Time': '45 minutes'}\"
Masala Omelette,,Breakfast,North Indian Recipes,Eggs,Fluffy eggs with onion and chilli,\"['Eggs', 'Onion']\",{},\"{'Cook Time': '15 minutes'}\"
Mango Kulfi,,Dessert,Indian Recipes,Frozen,Frozen mango milk dessert,\"['Mango', 'Milk']\",{},\"{'Prep Time': '4 hours'}\"
Instant Nothing,,Dinner,Italian Recipes,,Has no usable time,[],{},{}
";

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn write_fixture(dir: &Path) -> PathBuf {
    let path = dir.join("recipes.csv");
    fs::write(&path, FIXTURE_CSV)
        .unwrap_or_else(|err| panic!("failed to write fixture {}: {err}", path.display()));
    path
}

fn run_rk<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_rk"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute rk binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_rk(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "rk command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn read_json_file(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read JSON file {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse JSON file {}: {err}", path.display()))
}

fn validate_schema(schema_file: &str, instance: &Value) {
    let schema_path = repo_root().join("contracts/v1/schemas").join(schema_file);
    let schema_json = read_json_file(&schema_path);
    let compiled = JSONSchema::compile(&schema_json)
        .unwrap_or_else(|err| panic!("failed to compile schema {}: {err}", schema_path.display()));

    let errors = compiled
        .validate(instance)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>());
    if let Some(errors) = errors {
        panic!("schema validation failed for {}:\n{}", schema_file, errors.join("\n"));
    }
}

fn items(payload: &Value) -> &Vec<Value> {
    payload
        .get("items")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing `items` array in payload: {payload}"))
}

fn recipe_name(item: &Value) -> &str {
    item.pointer("/recipe/name")
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing recipe name in item: {item}"))
}

// Test IDs: TCLI-001
#[test]
fn corpus_stats_reports_accepted_and_dropped_rows() {
    let dir = unique_temp_dir("rk-cli-stats");
    let corpus = write_fixture(&dir);

    let payload = run_json(["--corpus", path_str(&corpus), "corpus", "stats"]);
    validate_schema("corpus-stats.schema.json", &payload);

    assert_eq!(payload["contract_version"], "cli.v1");
    assert_eq!(payload["stats"]["records"], 5);
    assert_eq!(payload["stats"]["report"]["input_rows"], 6);
    assert_eq!(payload["stats"]["report"]["dropped_non_positive_time"], 1);
    assert_eq!(payload["stats"]["report"]["dropped_oversized_time"], 0);
    assert_eq!(payload["stats"]["courses"]["dinner"], 3);
    assert_eq!(payload["stats"]["min_time_minutes"], 15);
    assert_eq!(payload["stats"]["max_time_minutes"], 240);
}

// Test IDs: TCLI-002
#[test]
fn search_ranks_the_closest_document_first() {
    let dir = unique_temp_dir("rk-cli-search");
    let corpus = write_fixture(&dir);

    let payload = run_json([
        "--corpus",
        path_str(&corpus),
        "search",
        "--query",
        "creamy garlic parmesan",
        "--limit",
        "3",
    ]);
    validate_schema("search.schema.json", &payload);

    let hits = payload
        .get("hits")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing hits: {payload}"));
    assert!(!hits.is_empty() && hits.len() <= 3);
    assert_eq!(recipe_name(&hits[0]), "creamy garlic pasta");
    assert_eq!(hits[0]["rank"], 1);
    validate_schema("recipe.schema.json", &hits[0]["recipe"]);
}

// Test IDs: TCLI-003
#[test]
fn recommend_flags_filter_and_explain_results() {
    let dir = unique_temp_dir("rk-cli-recommend");
    let corpus = write_fixture(&dir);

    let payload = run_json([
        "--corpus",
        path_str(&corpus),
        "recommend",
        "--course",
        "dinner",
        "--cuisine",
        "Italian",
        "--keyword",
        "pasta",
        "--max-cook-time",
        "30",
    ]);
    validate_schema("recommend.schema.json", &payload);

    assert_eq!(payload["query"], "italian dinner pasta");
    assert_eq!(payload["time_relaxed"], false);
    assert_eq!(payload["total_candidates"], 1);

    let items = items(&payload);
    assert_eq!(items.len(), 1);
    assert_eq!(recipe_name(&items[0]), "creamy garlic pasta");
    let reasons = items[0]["explanation"]["reasons"]
        .as_array()
        .unwrap_or_else(|| panic!("missing reasons: {payload}"));
    assert!(reasons.iter().any(|reason| reason == "respects your time limit"));
    assert!(reasons.iter().any(|reason| reason == "matches your interest in italian cuisine"));
}

// Test IDs: TCLI-004
#[test]
fn recommend_keeps_longer_recipes_when_nothing_fits_the_cap() {
    let dir = unique_temp_dir("rk-cli-time-relaxed");
    let corpus = write_fixture(&dir);

    let payload = run_json([
        "--corpus",
        path_str(&corpus),
        "recommend",
        "--preferences",
        r#"{"course": "dinner", "cuisine": "italian", "max_cook_time": 10}"#,
    ]);
    validate_schema("recommend.schema.json", &payload);

    assert_eq!(payload["time_relaxed"], true);
    assert_eq!(payload["total_candidates"], 2);
    let items = items(&payload);
    assert_eq!(items.len(), 2);
    for item in items {
        let bonus = item["scores"]["time_bonus"]
            .as_f64()
            .unwrap_or_else(|| panic!("missing time bonus: {item}"));
        assert!(bonus < 0.0);
    }
}

// Test IDs: TCLI-005
#[test]
fn replay_runs_a_scripted_conversation() {
    let dir = unique_temp_dir("rk-cli-replay");
    let corpus = write_fixture(&dir);
    let script = dir.join("session.jsonl");
    fs::write(
        &script,
        [
            r#"{"op": "turn", "text": "something italian", "extraction": {"cuisine": "Italian"}}"#,
            "",
            r#"{"op": "turn", "extraction": {"course": "dinner", "keywords": ["pasta"], "max_cook_time": 30}}"#,
            r#"{"op": "more"}"#,
            r#"{"op": "reset"}"#,
        ]
        .join("\n"),
    )
    .unwrap_or_else(|err| panic!("failed to write script: {err}"));

    let payload = run_json(["--corpus", path_str(&corpus), "replay", "--script", path_str(&script)]);
    validate_schema("replay.schema.json", &payload);

    let turns = payload
        .get("turns")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing turns: {payload}"));
    assert_eq!(turns.len(), 4);

    assert_eq!(turns[0]["outcome"]["reply"]["kind"], "question");
    assert_eq!(turns[0]["outcome"]["reply"]["field"], "course");

    assert_eq!(turns[1]["line"], 3);
    assert_eq!(turns[1]["outcome"]["reply"]["kind"], "recommendations");
    let first_page = turns[1]["outcome"]["reply"]["items"]
        .as_array()
        .unwrap_or_else(|| panic!("missing items: {payload}"));
    assert_eq!(recipe_name(&first_page[0]), "creamy garlic pasta");

    // The second page is empty, so the course constraint is dropped and paging restarts.
    assert_eq!(turns[2]["outcome"]["reply"]["kind"], "recommendations");
    assert_eq!(turns[2]["outcome"]["reply"]["relaxed"], "cleared_course");
    assert_eq!(turns[2]["outcome"]["preferences"]["course"], Value::Null);
    assert_eq!(turns[2]["outcome"]["preferences"]["offset"], 0);

    assert_eq!(turns[3]["outcome"], Value::Null);
    assert_eq!(payload["final_preferences"]["cuisine"], Value::Null);
    assert_eq!(payload["summary"], serde_json::json!([]));
}

// Test IDs: TCLI-006
#[test]
fn unreadable_corpus_fails_with_context() {
    let dir = unique_temp_dir("rk-cli-missing");
    let missing = dir.join("absent.csv");

    let output = run_rk(["--corpus", path_str(&missing), "corpus", "stats"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load corpus"), "stderr was: {stderr}");
}

// Test IDs: TCLI-007
#[test]
fn malformed_replay_step_reports_its_line() {
    let dir = unique_temp_dir("rk-cli-bad-script");
    let corpus = write_fixture(&dir);
    let script = dir.join("bad.jsonl");
    fs::write(&script, "{\"op\": \"more\"}\n{\"op\": \"dance\"}\n")
        .unwrap_or_else(|err| panic!("failed to write script: {err}"));

    let output = run_rk(["--corpus", path_str(&corpus), "replay", "--script", path_str(&script)]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid replay step on line 2"), "stderr was: {stderr}");
}
