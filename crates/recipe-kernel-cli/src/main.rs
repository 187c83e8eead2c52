use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use recipe_kernel_api::{
    KernelConfig, RecipeKernelApi, RecommendRequest, TurnRequest, API_CONTRACT_VERSION,
};
use recipe_kernel_core::Session;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "rk")]
#[command(about = "Recipe Kernel CLI")]
struct Cli {
    /// Recipe corpus: a raw dataset `.csv` or a normalized `.json` array.
    #[arg(long)]
    corpus: PathBuf,

    /// Optional YAML file with ranking and refinement settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset. Logs go to stderr.
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Corpus {
        #[command(subcommand)]
        command: CorpusCommand,
    },
    Search(SearchArgs),
    Recommend(RecommendArgs),
    Replay(ReplayArgs),
}

#[derive(Debug, Subcommand)]
enum CorpusCommand {
    Stats,
}

#[derive(Debug, Args)]
struct SearchArgs {
    #[arg(long)]
    query: String,
    #[arg(long, default_value_t = 10)]
    limit: usize,
}

#[derive(Debug, Args)]
struct RecommendArgs {
    /// Full preference payload as JSON. Individual flags below are merged on top.
    #[arg(long)]
    preferences: Option<String>,
    #[arg(long)]
    course: Option<String>,
    #[arg(long)]
    cuisine: Option<String>,
    #[arg(long = "keyword")]
    keywords: Vec<String>,
    #[arg(long = "ingredient")]
    ingredients: Vec<String>,
    #[arg(long)]
    max_cook_time: Option<u32>,
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Debug, Args)]
struct ReplayArgs {
    /// JSON-lines script; one step per line.
    #[arg(long)]
    script: PathBuf,
}

/// One scripted conversation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ReplayStep {
    Turn(TurnRequest),
    More,
    Reset,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = match cli.config.as_deref() {
        Some(path) => KernelConfig::load(path)?,
        None => KernelConfig::default(),
    };
    let api = RecipeKernelApi::open(&cli.corpus, config)
        .with_context(|| format!("failed to load corpus {}", cli.corpus.display()))?;

    match cli.command {
        Command::Corpus { command: CorpusCommand::Stats } => run_corpus_stats(&api),
        Command::Search(args) => run_search(&api, &args),
        Command::Recommend(args) => run_recommend(&api, &args),
        Command::Replay(args) => run_replay(&api, &args),
    }
}

fn run_corpus_stats(api: &RecipeKernelApi) -> Result<()> {
    let stats = api.corpus_stats();
    emit_json(serde_json::json!({
        "api_contract_version": API_CONTRACT_VERSION,
        "stats": stats
    }))
}

fn run_search(api: &RecipeKernelApi, args: &SearchArgs) -> Result<()> {
    let hits = api.search(&args.query, args.limit)?;
    emit_json(serde_json::json!({
        "query": args.query,
        "limit": args.limit,
        "hits": hits
    }))
}

fn recommend_payload(args: &RecommendArgs) -> Result<Value> {
    let mut payload = match args.preferences.as_deref() {
        Some(raw) => serde_json::from_str::<Value>(raw).context("--preferences must be valid JSON")?,
        None => serde_json::json!({}),
    };
    let Value::Object(object) = &mut payload else {
        bail!("--preferences must be a JSON object");
    };

    if let Some(course) = &args.course {
        object.insert("course".to_string(), Value::from(course.as_str()));
    }
    if let Some(cuisine) = &args.cuisine {
        object.insert("cuisine".to_string(), Value::from(cuisine.as_str()));
    }
    if !args.keywords.is_empty() {
        object.insert("keywords".to_string(), serde_json::json!(args.keywords));
    }
    if !args.ingredients.is_empty() {
        object.insert("selected_ingredients".to_string(), serde_json::json!(args.ingredients));
    }
    if let Some(minutes) = args.max_cook_time {
        object.insert("max_cook_time".to_string(), Value::from(minutes));
    }
    if args.offset > 0 {
        object.insert("offset".to_string(), Value::from(args.offset));
    }
    Ok(payload)
}

fn run_recommend(api: &RecipeKernelApi, args: &RecommendArgs) -> Result<()> {
    let preferences = recommend_payload(args)?;
    let result = api.recommend_stateless(&RecommendRequest { preferences })?;
    emit_json(serde_json::to_value(result)?)
}

fn run_replay(api: &RecipeKernelApi, args: &ReplayArgs) -> Result<()> {
    let script = fs::read_to_string(&args.script)
        .with_context(|| format!("failed to read replay script {}", args.script.display()))?;

    let mut session = Session::new();
    let mut turns = Vec::new();
    for (line_number, line) in script.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let step: ReplayStep = serde_json::from_str(line)
            .with_context(|| format!("invalid replay step on line {}", line_number + 1))?;
        tracing::debug!(line = line_number + 1, step = ?step, "replaying step");

        let outcome = match &step {
            ReplayStep::Turn(request) => Some(api.handle_turn(&mut session, request)?),
            ReplayStep::More => Some(api.show_more(&mut session)?),
            ReplayStep::Reset => {
                session.reset();
                None
            }
        };
        turns.push(serde_json::json!({
            "line": line_number + 1,
            "step": step,
            "outcome": outcome
        }));
    }

    emit_json(serde_json::json!({
        "turns": turns,
        "final_preferences": session.preferences,
        "summary": session.preferences.summary_lines()
    }))
}
