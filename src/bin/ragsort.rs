#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ragsort_harness::cache::SqliteReplyCache;
use ragsort_harness::config::{GroundTruthModeKind, RunConfig};
use ragsort_harness::dataset::Dataset;
use ragsort_harness::gateway::{ProviderGateway, TotalsUsageSink};
use ragsort_harness::ground_truth::{GroundTruthGenerator, GroundTruthRecord};
use ragsort_harness::oracle::{LlmOracle, LABEL_MAX_OUTPUT_TOKENS};
use ragsort_harness::orchestrator::{BatchSettings, Orchestrator};
use ragsort_harness::persist::{self, JsonlResultSink};
use ragsort_harness::prompts::{prompt_set, PromptLanguage};
use ragsort_harness::rerank::evaluation::run_synthetic_suite;
use ragsort_harness::rerank::{JsonlTraceSink, TraceSink};
use ragsort_harness::scoring::{score_batch, BudgetUnit, HttpScorer};

#[derive(Parser)]
#[command(name = "ragsort", version, about = "RAG context ranking and evaluation harness")]
struct Cli {
    /// JSON run configuration; flags override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct OracleArgs {
    /// Oracle model
    #[arg(long)]
    model: Option<String>,
    #[arg(long, value_enum)]
    language: Option<LanguageArg>,
    /// Per-call oracle deadline in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Reply cache path (defaults to RAGSORT_CACHE_PATH)
    #[arg(long)]
    cache: Option<PathBuf>,
    #[arg(long)]
    no_cache: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-filter and sort every question's contexts (LLM calls)
    Sort {
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        k: Option<usize>,
        /// Sort every context without classifying answerability first
        #[arg(long)]
        no_prefilter: bool,
        /// Measure overlap over the bottom of the ranking
        #[arg(long)]
        from_bottom: bool,
        #[arg(long)]
        parallel: Option<usize>,
        /// Append each finished question to this JSONL file
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Write one JSONL event per oracle call
        #[arg(long)]
        trace: Option<PathBuf>,
        #[command(flatten)]
        oracle: OracleArgs,
    },
    /// Generate one ground-truth file per question (LLM calls)
    Generate {
        #[arg(long)]
        dataset: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        #[arg(long)]
        group_size: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        #[command(flatten)]
        oracle: OracleArgs,
    },
    /// Score answers, generating missing ground truths first
    Evaluate {
        #[arg(long)]
        dataset: PathBuf,
        /// Score CSV
        #[arg(long)]
        out: PathBuf,
        /// Sorted results; contexts are scored in ranked order
        #[arg(long)]
        sorted: Option<PathBuf>,
        #[arg(long)]
        k: Option<usize>,
        #[arg(long)]
        scorer_url: Option<String>,
        #[arg(long, value_enum)]
        budget_unit: Option<BudgetUnitArg>,
        #[arg(long)]
        budget_limit: Option<usize>,
        /// Also write generated ground truths here
        #[arg(long)]
        ground_truth_dir: Option<PathBuf>,
        #[command(flatten)]
        oracle: OracleArgs,
    },
    /// Run the synthetic evaluation suite (no network)
    Simulate {
        #[arg(long)]
        case: Option<String>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Export SQLite reply cache to JSONL
    CacheExport {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Prune SQLite reply cache (by age and/or size)
    CachePrune {
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        max_age_days: Option<u64>,
        #[arg(long)]
        max_rows: Option<usize>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum LanguageArg {
    En,
    Zh,
}

impl From<LanguageArg> for PromptLanguage {
    fn from(value: LanguageArg) -> Self {
        match value {
            LanguageArg::En => PromptLanguage::En,
            LanguageArg::Zh => PromptLanguage::Zh,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Fast,
    Exhaustive,
}

#[derive(Clone, Copy, ValueEnum)]
enum BudgetUnitArg {
    Chars,
    Tokens,
}

/// File, then environment. Flags are applied by the caller afterwards.
fn load_config(path: Option<&Path>) -> Result<RunConfig, Box<dyn std::error::Error>> {
    let mut cfg = match path {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    cfg.apply_env()?;
    Ok(cfg)
}

fn apply_oracle_args(cfg: &mut RunConfig, args: &OracleArgs) {
    if let Some(model) = &args.model {
        cfg.model = model.clone();
    }
    if let Some(language) = args.language {
        cfg.language = language.into();
    }
    if let Some(secs) = args.timeout_secs {
        cfg.oracle_timeout_secs = secs;
    }
    if let Some(path) = &args.cache {
        cfg.cache_path = Some(path.clone());
    }
}

fn finish_config(cfg: &RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    cfg.validate()?;
    Ok(())
}

/// Oracle over the OpenAI-compatible gateway, with the reply cache unless disabled.
///
/// `max_output_tokens` caps label-only prompts; free-text answers pass `None`.
fn build_oracle(
    cfg: &RunConfig,
    model: &str,
    args: &OracleArgs,
    usage: Arc<TotalsUsageSink>,
    run_id: Uuid,
    caller: &'static str,
    max_output_tokens: Option<u32>,
) -> Result<LlmOracle, Box<dyn std::error::Error>> {
    let gateway = ProviderGateway::from_env(usage)?;
    let mut oracle = LlmOracle::new(Arc::new(gateway), model)
        .with_timeout(cfg.oracle_timeout())
        .with_run(run_id)
        .with_caller(caller);
    if let Some(max) = max_output_tokens {
        oracle = oracle.with_max_output_tokens(max);
    }
    if !args.no_cache {
        let path = cfg
            .cache_path
            .clone()
            .unwrap_or_else(SqliteReplyCache::default_path);
        oracle = oracle.with_cache(Arc::new(SqliteReplyCache::new(path)?));
    }
    Ok(oracle)
}

fn report_usage(usage: &TotalsUsageSink) {
    let totals = usage.totals();
    info!(
        calls = totals.calls,
        errors = totals.errors,
        input_tokens = totals.input_tokens,
        output_tokens = totals.output_tokens,
        "provider usage"
    );
    println!("total cost: ${:.4}", totals.cost_usd());
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let run_id = Uuid::new_v4();

    match cli.command {
        Commands::Sort {
            dataset,
            out,
            k,
            no_prefilter,
            from_bottom,
            parallel,
            checkpoint,
            trace,
            oracle,
        } => {
            let mut cfg = load_config(cli.config.as_deref())?;
            apply_oracle_args(&mut cfg, &oracle);
            if let Some(k) = k {
                cfg.k = k;
            }
            if no_prefilter {
                cfg.prefilter = false;
            }
            if from_bottom {
                cfg.from_top = false;
            }
            if let Some(parallel) = parallel {
                cfg.parallel = parallel;
            }
            finish_config(&cfg)?;

            let data = Dataset::load(&dataset)?;
            let usage = Arc::new(TotalsUsageSink::default());
            let llm = build_oracle(
                &cfg,
                &cfg.model,
                &oracle,
                usage.clone(),
                run_id,
                "ragsort::sort",
                Some(LABEL_MAX_OUTPUT_TOKENS),
            )?;
            let prompts = prompt_set(cfg.language);

            let mut orchestrator =
                Orchestrator::from_oracle(Arc::new(llm), &prompts, cfg.ambiguity);
            if let Some(path) = checkpoint {
                orchestrator = orchestrator.with_checkpoint(Arc::new(JsonlResultSink::new(path)?));
            }
            let trace_worker = match trace {
                Some(path) => {
                    let (sink, worker) = JsonlTraceSink::new(path)?;
                    let sink: Arc<dyn TraceSink> = Arc::new(sink);
                    orchestrator = orchestrator.with_trace(sink);
                    Some(worker)
                }
                None => None,
            };

            let settings = BatchSettings::from(&cfg);
            let results = orchestrator
                .run(&data.questions, &data.contexts, &settings)
                .await?;
            persist::write_sorted_results(&out, &results)?;
            info!(questions = results.len(), out = %out.display(), "wrote sorted results");

            drop(orchestrator);
            if let Some(worker) = trace_worker {
                worker.join()?;
            }
            report_usage(&usage);
        }
        Commands::Generate {
            dataset,
            out_dir,
            mode,
            group_size,
            seed,
            oracle,
        } => {
            let mut cfg = load_config(cli.config.as_deref())?;
            apply_oracle_args(&mut cfg, &oracle);
            if let Some(mode) = mode {
                cfg.ground_truth.mode = match mode {
                    ModeArg::Fast => GroundTruthModeKind::Fast,
                    ModeArg::Exhaustive => GroundTruthModeKind::Exhaustive,
                };
            }
            if let Some(size) = group_size {
                cfg.ground_truth.group_size = size;
            }
            if seed.is_some() {
                cfg.ground_truth.seed = seed;
            }
            finish_config(&cfg)?;

            let data = Dataset::load(&dataset)?;
            let model = oracle.model.clone().unwrap_or_else(|| cfg.ground_truth_model.clone());
            let usage = Arc::new(TotalsUsageSink::default());
            let llm = build_oracle(
                &cfg,
                &model,
                &oracle,
                usage.clone(),
                run_id,
                "ragsort::generate",
                None,
            )?;
            let generator = GroundTruthGenerator::from_settings(
                Arc::new(llm),
                prompt_set(cfg.language),
                &cfg.ground_truth,
            );

            let records = generator.generate_batch(&data.questions, &data.contexts).await?;
            for record in &records {
                let path = persist::write_ground_truth(&out_dir, record)?;
                if record.ground_truth.is_none() {
                    warn!(question = %record.question, "no context group produced an answer");
                }
                info!(path = %path.display(), "wrote ground truth");
            }
            report_usage(&usage);
        }
        Commands::Evaluate {
            dataset,
            out,
            sorted,
            k,
            scorer_url,
            budget_unit,
            budget_limit,
            ground_truth_dir,
            oracle,
        } => {
            let mut cfg = load_config(cli.config.as_deref())?;
            apply_oracle_args(&mut cfg, &oracle);
            if let Some(k) = k {
                cfg.k = k;
            }
            if let Some(url) = scorer_url {
                cfg.scoring.scorer_url = Some(url);
            }
            if let Some(unit) = budget_unit {
                cfg.scoring.budget_unit = match unit {
                    BudgetUnitArg::Chars => BudgetUnit::Chars,
                    BudgetUnitArg::Tokens => BudgetUnit::Tokens,
                };
            }
            if let Some(limit) = budget_limit {
                cfg.scoring.budget_limit = limit;
            }
            finish_config(&cfg)?;

            let mut data = Dataset::load(&dataset)?;
            if let Some(path) = sorted {
                let results = persist::read_sorted_results(&path)?;
                for result in results {
                    let Some(slot) = data.contexts.get_mut(result.question_index) else {
                        return Err(format!(
                            "sorted result for question {} is outside the dataset",
                            result.question_index
                        )
                        .into());
                    };
                    *slot = result
                        .order
                        .iter()
                        .filter_map(|&i| result.contexts.get(i).cloned())
                        .collect();
                }
            }

            let usage = Arc::new(TotalsUsageSink::default());
            let missing = data.missing_ground_truths();
            if !missing.is_empty() {
                info!(count = missing.len(), "generating missing ground truths");
                let model = oracle.model.clone().unwrap_or_else(|| cfg.ground_truth_model.clone());
                let llm = build_oracle(
                    &cfg,
                    &model,
                    &oracle,
                    usage.clone(),
                    run_id,
                    "ragsort::evaluate",
                    None,
                )?;
                let generator = GroundTruthGenerator::from_settings(
                    Arc::new(llm),
                    prompt_set(cfg.language),
                    &cfg.ground_truth,
                );
                for index in missing {
                    let ground_truth = generator
                        .generate(&data.questions[index], &data.contexts[index])
                        .await?;
                    if let Some(dir) = &ground_truth_dir {
                        persist::write_ground_truth(
                            dir,
                            &GroundTruthRecord {
                                question: data.questions[index].clone(),
                                contexts: data.contexts[index].clone(),
                                ground_truth: ground_truth.clone(),
                            },
                        )?;
                    }
                    data.set_ground_truth(index, ground_truth);
                }
            }

            let samples = data.samples()?;
            let timeout = Duration::from_secs(cfg.oracle_timeout_secs.max(120));
            let scorer = match &cfg.scoring.scorer_url {
                Some(url) => HttpScorer::new(url.clone(), timeout)?,
                None => HttpScorer::from_env(timeout)?,
            };
            let records = score_batch(&scorer, &samples, cfg.k, &cfg.scoring.budget()).await?;
            persist::write_scores_csv(&out, &records)?;
            info!(questions = records.len(), out = %out.display(), "wrote scores");
            report_usage(&usage);
        }
        Commands::Simulate { case, out } => {
            let results = run_synthetic_suite(case.as_deref()).await?;
            if results.is_empty() {
                return Err(format!("unknown synthetic case '{}'", case.unwrap_or_default()).into());
            }
            persist::write_jsonl(&out, &results)?;
        }
        Commands::CacheExport { db, out } => {
            let path = db.unwrap_or_else(SqliteReplyCache::default_path);
            let cache = SqliteReplyCache::new(path)?;
            let rows = cache.export_jsonl(out).await?;
            println!("exported {rows} rows");
        }
        Commands::CachePrune {
            db,
            max_age_days,
            max_rows,
        } => {
            if max_age_days.is_none() && max_rows.is_none() {
                return Err("cache-prune requires --max-age-days and/or --max-rows".into());
            }
            let path = db.unwrap_or_else(SqliteReplyCache::default_path);
            let cache = SqliteReplyCache::new(path)?;
            let _lock = cache.lock_exclusive()?;
            let stats = cache.prune(max_age_days, max_rows).await?;
            println!(
                "pruned {} rows; {} rows remain",
                stats.deleted, stats.remaining
            );
        }
    }

    Ok(())
}
