//! modelflow CLI
//!
//! Subcommands for inspecting, splitting, evaluating, tuning and comparing
//! classification workflows. Flags override values read from `--config`.

use clap::{Args, Parser, Subcommand};
use colored::*;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

use crate::config::{PipelineConfig, Selection};
use crate::data::{initial_split, DataSource, Dataset, InitialSplit};
use crate::metrics::{Metric, MetricEstimate};
use crate::models::{format_params, ModelSpec, ParamSet, Tunable};
use crate::preprocessing::{Recipe, Selector};
use crate::resampling::{vfold_cv, Resamples};
use crate::tuning::{last_fit_with, tune_grid, Grid, GridSpec, LastFit, MetricSummary};
use crate::workflow::{Coefficient, Preprocessor, Workflow};
use crate::workflow_set::RankedResult;

// ─── Styling helpers ───────────────────────────────────────────────────────────

const W: usize = 58; // banner text width

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

/// Printed width of `s`, skipping ANSI colour sequences
fn visible_width(s: &str) -> usize {
    let mut in_escape = false;
    s.chars()
        .filter(|&c| match (in_escape, c) {
            (_, '\x1b') => {
                in_escape = true;
                false
            }
            (true, 'm') => {
                in_escape = false;
                false
            }
            (true, _) => false,
            (false, _) => true,
        })
        .count()
}

/// Boxed run banner: centred title lines, a rule, then key/value rows
struct Banner {
    title: Vec<String>,
    rows: Vec<(&'static str, String)>,
}

impl Banner {
    fn rule(left: char, right: char) {
        println!("  {}", dim(&format!("{}{}{}", left, "─".repeat(W + 3), right)));
    }

    fn line(content: &str, centred: bool) {
        let pad = W.saturating_sub(visible_width(content));
        let left = if centred { pad / 2 } else { 0 };
        println!(
            "  {}  {}{}{} {}",
            dim("│"),
            " ".repeat(left),
            content,
            " ".repeat(pad - left),
            dim("│")
        );
    }

    fn print(&self) {
        let key_width = self.rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        Self::rule('┌', '┐');
        Self::line("", false);
        for title in &self.title {
            Self::line(title, true);
        }
        Self::line("", false);
        Self::rule('├', '┤');
        Self::line("", false);
        for (key, value) in &self.rows {
            Self::line(&format!("{} {}", muted(&format!("{:<key_width$}", key)), value.white()), false);
        }
        Self::line("", false);
        Self::rule('└', '┘');
    }
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "NA".to_string(), |v| format!("{:.4}", v))
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "modelflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train, tune and evaluate tabular classification workflows")]
#[command(long_about = None)]
pub struct Cli {
    /// Print results as JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Data and split options shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct DataArgs {
    /// Pipeline config (JSON); flags below override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// CSV path or http(s) URL
    #[arg(short, long)]
    pub data: Option<String>,

    /// Outcome column
    #[arg(short, long)]
    pub outcome: Option<String>,

    /// Recode a 0/1 outcome to labels "0"/"1" with "1" as the event
    #[arg(long)]
    pub binary: bool,

    /// Level of the outcome treated as the event
    #[arg(long)]
    pub event_level: Option<String>,

    /// Column to stratify the split and folds on
    #[arg(long)]
    pub strata: Option<String>,

    /// Proportion of rows in the training set
    #[arg(long)]
    pub prop: Option<f64>,

    /// Seed for the split, folds and random grids
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Workflow options for `evaluate` and `tune`
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// Model: glm, tree or forest
    #[arg(short, long, default_value = "glm")]
    pub model: String,

    /// Predictor columns (default: every other column)
    #[arg(short, long, value_delimiter = ',')]
    pub predictors: Vec<String>,

    /// Numeric column expanded with an orthogonal polynomial
    #[arg(long)]
    pub poly: Option<String>,

    /// Fixed polynomial degree; tuned when omitted under `tune`
    #[arg(long)]
    pub degree: Option<i64>,

    /// Probability threshold for the event class
    #[arg(long)]
    pub threshold: Option<f64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect a dataset's columns and class balance
    Info {
        #[command(flatten)]
        data: DataArgs,
    },

    /// Show the train/test partition
    Split {
        #[command(flatten)]
        data: DataArgs,
    },

    /// Fit one workflow on the training set and score it on the test set
    Evaluate {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        model: ModelArgs,
    },

    /// Tune a workflow over cross-validation folds, then score the best candidate
    Tune {
        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        model: ModelArgs,

        /// Model parameters to tune (penalty, cost_complexity, tree_depth, min_n, mtry, trees)
        #[arg(short, long, value_delimiter = ',')]
        tune: Vec<String>,

        /// Number of folds
        #[arg(short = 'v', long)]
        folds: Option<usize>,

        /// Repeats of the folds
        #[arg(long)]
        repeats: Option<usize>,

        /// Values per parameter of a regular grid
        #[arg(long, default_value = "3")]
        levels: usize,

        /// Size of a random grid (overrides --levels)
        #[arg(long)]
        random: Option<usize>,

        /// Metric used to pick the best candidate
        #[arg(long)]
        metric: Option<Metric>,

        /// Candidates shown in the leaderboard
        #[arg(short = 'n', long, default_value = "5")]
        top: usize,
    },

    /// Resample every workflow of a config and rank them
    Compare {
        #[command(flatten)]
        data: DataArgs,

        /// Number of folds
        #[arg(short = 'v', long)]
        folds: Option<usize>,

        /// Ranking metric
        #[arg(long)]
        metric: Option<Metric>,
    },

    /// Full pipeline from a config: compare, finalize the winner, score the test set
    Run {
        #[command(flatten)]
        data: DataArgs,
    },
}

// ─── Config resolution ─────────────────────────────────────────────────────────

/// Config file (if any) with the command-line flags applied on top
pub fn resolve_config(args: &DataArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => {
            let (Some(data), Some(outcome)) = (&args.data, &args.outcome) else {
                anyhow::bail!("--data and --outcome are required without --config");
            };
            PipelineConfig::new(data.clone(), outcome.clone())
        }
    };

    if let Some(data) = &args.data {
        config.data.source = data.clone();
    }
    if let Some(outcome) = &args.outcome {
        config.data.outcome = outcome.clone();
    }
    if args.binary {
        config = config.with_binary_outcome();
    }
    if let Some(level) = &args.event_level {
        config = config.with_event_level(level.clone());
    }
    if let Some(strata) = &args.strata {
        config = config.with_strata(strata.clone());
    }
    if let Some(prop) = args.prop {
        config = config.with_prop(prop);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    config.validate()?;
    Ok(config)
}

/// Load the configured source and apply the outcome recoding
pub async fn load_dataset(config: &PipelineConfig) -> anyhow::Result<Dataset> {
    let source = DataSource::parse(&config.data.source);
    let data = source.load(&config.load_options()).await?;
    Ok(match &config.data.recode {
        Some(mapping) => data.recode_outcome(&config.data.outcome, mapping)?,
        None => data,
    })
}

fn split_data(config: &PipelineConfig, data: &Dataset) -> anyhow::Result<InitialSplit> {
    Ok(initial_split(
        data,
        config.split.prop,
        config.split.strata.as_deref(),
        config.split.seed,
    )?)
}

/// `--folds`/`--repeats` on top of the configured resampling
fn with_fold_overrides(config: PipelineConfig, folds: Option<usize>, repeats: Option<usize>) -> PipelineConfig {
    let v = folds.unwrap_or(config.resampling.v);
    let repeats = repeats.unwrap_or(config.resampling.repeats);
    config.with_folds(v, repeats)
}

fn fold_data(config: &PipelineConfig, training: &Dataset) -> anyhow::Result<Resamples> {
    Ok(vfold_cv(
        training,
        config.resampling.v,
        config.resampling.repeats,
        config.resampling.strata.as_deref(),
        config.resampling.seed,
    )?)
}

fn model_spec(name: &str, seed: u64) -> anyhow::Result<ModelSpec> {
    Ok(match name {
        "glm" | "logistic" | "logistic_reg" => ModelSpec::logistic_reg(),
        "tree" | "decision_tree" => ModelSpec::decision_tree(),
        "forest" | "rf" | "rand_forest" => ModelSpec::rand_forest().with_seed(seed),
        other => anyhow::bail!("unknown model '{}' (expected glm, tree or forest)", other),
    })
}

/// Workflow described by the model flags. `tune_degree` turns an unset
/// `--degree` into a tuning id.
fn build_workflow(config: &PipelineConfig, args: &ModelArgs, tune: &[String], tune_degree: bool) -> anyhow::Result<Workflow> {
    let outcome = config.data.outcome.as_str();
    let mut spec = model_spec(&args.model, config.split.seed)?;
    for name in tune {
        spec = spec.tune(name);
    }
    spec.validate()?;

    let preprocessor: Preprocessor = match &args.poly {
        None => Preprocessor::formula(outcome, args.predictors.as_slice()),
        Some(column) => {
            let degree: Tunable<i64> = match args.degree {
                Some(d) => Tunable::Fixed(d),
                None if tune_degree => Tunable::tune("degree"),
                None => Tunable::Fixed(2),
            };
            let mut recipe = Recipe::new(outcome);
            if !args.predictors.is_empty() {
                recipe = recipe.with_predictors(args.predictors.as_slice());
            }
            recipe
                .step_dummy(Selector::AllNominalPredictors)
                .step_poly(Selector::names(&[column]), degree)
                .into()
        }
    };

    let workflow = Workflow::new(preprocessor, spec);
    Ok(match &config.data.event_level {
        Some(level) => workflow.with_event_level(level.clone()),
        None => workflow,
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ─── Reports ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ColumnReport {
    name: String,
    dtype: String,
    nulls: usize,
    unique: usize,
}

#[derive(Serialize)]
struct InfoReport {
    source: String,
    rows: usize,
    columns: Vec<ColumnReport>,
    class_counts: Option<std::collections::BTreeMap<String, usize>>,
}

#[derive(Serialize)]
struct SplitReport {
    seed: u64,
    prop: f64,
    strata: Option<String>,
    train: usize,
    test: usize,
    train_counts: std::collections::BTreeMap<String, usize>,
    test_counts: std::collections::BTreeMap<String, usize>,
}

#[derive(Serialize)]
struct EvaluationReport<'a> {
    workflow: String,
    params: Option<&'a ParamSet>,
    threshold: f64,
    metrics: &'a [MetricEstimate],
    confusion: &'a crate::metrics::ConfusionMatrix,
    coefficients: Option<Vec<Coefficient>>,
    importance: Option<Vec<(String, f64)>>,
}

#[derive(Serialize)]
struct TuneReport<'a> {
    metric: Metric,
    leaderboard: Vec<MetricSummary>,
    selected: &'a ParamSet,
    evaluation: EvaluationReport<'a>,
}

#[derive(Serialize)]
struct RunReport<'a> {
    ranking: &'a [RankedResult],
    winner: &'a str,
    evaluation: EvaluationReport<'a>,
}

fn evaluation_report<'a>(workflow: &Workflow, params: Option<&'a ParamSet>, result: &'a LastFit) -> EvaluationReport<'a> {
    EvaluationReport {
        workflow: workflow.to_string(),
        params,
        threshold: result.threshold(),
        metrics: result.metrics(),
        confusion: result.confusion(),
        coefficients: result.fitted().coefficients(),
        importance: result.fitted().variable_importance(),
    }
}

fn print_class_counts(title: &str, counts: &std::collections::BTreeMap<String, usize>) {
    let total: usize = counts.values().sum();
    println!("  {}", muted(title));
    for (level, count) in counts {
        let share = if total > 0 { *count as f64 / total as f64 } else { 0.0 };
        println!("    {:<16} {:>8} {:>8}", level, count, dim(&format!("{:.1}%", share * 100.0)));
    }
}

fn print_metrics(metrics: &[MetricEstimate]) {
    println!("  {:<16} {:<12} {:>10}", muted("Metric"), muted("Estimator"), muted("Estimate"));
    println!("  {}", dim(&"─".repeat(40)));
    for m in metrics {
        println!("  {:<16} {:<12} {:>10}", m.metric.name(), m.estimator, fmt_opt(m.estimate).white().bold());
    }
}

fn print_evaluation(report: &EvaluationReport<'_>) {
    section("Test set");
    print_metrics(report.metrics);

    section("Confusion matrix");
    for line in report.confusion.to_string().lines() {
        println!("  {}", line);
    }

    if let Some(coefficients) = &report.coefficients {
        section("Coefficients");
        println!(
            "  {:<16} {:>10} {:>10} {:>8} {:>9}",
            muted("Term"),
            muted("Estimate"),
            muted("Std. err"),
            muted("z"),
            muted("p")
        );
        println!("  {}", dim(&"─".repeat(56)));
        for c in coefficients {
            println!(
                "  {:<16} {:>10.4} {:>10} {:>8} {:>9}",
                c.term,
                c.estimate,
                fmt_opt(c.std_error),
                c.statistic.map_or_else(|| "NA".to_string(), |z| format!("{:.2}", z)),
                c.p_value.map_or_else(|| "NA".to_string(), |p| format!("{:.2e}", p))
            );
        }
    }

    if let Some(importance) = &report.importance {
        section("Variable importance");
        let max = importance.first().map_or(0.0, |(_, v)| *v);
        for (name, value) in importance {
            let bar = if max > 0.0 { ((value / max) * 24.0).round() as usize } else { 0 };
            println!("  {:<20} {:>8.4} {}", name, value, accent(&"▇".repeat(bar)));
        }
    }
    println!();
}

fn print_leaderboard(rows: &[MetricSummary]) {
    println!("  {:<4} {:<28} {:>10} {:>10} {:>4}", muted("#"), muted("Parameters"), muted("Mean"), muted("Std err"), muted("n"));
    println!("  {}", dim(&"─".repeat(60)));
    for (i, row) in rows.iter().enumerate() {
        println!(
            "  {:<4} {:<28} {:>10} {:>10} {:>4}",
            i + 1,
            format_params(&row.params),
            fmt_opt(row.mean),
            fmt_opt(row.std_err),
            row.n
        );
    }
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_info(args: &DataArgs, json: bool) -> anyhow::Result<()> {
    let config = resolve_config(args)?;
    let data = load_dataset(&config).await?;

    let frame = data.frame();
    let columns: Vec<ColumnReport> = frame
        .get_columns()
        .iter()
        .map(|col| ColumnReport {
            name: col.name().to_string(),
            dtype: format!("{:?}", col.dtype()),
            nulls: col.null_count(),
            unique: col.n_unique().unwrap_or(0),
        })
        .collect();
    let class_counts = if data.has_column(&config.data.outcome) {
        Some(data.class_counts(&config.data.outcome)?)
    } else {
        None
    };
    let report = InfoReport {
        source: config.data.source.clone(),
        rows: data.n_rows(),
        columns,
        class_counts,
    };
    if json {
        return print_json(&report);
    }

    section("Data Info");
    println!("  {:<12} {}", muted("Source"), report.source);
    println!("  {:<12} {}", muted("Rows"), report.rows);
    println!("  {:<12} {}", muted("Columns"), report.columns.len());
    println!();

    println!("  {:<20} {:<12} {:>6} {:>8}", muted("Column"), muted("Type"), muted("Nulls"), muted("Unique"));
    println!("  {}", dim(&"─".repeat(50)));
    for col in &report.columns {
        println!(
            "  {:<20} {:<12} {:>6} {:>8}",
            col.name,
            col.dtype.truecolor(140, 140, 140),
            col.nulls,
            col.unique
        );
    }

    if let Some(counts) = &report.class_counts {
        section("Outcome");
        print_class_counts(&config.data.outcome, counts);
    }
    println!();
    Ok(())
}

pub async fn cmd_split(args: &DataArgs, json: bool) -> anyhow::Result<()> {
    let config = resolve_config(args)?;
    let data = load_dataset(&config).await?;
    let split = split_data(&config, &data)?;
    let outcome = &config.data.outcome;

    let report = SplitReport {
        seed: split.seed(),
        prop: config.split.prop,
        strata: split.strata().map(str::to_string),
        train: split.train_indices().len(),
        test: split.test_indices().len(),
        train_counts: split.training()?.class_counts(outcome)?,
        test_counts: split.testing()?.class_counts(outcome)?,
    };
    if json {
        return print_json(&report);
    }

    section("Split");
    println!("  {:<12} {}", muted("Rows"), data.n_rows());
    println!("  {:<12} {}", muted("Training"), report.train);
    println!("  {:<12} {}", muted("Testing"), report.test);
    println!("  {:<12} {}", muted("Strata"), report.strata.as_deref().unwrap_or("none"));
    println!("  {:<12} {}", muted("Seed"), report.seed);
    println!();
    print_class_counts("training", &report.train_counts);
    print_class_counts("testing", &report.test_counts);
    println!();
    Ok(())
}

pub async fn cmd_evaluate(args: &DataArgs, model: &ModelArgs, json: bool) -> anyhow::Result<()> {
    let config = resolve_config(args)?;
    let threshold = model.threshold.unwrap_or(config.threshold);
    let workflow = build_workflow(&config, model, &[], false)?;

    if !json {
        section("Evaluate");
        step_run("Loading data");
    }
    let data = load_dataset(&config).await?;
    let split = split_data(&config, &data)?;
    if !json {
        step_done(&format!("{} train / {} test", split.train_indices().len(), split.test_indices().len()));
        step_run(&format!("Fitting {}", workflow));
    }

    let start = Instant::now();
    let result = last_fit_with(&workflow, &split, &config.metric_set(), threshold)?;
    let report = evaluation_report(&workflow, None, &result);
    if json {
        return print_json(&report);
    }
    step_done(&format!("{:.2?}", start.elapsed()));
    print_evaluation(&report);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_tune(
    args: &DataArgs,
    model: &ModelArgs,
    tune: &[String],
    folds: Option<usize>,
    repeats: Option<usize>,
    levels: usize,
    random: Option<usize>,
    metric: Option<Metric>,
    top: usize,
    json: bool,
) -> anyhow::Result<()> {
    let mut config = resolve_config(args)?;
    if folds.is_some() || repeats.is_some() {
        config = with_fold_overrides(config, folds, repeats);
    }
    if let Some(metric) = metric {
        config.metrics.retain(|m| *m != metric);
        config.metrics.insert(0, metric);
        config = config.with_rank_metric(metric);
    }
    config.validate()?;
    let metric = config.primary_metric()?;
    let threshold = model.threshold.unwrap_or(config.threshold);

    let workflow = build_workflow(&config, model, tune, true)?;
    if !workflow.is_tunable() {
        anyhow::bail!("nothing to tune: pass --tune or --poly without --degree");
    }
    let grid = match random {
        Some(size) => Grid::Random { size, seed: config.split.seed },
        None => Grid::Regular { levels },
    };
    let grid = GridSpec { grid, ranges: config.grid.ranges.clone() };

    if !json {
        section("Tune");
        step_run("Loading data");
    }
    let data = load_dataset(&config).await?;
    let split = split_data(&config, &data)?;
    let training = split.training()?;
    let resamples = fold_data(&config, &training)?;
    if !json {
        step_done(&format!("{} train / {} folds", training.n_rows(), resamples.len()));
        step_run(&format!("Tuning {}", workflow));
    }

    let start = Instant::now();
    let control = config.control().with_threshold(threshold);
    let tuned = tune_grid(&workflow, &resamples, &grid, &config.metric_set(), &control)?;
    let leaderboard = tuned.show_best(metric, top)?;
    let selected = match config.selection {
        Selection::Best => tuned.select_best(metric)?,
        Selection::OneStdErr => tuned.select_by_one_std_err(metric)?,
    };
    if !json {
        step_done(&format!("{} candidates in {:.2?}", tuned.candidates().len(), start.elapsed()));
    }

    let final_workflow = workflow.finalize(&selected)?;
    let result = last_fit_with(&final_workflow, &split, &config.metric_set(), threshold)?;
    let report = TuneReport {
        metric,
        leaderboard,
        selected: &selected,
        evaluation: evaluation_report(&final_workflow, Some(&selected), &result),
    };
    if json {
        return print_json(&report);
    }

    section(&format!("Best candidates by {}", metric));
    print_leaderboard(&report.leaderboard);
    println!();
    println!("  {} {}", ok("selected"), format_params(&selected).white().bold());
    print_evaluation(&report.evaluation);
    Ok(())
}

pub async fn cmd_compare(args: &DataArgs, folds: Option<usize>, metric: Option<Metric>, json: bool) -> anyhow::Result<()> {
    let mut config = resolve_config(args)?;
    if folds.is_some() {
        config = with_fold_overrides(config, folds, None);
    }
    if let Some(metric) = metric {
        if !config.metrics.contains(&metric) {
            config.metrics.push(metric);
        }
        config = config.with_rank_metric(metric);
    }
    config.validate()?;
    let metric = config.primary_metric()?;

    let data = load_dataset(&config).await?;
    let split = split_data(&config, &data)?;
    let resamples = fold_data(&config, &split.training()?)?;

    let mut set = config.workflow_set()?;
    if !json {
        section("Compare");
        step_run(&format!("Resampling {} workflows", set.len()));
    }
    let start = Instant::now();
    set.workflow_map(&resamples, &config.grid, &config.metric_set(), &config.control())?;
    let ranking = set.rank_results(metric)?;
    if json {
        return print_json(&ranking);
    }
    step_done(&format!("{:.2?}", start.elapsed()));
    print_ranking(metric, &ranking);
    println!();
    Ok(())
}

fn print_ranking(metric: Metric, ranking: &[RankedResult]) {
    section(&format!("Ranking by {}", metric));
    println!(
        "  {:<4} {:<22} {:<14} {:>8} {:>8}  {}",
        muted("#"),
        muted("Workflow"),
        muted("Model"),
        muted("Mean"),
        muted("Std err"),
        muted("Parameters")
    );
    println!("  {}", dim(&"─".repeat(70)));
    for row in ranking {
        println!(
            "  {:<4} {:<22} {:<14} {:>8} {:>8}  {}",
            row.rank,
            row.wflow_id,
            row.model,
            fmt_opt(row.mean),
            fmt_opt(row.std_err),
            dim(&format_params(&row.params))
        );
    }
}

pub async fn cmd_run(args: &DataArgs, json: bool) -> anyhow::Result<()> {
    let config = resolve_config(args)?;
    let metric = config.primary_metric()?;

    if !json {
        println!();
        Banner {
            title: vec![
                "modelflow".white().bold().to_string(),
                dim(&format!("v{}", env!("CARGO_PKG_VERSION"))).to_string(),
            ],
            rows: vec![
                ("Data", config.data.source.clone()),
                ("Outcome", config.data.outcome.clone()),
                ("Folds", format!("{} x {}", config.resampling.v, config.resampling.repeats)),
                ("Metric", metric.name().to_string()),
            ],
        }
        .print();
        println!();
        step_run("Loading data");
    }

    let data = load_dataset(&config).await?;
    let split = split_data(&config, &data)?;
    let training = split.training()?;
    let resamples = fold_data(&config, &training)?;
    if !json {
        step_done(&format!("{} rows, {} train, {} folds", data.n_rows(), training.n_rows(), resamples.len()));
    }

    let mut set = config.workflow_set()?;
    if !json {
        step_run(&format!("Resampling {} workflows", set.len()));
    }
    let start = Instant::now();
    set.workflow_map(&resamples, &config.grid, &config.metric_set(), &config.control())?;
    let ranking = set.rank_results(metric)?;
    if !json {
        step_done(&format!("{:.2?}", start.elapsed()));
    }

    let Some(winner) = ranking.first() else {
        anyhow::bail!("no workflows to compare");
    };
    let result = set.extract_result(&winner.wflow_id)?;
    let selected = match config.selection {
        Selection::Best => result.select_best(metric)?,
        Selection::OneStdErr => result.select_by_one_std_err(metric)?,
    };
    let final_workflow = set.extract_workflow(&winner.wflow_id)?.finalize(&selected)?;
    let fitted = last_fit_with(&final_workflow, &split, &config.metric_set(), config.threshold)?;

    let report = RunReport {
        ranking: &ranking,
        winner: &winner.wflow_id,
        evaluation: evaluation_report(&final_workflow, Some(&selected), &fitted),
    };
    if json {
        return print_json(&report);
    }

    print_ranking(metric, &ranking);
    println!();
    println!(
        "  {} {} {}",
        ok("best"),
        winner.wflow_id.white().bold(),
        muted(&format_params(&selected))
    );
    print_evaluation(&report.evaluation);
    Ok(())
}
