//! Integration test: Full pipeline (load → split → tune → compare → last fit)

use modelflow::cli::{load_dataset, resolve_config, DataArgs};
use modelflow::config::{Pairing, PipelineConfig};
use modelflow::data::{initial_split, read_csv, Dataset, LoadOptions};
use modelflow::metrics::{Metric, MetricSet};
use modelflow::models::{ModelSpec, ParamValue, Tunable};
use modelflow::preprocessing::{Recipe, Selector};
use modelflow::resampling::vfold_cv;
use modelflow::tuning::{last_fit, tune_grid, Control, Grid, GridSpec, ParamRange};
use modelflow::workflow::{Preprocessor, Workflow};
use modelflow::workflow_set::WorkflowSet;
use polars::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::io::Write;

/// Severity is likelier for the very young and the old
fn create_severity_frame(n: usize, seed: u64) -> DataFrame {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut age = Vec::with_capacity(n);
    let mut sex = Vec::with_capacity(n);
    let mut severe = Vec::with_capacity(n);

    for _ in 0..n {
        let a: f64 = rng.gen_range(1.0..80.0);
        let centred = (a - 40.0) / 20.0;
        let p = 1.0 / (1.0 + (-(2.5 * centred * centred - 1.5)).exp());
        age.push(a.round());
        sex.push(if rng.gen_bool(0.5) { "female" } else { "male" });
        severe.push(i32::from(rng.gen_bool(p)));
    }

    df!(
        "age" => &age,
        "sex" => &sex,
        "severe" => &severe
    )
    .unwrap()
}

fn recoded(df: DataFrame) -> Dataset {
    let mapping: BTreeMap<String, String> = [("0", "0"), ("1", "1")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Dataset::new(df).unwrap().recode_outcome("severe", &mapping).unwrap()
}

#[test]
fn test_formula_workflow_pipeline() {
    let data = recoded(create_severity_frame(240, 1));
    let split = initial_split(&data, 0.75, Some("severe"), 42).unwrap();
    let train = split.training().unwrap();

    let workflow = Workflow::new(Preprocessor::formula("severe", &["age", "sex"]), ModelSpec::logistic_reg())
        .with_event_level("1");
    let fitted = workflow.fit(&train).unwrap();

    let augmented = fitted.augment(&train).unwrap();
    assert_eq!(augmented.n_rows(), train.n_rows());
    assert!(augmented.has_column(".pred_class"));
    assert!(augmented.has_column(".pred_1"));
    assert_eq!(augmented.categorical("severe").unwrap(), train.categorical("severe").unwrap());

    let coefficients = fitted.coefficients().unwrap();
    assert_eq!(coefficients[0].term, "(Intercept)");
    assert_eq!(coefficients.len(), 1 + fitted.predictors().len());
}

#[test]
fn test_tune_polynomial_degree_then_last_fit() {
    let data = recoded(create_severity_frame(300, 2));
    let split = initial_split(&data, 0.75, Some("severe"), 7).unwrap();
    let folds = vfold_cv(&split.training().unwrap(), 5, 1, Some("severe"), 7).unwrap();

    let recipe = Recipe::new("severe")
        .with_predictors(&["age"])
        .step_poly(Selector::names(&["age"]), Tunable::tune("degree"));
    let workflow = Workflow::new(recipe, ModelSpec::logistic_reg()).with_event_level("1");
    let metrics = MetricSet::new(vec![Metric::RocAuc, Metric::Accuracy, Metric::BrierClass]);

    let grid = GridSpec::new(Grid::Regular { levels: 3 }).with_range(ParamRange::int("degree", 1, 3));
    let tuned = tune_grid(&workflow, &folds, &grid, &metrics, &Control::default()).unwrap();
    assert_eq!(tuned.candidates().len(), 3);
    assert_eq!(tuned.collect_metrics().len(), 9);
    assert!(tuned.collect_metrics().iter().all(|s| s.n == 5));

    let best = tuned.select_best(Metric::RocAuc).unwrap();
    // a U-shaped risk needs at least a quadratic term
    assert_ne!(best["degree"], ParamValue::Int(1));

    let leaderboard = tuned.show_best(Metric::RocAuc, 2).unwrap();
    assert_eq!(leaderboard.len(), 2);
    assert_eq!(leaderboard[0].params, best);

    let final_workflow = workflow.finalize(&best).unwrap();
    let result = last_fit(&final_workflow, &split, &metrics).unwrap();
    assert_eq!(result.predictions().len(), split.test_indices().len());
    let auc = result.metrics().iter().find(|m| m.metric == Metric::RocAuc).unwrap();
    assert!(auc.estimate.unwrap() > 0.6);
}

#[test]
fn test_workflow_set_ranks_every_pair() {
    let data = recoded(create_severity_frame(200, 3));
    let split = initial_split(&data, 0.75, Some("severe"), 9).unwrap();
    let folds = vfold_cv(&split.training().unwrap(), 4, 1, Some("severe"), 9).unwrap();

    let mut set = WorkflowSet::cross(
        vec![
            ("formula".to_string(), Preprocessor::formula("severe", &["age"])),
            (
                "poly".to_string(),
                Recipe::new("severe")
                    .with_predictors(&["age"])
                    .step_poly(Selector::names(&["age"]), 2i64)
                    .into(),
            ),
        ],
        vec![
            ("glm".to_string(), ModelSpec::logistic_reg()),
            ("tree".to_string(), ModelSpec::decision_tree().tune("cost_complexity")),
        ],
    )
    .unwrap()
    .with_event_level("1");

    let grid = GridSpec::new(Grid::Regular { levels: 2 });
    set.workflow_map(&folds, &grid, &MetricSet::default(), &Control::default().with_parallel(false))
        .unwrap();

    let ranked = set.rank_results(Metric::RocAuc).unwrap();
    assert_eq!(ranked.len(), 4);
    let ranks: Vec<usize> = ranked.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    for pair in ranked.windows(2) {
        assert!(pair[0].mean.unwrap_or(f64::NEG_INFINITY) >= pair[1].mean.unwrap_or(f64::NEG_INFINITY));
    }
    assert_eq!(set.extract_result("poly_tree").unwrap().candidates().len(), 2);
}

#[test]
fn test_parallel_and_sequential_tuning_agree() {
    let data = recoded(create_severity_frame(160, 4));
    let folds = vfold_cv(&data, 4, 1, None, 3).unwrap();
    let workflow = Workflow::new(
        Preprocessor::formula("severe", &["age", "sex"]),
        ModelSpec::rand_forest().with_param("trees", 25i64).tune("min_n").with_seed(5),
    )
    .with_event_level("1");
    let grid = GridSpec::new(Grid::Random { size: 3, seed: 11 });

    let metrics = MetricSet::default();
    let parallel = tune_grid(&workflow, &folds, &grid, &metrics, &Control::default()).unwrap();
    let sequential = tune_grid(&workflow, &folds, &grid, &metrics, &Control::default().with_parallel(false)).unwrap();
    assert_eq!(parallel.collect_metrics(), sequential.collect_metrics());
}

#[test]
fn test_config_driven_load_from_csv() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("severity.csv");
    let mut df = create_severity_frame(80, 5);
    let mut file = std::fs::File::create(&csv_path).unwrap();
    CsvWriter::new(&mut file).finish(&mut df).unwrap();
    file.flush().unwrap();

    let raw = read_csv(&csv_path, &LoadOptions::default()).unwrap();
    assert_eq!(raw.n_rows(), 80);

    let config_path = dir.path().join("run.json");
    PipelineConfig::new(csv_path.display().to_string(), "severe")
        .with_binary_outcome()
        .with_strata("severe")
        .with_pairing(Pairing::Paired)
        .with_preprocessor("formula", Preprocessor::formula("severe", &["age", "sex"]))
        .with_model("glm", ModelSpec::logistic_reg())
        .save(&config_path)
        .unwrap();

    let args = DataArgs {
        config: Some(config_path),
        seed: Some(13),
        ..DataArgs::default()
    };
    let config = resolve_config(&args).unwrap();
    assert_eq!(config.split.seed, 13);

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let data = runtime.block_on(load_dataset(&config)).unwrap();
    assert_eq!(data.labels("severe").unwrap().len(), 80);
    assert_eq!(config.workflow_set().unwrap().ids(), vec!["formula_glm"]);
}
