use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use modelflow::data::Dataset;
use modelflow::metrics::MetricSet;
use modelflow::models::{ModelSpec, Tunable};
use modelflow::preprocessing::{Recipe, Selector};
use modelflow::resampling::vfold_cv;
use modelflow::tuning::{tune_grid, Control, Grid, GridSpec};
use modelflow::workflow::{Preprocessor, Workflow};
use polars::prelude::*;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn create_classification_data(n_rows: usize, n_features: usize) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let features: Vec<Vec<f64>> = (0..n_features)
        .map(|_| (0..n_rows).map(|_| rng.gen::<f64>() * 10.0 - 5.0).collect())
        .collect();

    // Outcome depends on the square of the first feature
    let outcome: Vec<&str> = features[0]
        .iter()
        .map(|x| if x * x + rng.gen::<f64>() * 4.0 > 10.0 { "yes" } else { "no" })
        .collect();

    let mut columns: Vec<Column> = features
        .into_iter()
        .enumerate()
        .map(|(i, values)| Column::new(format!("feature_{}", i).into(), values))
        .collect();
    columns.push(Column::new("outcome".into(), outcome));

    Dataset::new(DataFrame::new(columns).unwrap()).unwrap()
}

fn bench_tune_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("tune_grid");
    group.sample_size(10); // Fewer samples for tuning benchmarks

    let recipe = Recipe::new("outcome").step_poly(Selector::names(&["feature_0"]), Tunable::tune("degree"));
    let workflow = Workflow::new(recipe, ModelSpec::logistic_reg().tune("penalty")).with_event_level("yes");
    let grid = GridSpec::new(Grid::Regular { levels: 3 });
    let metrics = MetricSet::default();

    for n_rows in [500, 2000].iter() {
        let data = create_classification_data(*n_rows, 5);
        let folds = vfold_cv(&data, 5, 1, Some("outcome"), 1).unwrap();

        for parallel in [false, true] {
            let label = if parallel { "parallel" } else { "sequential" };
            let control = Control::default().with_parallel(parallel);
            group.bench_with_input(BenchmarkId::new(label, n_rows), &folds, |b, folds| {
                b.iter(|| tune_grid(&workflow, black_box(folds), &grid, &metrics, &control).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_forest_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("forest_fit");
    group.sample_size(10);

    for n_rows in [1000, 5000].iter() {
        let data = create_classification_data(*n_rows, 10);
        let workflow = Workflow::new(
            Preprocessor::formula::<&str>("outcome", &[]),
            ModelSpec::rand_forest().with_param("trees", 100i64).with_seed(3),
        )
        .with_event_level("yes");

        group.bench_with_input(BenchmarkId::new("fit", n_rows), &data, |b, data| {
            b.iter(|| workflow.fit(black_box(data)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tune_grid, bench_forest_fit);
criterion_main!(benches);
