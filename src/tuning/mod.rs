//! Grid tuning over resamples
//!
//! Every (candidate, resample) pair is fitted and scored independently, in
//! parallel when [`Control::parallel`] is set. Results are keyed by
//! candidate index and resample id and reduced into per-candidate
//! summaries afterwards, so the outcome does not depend on scheduling.

pub mod grid;
pub mod last_fit;

pub use grid::{random_grid, regular_grid, Grid, GridSpec, ParamRange, Scale};
pub use last_fit::{last_fit, last_fit_with, LastFit};

use crate::data::Dataset;
use crate::error::{FlowError, Result};
use crate::metrics::{Direction, Metric, MetricEstimate, MetricSet};
use crate::models::{compare_param_sets, ParamSet};
use crate::resampling::{Resample, Resamples};
use crate::workflow::{Predictions, Workflow, DEFAULT_THRESHOLD};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Instant;
use tracing::{debug, info};

/// Values closer than this are ties in candidate selection
const TIE_TOLERANCE: f64 = 1e-12;

/// Execution options for tuning and resampled fits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    /// Fan (candidate, resample) fits out over the rayon pool
    pub parallel: bool,
    /// Event probability cut-off for hard-class metrics
    pub threshold: f64,
    /// Keep the assessment-set predictions of every fit
    pub save_predictions: bool,
}

impl Default for Control {
    fn default() -> Self {
        Self {
            parallel: true,
            threshold: DEFAULT_THRESHOLD,
            save_predictions: false,
        }
    }
}

impl Control {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_save_predictions(mut self, save: bool) -> Self {
        self.save_predictions = save;
        self
    }
}

/// One metric of one candidate on one resample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldMetric {
    pub candidate: usize,
    pub resample: String,
    pub metric: Metric,
    pub estimator: String,
    pub estimate: Option<f64>,
}

/// One metric of one candidate averaged over resamples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub candidate: usize,
    pub params: ParamSet,
    pub metric: Metric,
    pub estimator: String,
    /// Mean of the defined estimates
    pub mean: Option<f64>,
    /// Number of defined estimates
    pub n: usize,
    /// `sd / sqrt(n)`, undefined below two estimates
    pub std_err: Option<f64>,
}

/// Assessment-set predictions of one fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldPredictions {
    pub candidate: usize,
    pub resample: String,
    /// Row indices into the resampled dataset
    pub rows: Vec<usize>,
    pub truth: Vec<usize>,
    pub predictions: Predictions,
}

/// Outcome of [`tune_grid`] or [`fit_resamples`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningResult {
    workflow: Workflow,
    candidates: Vec<ParamSet>,
    metrics: MetricSet,
    fold_metrics: Vec<FoldMetric>,
    summaries: Vec<MetricSummary>,
    predictions: Option<Vec<FoldPredictions>>,
}

impl TuningResult {
    /// The workflow that was tuned, placeholders intact
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn candidates(&self) -> &[ParamSet] {
        &self.candidates
    }

    pub fn metric_set(&self) -> &MetricSet {
        &self.metrics
    }

    /// Per-candidate summaries, candidate-major in metric-set order
    pub fn collect_metrics(&self) -> &[MetricSummary] {
        &self.summaries
    }

    /// Unsummarised rows, one per (candidate, resample, metric)
    pub fn fold_metrics(&self) -> &[FoldMetric] {
        &self.fold_metrics
    }

    /// Saved assessment predictions, if requested in [`Control`]
    pub fn collect_predictions(&self) -> Option<&[FoldPredictions]> {
        self.predictions.as_deref()
    }

    fn check_metric(&self, metric: Metric) -> Result<()> {
        if self.metrics.contains(metric) {
            Ok(())
        } else {
            Err(FlowError::invalid("metric", metric, "was not computed during tuning"))
        }
    }

    fn defined(&self, metric: Metric) -> Vec<(&MetricSummary, f64)> {
        self.summaries
            .iter()
            .filter(|s| s.metric == metric)
            .filter_map(|s| s.mean.map(|m| (s, m)))
            .collect()
    }

    /// The `n` best candidates for `metric`, best first. Candidates whose
    /// mean is undefined are listed last.
    pub fn show_best(&self, metric: Metric, n: usize) -> Result<Vec<MetricSummary>> {
        self.check_metric(metric)?;
        let mut rows: Vec<&MetricSummary> = self.summaries.iter().filter(|s| s.metric == metric).collect();
        let direction = metric.direction();
        rows.sort_by(|a, b| match (a.mean, b.mean) {
            (Some(x), Some(y)) => better_first(direction, x, y).then_with(|| compare_param_sets(&a.params, &b.params)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => compare_param_sets(&a.params, &b.params),
        });
        Ok(rows.into_iter().take(n).cloned().collect())
    }

    /// Summary row of the best candidate for `metric`
    pub fn best_summary(&self, metric: Metric) -> Result<&MetricSummary> {
        self.check_metric(metric)?;
        let defined = self.defined(metric);
        let best = defined
            .iter()
            .map(|(_, m)| *m)
            .reduce(|a, b| match metric.direction() {
                Direction::Maximize => a.max(b),
                Direction::Minimize => a.min(b),
            })
            .ok_or_else(|| FlowError::Metric(format!("no candidate has a defined {}", metric)))?;

        defined
            .into_iter()
            .filter(|(_, m)| (m - best).abs() <= TIE_TOLERANCE)
            .map(|(s, _)| s)
            .min_by(|a, b| compare_param_sets(&a.params, &b.params))
            .ok_or_else(|| FlowError::Metric(format!("no candidate has a defined {}", metric)))
    }

    /// Parameters of the best candidate. Ties go to the smallest parameter
    /// values, compared by parameter name in sorted order.
    pub fn select_best(&self, metric: Metric) -> Result<ParamSet> {
        Ok(self.best_summary(metric)?.params.clone())
    }

    /// Simplest candidate whose mean lies within one standard error of the best
    pub fn select_by_one_std_err(&self, metric: Metric) -> Result<ParamSet> {
        let best = self.best_summary(metric)?;
        let best_mean = best.mean.unwrap_or_default();
        let se = best.std_err.unwrap_or(0.0);
        let within = |m: f64| match metric.direction() {
            Direction::Maximize => m >= best_mean - se - TIE_TOLERANCE,
            Direction::Minimize => m <= best_mean + se + TIE_TOLERANCE,
        };
        self.defined(metric)
            .into_iter()
            .filter(|(_, m)| within(*m))
            .map(|(s, _)| s)
            .min_by(|a, b| compare_param_sets(&a.params, &b.params))
            .map(|s| s.params.clone())
            .ok_or_else(|| FlowError::Metric(format!("no candidate has a defined {}", metric)))
    }
}

fn better_first(direction: Direction, a: f64, b: f64) -> Ordering {
    match direction {
        Direction::Maximize => b.total_cmp(&a),
        Direction::Minimize => a.total_cmp(&b),
    }
}

struct FoldOutcome {
    estimates: Vec<MetricEstimate>,
    predictions: Option<FoldPredictions>,
}

fn fit_one(
    workflow: &Workflow,
    candidate: usize,
    split: &Resample,
    data: &Dataset,
    metrics: &MetricSet,
    control: &Control,
) -> Result<FoldOutcome> {
    let analysis = split.analysis(data)?;
    let assessment = split.assessment(data)?;
    let fitted = workflow.fit(&analysis)?;
    let predictions = fitted.predict(&assessment)?;
    let truth = fitted.truth(&assessment)?;
    let estimates = metrics.evaluate(&truth, &predictions, control.threshold)?;
    debug!(candidate, resample = %split.id, "resample scored");

    Ok(FoldOutcome {
        estimates,
        predictions: control.save_predictions.then(|| FoldPredictions {
            candidate,
            resample: split.id.clone(),
            rows: split.assessment_indices().to_vec(),
            truth,
            predictions,
        }),
    })
}

/// Fit and score every grid candidate on every resample.
///
/// The first failing fit, in (candidate, resample) order, is returned as
/// the error.
pub fn tune_grid(
    workflow: &Workflow,
    resamples: &Resamples,
    grid: &GridSpec,
    metrics: &MetricSet,
    control: &Control,
) -> Result<TuningResult> {
    let start = Instant::now();
    if metrics.is_empty() {
        return Err(FlowError::invalid("metrics", "[]", "at least one metric is required"));
    }
    if !(0.0..=1.0).contains(&control.threshold) {
        return Err(FlowError::invalid("threshold", control.threshold, "must lie in [0, 1]"));
    }
    if resamples.is_empty() {
        return Err(FlowError::invalid("resamples", 0, "no resamples to fit"));
    }

    let candidates = grid.candidates(workflow, resamples.data())?;
    let finalized = candidates
        .iter()
        .map(|c| workflow.finalize(c))
        .collect::<Result<Vec<_>>>()?;

    info!(
        candidates = candidates.len(),
        resamples = resamples.len(),
        parallel = control.parallel,
        "tuning started"
    );

    let tasks: Vec<(usize, usize)> = (0..candidates.len())
        .flat_map(|c| (0..resamples.len()).map(move |f| (c, f)))
        .collect();
    let run = |&(c, f): &(usize, usize)| {
        fit_one(&finalized[c], c, &resamples.splits()[f], resamples.data(), metrics, control)
    };
    let outcomes: Vec<Result<FoldOutcome>> = if control.parallel {
        tasks.par_iter().map(run).collect()
    } else {
        tasks.iter().map(run).collect()
    };
    let outcomes = outcomes.into_iter().collect::<Result<Vec<_>>>()?;

    let mut fold_metrics = Vec::with_capacity(outcomes.len() * metrics.metrics().len());
    let mut saved = control.save_predictions.then(Vec::new);
    for (&(c, f), outcome) in tasks.iter().zip(outcomes) {
        let resample = &resamples.splits()[f].id;
        fold_metrics.extend(outcome.estimates.into_iter().map(|e| FoldMetric {
            candidate: c,
            resample: resample.clone(),
            metric: e.metric,
            estimator: e.estimator,
            estimate: e.estimate,
        }));
        if let (Some(saved), Some(p)) = (saved.as_mut(), outcome.predictions) {
            saved.push(p);
        }
    }

    let summaries = summarise(&candidates, metrics, &fold_metrics);

    info!(
        candidates = candidates.len(),
        fits = tasks.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "tuning finished"
    );

    Ok(TuningResult {
        workflow: workflow.clone(),
        candidates,
        metrics: metrics.clone(),
        fold_metrics,
        summaries,
        predictions: saved,
    })
}

/// Resampled performance of a workflow without tuning ids
pub fn fit_resamples(
    workflow: &Workflow,
    resamples: &Resamples,
    metrics: &MetricSet,
    control: &Control,
) -> Result<TuningResult> {
    if let Some((id, _)) = workflow.tunable_params().into_iter().next() {
        return Err(FlowError::UnresolvedParameter(id));
    }
    tune_grid(
        workflow,
        resamples,
        &Grid::Explicit { candidates: vec![ParamSet::new()] }.into(),
        metrics,
        control,
    )
}

fn summarise(candidates: &[ParamSet], metrics: &MetricSet, rows: &[FoldMetric]) -> Vec<MetricSummary> {
    let mut summaries = Vec::with_capacity(candidates.len() * metrics.metrics().len());
    for (c, params) in candidates.iter().enumerate() {
        for &metric in metrics.metrics() {
            let matching: Vec<&FoldMetric> = rows.iter().filter(|r| r.candidate == c && r.metric == metric).collect();
            let values: Vec<f64> = matching.iter().filter_map(|r| r.estimate).collect();
            let n = values.len();
            let mean = (n > 0).then(|| values.iter().sum::<f64>() / n as f64);
            let std_err = match mean {
                Some(m) if n >= 2 => {
                    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64;
                    Some((var / n as f64).sqrt())
                }
                _ => None,
            };
            summaries.push(MetricSummary {
                candidate: c,
                params: params.clone(),
                metric,
                estimator: matching.first().map(|r| r.estimator.clone()).unwrap_or_default(),
                mean,
                n,
                std_err,
            });
        }
    }
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelSpec, ParamValue, Tunable};
    use crate::preprocessing::{Recipe, Selector};
    use crate::resampling::vfold_cv;
    use polars::prelude::*;

    fn summary(candidate: usize, key: &str, value: ParamValue, mean: Option<f64>, std_err: Option<f64>) -> MetricSummary {
        MetricSummary {
            candidate,
            params: [(key.to_string(), value)].into_iter().collect(),
            metric: Metric::RocAuc,
            estimator: "binary".to_string(),
            mean,
            n: 5,
            std_err,
        }
    }

    fn result_with(summaries: Vec<MetricSummary>, metrics: MetricSet) -> TuningResult {
        TuningResult {
            workflow: Workflow::new(Recipe::new("y"), ModelSpec::logistic_reg()),
            candidates: summaries.iter().map(|s| s.params.clone()).collect(),
            metrics,
            fold_metrics: Vec::new(),
            summaries,
            predictions: None,
        }
    }

    #[test]
    fn test_select_best_tie_goes_to_smaller_degree() {
        let result = result_with(
            vec![
                summary(0, "degree", ParamValue::Int(3), Some(0.8), Some(0.01)),
                summary(1, "degree", ParamValue::Int(2), Some(0.8), Some(0.01)),
                summary(2, "degree", ParamValue::Int(1), Some(0.7), Some(0.01)),
            ],
            MetricSet::new(vec![Metric::RocAuc]),
        );
        let best = result.select_best(Metric::RocAuc).unwrap();
        assert_eq!(best["degree"], ParamValue::Int(2));

        let shown = result.show_best(Metric::RocAuc, 2).unwrap();
        assert_eq!(shown.len(), 2);
        assert_eq!(shown[0].params["degree"], ParamValue::Int(2));
        assert_eq!(shown[1].params["degree"], ParamValue::Int(3));
    }

    #[test]
    fn test_minimize_direction_and_undefined_rows() {
        let mk = |c, v: i64, mean| MetricSummary {
            metric: Metric::BrierClass,
            ..summary(c, "min_n", ParamValue::Int(v), mean, None)
        };
        let result = result_with(
            vec![mk(0, 2, Some(0.20)), mk(1, 5, None), mk(2, 10, Some(0.15))],
            MetricSet::new(vec![Metric::BrierClass]),
        );
        assert_eq!(result.select_best(Metric::BrierClass).unwrap()["min_n"], ParamValue::Int(10));
        let shown = result.show_best(Metric::BrierClass, 5).unwrap();
        assert_eq!(shown.last().unwrap().mean, None);
        assert!(result.select_best(Metric::Accuracy).is_err());
    }

    #[test]
    fn test_one_std_err_prefers_simpler() {
        let result = result_with(
            vec![
                summary(0, "degree", ParamValue::Int(1), Some(0.78), Some(0.02)),
                summary(1, "degree", ParamValue::Int(2), Some(0.79), Some(0.02)),
                summary(2, "degree", ParamValue::Int(3), Some(0.80), Some(0.015)),
            ],
            MetricSet::new(vec![Metric::RocAuc]),
        );
        assert_eq!(result.select_best(Metric::RocAuc).unwrap()["degree"], ParamValue::Int(3));
        // 0.80 - 0.015 = 0.785: degree 2 qualifies, degree 1 does not
        assert_eq!(result.select_by_one_std_err(Metric::RocAuc).unwrap()["degree"], ParamValue::Int(2));
    }

    #[test]
    fn test_no_defined_values() {
        let result = result_with(
            vec![summary(0, "degree", ParamValue::Int(1), None, None)],
            MetricSet::new(vec![Metric::RocAuc]),
        );
        assert!(matches!(result.select_best(Metric::RocAuc), Err(FlowError::Metric(_))));
    }

    fn curved() -> Dataset {
        let n = 60;
        let x: Vec<f64> = (0..n).map(|i| i as f64 / 6.0 - 5.0).collect();
        let y: Vec<&str> = x
            .iter()
            .enumerate()
            .map(|(i, v)| if (v * v > 6.0) ^ (i % 11 == 0) { "1" } else { "0" })
            .collect();
        Dataset::new(df! { "x" => &x, "severe" => &y }.unwrap()).unwrap()
    }

    #[test]
    fn test_tune_grid_end_to_end() {
        let data = curved();
        let folds = vfold_cv(&data, 5, 1, Some("severe"), 1).unwrap();
        let recipe = Recipe::new("severe").step_poly(Selector::names(&["x"]), Tunable::tune("degree"));
        let wf = Workflow::new(recipe, ModelSpec::logistic_reg()).with_event_level("1");
        let metrics = MetricSet::new(vec![Metric::RocAuc, Metric::Accuracy]);

        let result = tune_grid(&wf, &folds, &Grid::Regular { levels: 3 }.into(), &metrics, &Control::default()).unwrap();
        assert_eq!(result.candidates().len(), 3);
        assert_eq!(result.fold_metrics().len(), 3 * 5 * 2);
        assert_eq!(result.collect_metrics().len(), 3 * 2);

        // the outcome depends on x squared, so a quadratic term must win
        let best = result.select_best(Metric::RocAuc).unwrap();
        assert!(best["degree"].as_i64().unwrap() >= 2);

        let sequential = tune_grid(
            &wf,
            &folds,
            &Grid::Regular { levels: 3 }.into(),
            &metrics,
            &Control::default().with_parallel(false),
        )
        .unwrap();
        assert_eq!(result.collect_metrics(), sequential.collect_metrics());
    }

    #[test]
    fn test_fit_resamples_and_saved_predictions() {
        let data = curved();
        let folds = vfold_cv(&data, 4, 1, None, 3).unwrap();
        let wf = Workflow::new(Recipe::new("severe"), ModelSpec::decision_tree());
        let result = fit_resamples(
            &wf,
            &folds,
            &MetricSet::default(),
            &Control::default().with_save_predictions(true),
        )
        .unwrap();
        assert_eq!(result.candidates(), &[ParamSet::new()]);
        let saved = result.collect_predictions().unwrap();
        assert_eq!(saved.len(), 4);
        assert_eq!(saved.iter().map(|p| p.rows.len()).sum::<usize>(), 60);

        let tunable = Workflow::new(Recipe::new("severe"), ModelSpec::decision_tree().tune("tree_depth"));
        assert!(matches!(
            fit_resamples(&tunable, &folds, &MetricSet::default(), &Control::default()),
            Err(FlowError::UnresolvedParameter(_))
        ));
    }

    #[test]
    fn test_fit_errors_propagate() {
        let data = curved();
        let folds = vfold_cv(&data, 3, 1, None, 3).unwrap();
        // degree 45 needs more distinct values than an analysis set holds
        let wf = Workflow::new(
            Recipe::new("severe").step_poly(Selector::names(&["x"]), 45),
            ModelSpec::logistic_reg(),
        );
        let err = fit_resamples(&wf, &folds, &MetricSet::default(), &Control::default()).unwrap_err();
        assert!(matches!(err, FlowError::InvalidParameter { .. }));
    }
}
