//! Comparing many workflows over the same resamples

use crate::error::{FlowError, Result};
use crate::metrics::{Direction, Metric, MetricSet};
use crate::models::{ModelSpec, ParamSet};
use crate::resampling::Resamples;
use crate::tuning::{fit_resamples, tune_grid, Control, GridSpec, TuningResult};
use crate::workflow::{Preprocessor, Workflow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::info;

/// One named workflow and, once mapped, its resampling result
#[derive(Debug, Clone)]
pub struct WorkflowSetEntry {
    pub id: String,
    pub workflow: Workflow,
    result: Option<TuningResult>,
}

impl WorkflowSetEntry {
    pub fn result(&self) -> Option<&TuningResult> {
        self.result.as_ref()
    }
}

/// A workflow's best candidate in a ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub rank: usize,
    pub wflow_id: String,
    pub model: String,
    pub params: ParamSet,
    pub metric: Metric,
    pub mean: Option<f64>,
    pub std_err: Option<f64>,
    pub n: usize,
}

/// Named workflows evaluated together
#[derive(Debug, Clone, Default)]
pub struct WorkflowSet {
    entries: Vec<WorkflowSetEntry>,
}

impl WorkflowSet {
    /// Workflows under explicit ids; ids must be unique
    pub fn from_workflows(workflows: Vec<(String, Workflow)>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for (id, _) in &workflows {
            if !seen.insert(id.clone()) {
                return Err(FlowError::invalid("wflow_id", id, "duplicate workflow id"));
            }
        }
        Ok(Self {
            entries: workflows
                .into_iter()
                .map(|(id, workflow)| WorkflowSetEntry {
                    id,
                    workflow,
                    result: None,
                })
                .collect(),
        })
    }

    /// Every preprocessor combined with every model, ids `{preproc}_{model}`
    pub fn cross(preprocessors: Vec<(String, Preprocessor)>, models: Vec<(String, ModelSpec)>) -> Result<Self> {
        let mut workflows = Vec::with_capacity(preprocessors.len() * models.len());
        for (p_id, preprocessor) in &preprocessors {
            for (m_id, model) in &models {
                workflows.push((
                    format!("{}_{}", p_id, m_id),
                    Workflow::new(preprocessor.clone(), model.clone()),
                ));
            }
        }
        Self::from_workflows(workflows)
    }

    /// The i-th preprocessor with the i-th model
    pub fn paired(preprocessors: Vec<(String, Preprocessor)>, models: Vec<(String, ModelSpec)>) -> Result<Self> {
        if preprocessors.len() != models.len() {
            return Err(FlowError::invalid(
                "models",
                models.len(),
                &format!("paired sets need as many models as preprocessors ({})", preprocessors.len()),
            ));
        }
        Self::from_workflows(
            preprocessors
                .into_iter()
                .zip(models)
                .map(|((p_id, p), (m_id, m))| (format!("{}_{}", p_id, m_id), Workflow::new(p, m)))
                .collect(),
        )
    }

    /// Set the event level of every workflow
    pub fn with_event_level(mut self, level: &str) -> Self {
        for entry in &mut self.entries {
            entry.workflow = entry.workflow.clone().with_event_level(level);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    pub fn entries(&self) -> &[WorkflowSetEntry] {
        &self.entries
    }

    fn entry(&self, id: &str) -> Result<&WorkflowSetEntry> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| FlowError::invalid("wflow_id", id, "no such workflow in the set"))
    }

    pub fn extract_workflow(&self, id: &str) -> Result<&Workflow> {
        Ok(&self.entry(id)?.workflow)
    }

    pub fn extract_result(&self, id: &str) -> Result<&TuningResult> {
        self.entry(id)?
            .result
            .as_ref()
            .ok_or_else(|| FlowError::NotFitted(format!("workflow '{}' has not been mapped", id)))
    }

    /// Tune every workflow with tuning ids and resample the others
    pub fn workflow_map(
        &mut self,
        resamples: &Resamples,
        grid: &GridSpec,
        metrics: &MetricSet,
        control: &Control,
    ) -> Result<()> {
        let start = Instant::now();
        for entry in &mut self.entries {
            info!(wflow_id = %entry.id, workflow = %entry.workflow, "mapping workflow");
            let result = if entry.workflow.is_tunable() {
                tune_grid(&entry.workflow, resamples, grid, metrics, control)?
            } else {
                fit_resamples(&entry.workflow, resamples, metrics, control)?
            };
            entry.result = Some(result);
        }
        info!(
            workflows = self.entries.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "workflow set mapped"
        );
        Ok(())
    }

    /// Each workflow's best candidate for `metric`, best first, ranked from 1.
    /// Workflows with no defined value for the metric come last.
    pub fn rank_results(&self, metric: Metric) -> Result<Vec<RankedResult>> {
        let mut rows = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let result = self.extract_result(&entry.id)?;
            let row = match result.best_summary(metric) {
                Ok(best) => RankedResult {
                    rank: 0,
                    wflow_id: entry.id.clone(),
                    model: entry.workflow.model().algorithm.short_name().to_string(),
                    params: best.params.clone(),
                    metric,
                    mean: best.mean,
                    std_err: best.std_err,
                    n: best.n,
                },
                Err(FlowError::Metric(_)) => RankedResult {
                    rank: 0,
                    wflow_id: entry.id.clone(),
                    model: entry.workflow.model().algorithm.short_name().to_string(),
                    params: ParamSet::new(),
                    metric,
                    mean: None,
                    std_err: None,
                    n: 0,
                },
                Err(e) => return Err(e),
            };
            rows.push(row);
        }

        let direction = metric.direction();
        rows.sort_by(|a, b| match (a.mean, b.mean) {
            (Some(x), Some(y)) => match direction {
                Direction::Maximize => y.total_cmp(&x),
                Direction::Minimize => x.total_cmp(&y),
            },
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        for (i, row) in rows.iter_mut().enumerate() {
            row.rank = i + 1;
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dataset;
    use crate::models::Tunable;
    use crate::preprocessing::{Recipe, Selector};
    use crate::resampling::vfold_cv;
    use crate::tuning::Grid;
    use polars::prelude::*;

    fn preprocessors() -> Vec<(String, Preprocessor)> {
        vec![
            ("formula".to_string(), Preprocessor::formula("severe", &["x"])),
            (
                "poly".to_string(),
                Recipe::new("severe")
                    .step_poly(Selector::names(&["x"]), Tunable::tune("degree"))
                    .into(),
            ),
        ]
    }

    fn models() -> Vec<(String, ModelSpec)> {
        vec![
            ("glm".to_string(), ModelSpec::logistic_reg()),
            ("tree".to_string(), ModelSpec::decision_tree()),
        ]
    }

    #[test]
    fn test_cross_ids() {
        let set = WorkflowSet::cross(preprocessors(), models()).unwrap();
        assert_eq!(set.ids(), vec!["formula_glm", "formula_tree", "poly_glm", "poly_tree"]);
    }

    #[test]
    fn test_paired_requires_equal_lengths() {
        let set = WorkflowSet::paired(preprocessors(), models()).unwrap();
        assert_eq!(set.ids(), vec!["formula_glm", "poly_tree"]);
        let mut short = models();
        short.pop();
        assert!(WorkflowSet::paired(preprocessors(), short).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let wf = Workflow::new(Recipe::new("severe"), ModelSpec::logistic_reg());
        assert!(WorkflowSet::from_workflows(vec![("a".into(), wf.clone()), ("a".into(), wf)]).is_err());
    }

    #[test]
    fn test_map_and_rank() {
        let n = 60;
        let x: Vec<f64> = (0..n).map(|i| i as f64 / 6.0 - 5.0).collect();
        let y: Vec<&str> = x
            .iter()
            .enumerate()
            .map(|(i, v)| if (v * v > 6.0) ^ (i % 13 == 0) { "1" } else { "0" })
            .collect();
        let data = Dataset::new(df! { "x" => &x, "severe" => &y }.unwrap()).unwrap();
        let folds = vfold_cv(&data, 4, 1, Some("severe"), 2).unwrap();

        let mut set = WorkflowSet::paired(preprocessors(), models()).unwrap().with_event_level("1");
        assert!(matches!(set.rank_results(Metric::RocAuc), Err(FlowError::NotFitted(_))));

        set.workflow_map(
            &folds,
            &GridSpec::new(Grid::Regular { levels: 2 }),
            &MetricSet::new(vec![Metric::RocAuc, Metric::Accuracy]),
            &Control::default(),
        )
        .unwrap();

        assert_eq!(set.extract_result("formula_glm").unwrap().candidates().len(), 1);
        assert_eq!(set.extract_result("poly_tree").unwrap().candidates().len(), 2);

        let ranked = set.rank_results(Metric::RocAuc).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
        assert!(ranked[0].mean.unwrap() >= ranked[1].mean.unwrap());
        // a straight line cannot separate the two tails
        assert_eq!(ranked[0].wflow_id, "poly_tree");
    }
}
