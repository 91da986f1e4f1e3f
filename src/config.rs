//! Pipeline configuration
//!
//! A [`PipelineConfig`] describes a whole run: where the data comes from,
//! how the outcome is recoded, how it is split and resampled, which
//! workflows are compared, the tuning grid and the metrics. It is stored
//! as JSON.

use crate::data::LoadOptions;
use crate::error::{FlowError, Result};
use crate::metrics::{Metric, MetricSet};
use crate::models::ModelSpec;
use crate::tuning::{Control, GridSpec};
use crate::workflow::Preprocessor;
use crate::workflow_set::WorkflowSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Data source and outcome handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Local CSV path or http(s) URL
    pub source: String,
    pub outcome: String,
    /// Raw outcome value to label, e.g. `{"0": "0", "1": "1"}`
    #[serde(default)]
    pub recode: Option<BTreeMap<String, String>>,
    /// Level scored as the event by binary metrics
    #[serde(default)]
    pub event_level: Option<String>,
    #[serde(default = "default_null_value")]
    pub null_value: Option<String>,
    #[serde(default = "default_separator")]
    pub separator: char,
}

fn default_null_value() -> Option<String> {
    Some("NA".to_string())
}

fn default_separator() -> char {
    ','
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            outcome: String::new(),
            recode: None,
            event_level: None,
            null_value: default_null_value(),
            separator: default_separator(),
        }
    }
}

/// Initial train/test split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Training share in (0, 1)
    pub prop: f64,
    #[serde(default)]
    pub strata: Option<String>,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            prop: 0.75,
            strata: None,
            seed: 42,
        }
    }
}

/// V-fold cross-validation of the training split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResamplingConfig {
    pub v: usize,
    #[serde(default = "default_repeats")]
    pub repeats: usize,
    #[serde(default)]
    pub strata: Option<String>,
    pub seed: u64,
}

fn default_repeats() -> usize {
    1
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self {
            v: 10,
            repeats: 1,
            strata: None,
            seed: 42,
        }
    }
}

/// How preprocessors and models are combined into workflows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pairing {
    #[default]
    Cross,
    Paired,
}

/// Rule for picking the final candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    #[default]
    Best,
    OneStdErr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedPreprocessor {
    pub id: String,
    pub preprocessor: Preprocessor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedModel {
    pub id: String,
    pub model: ModelSpec,
}

/// Full description of a train/tune/evaluate run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub data: DataConfig,
    #[serde(default)]
    pub split: SplitConfig,
    #[serde(default)]
    pub resampling: ResamplingConfig,
    /// Empty means one formula over every predictor
    #[serde(default)]
    pub preprocessors: Vec<NamedPreprocessor>,
    /// Empty means a single logistic regression
    #[serde(default)]
    pub models: Vec<NamedModel>,
    #[serde(default)]
    pub pairing: Pairing,
    #[serde(default)]
    pub grid: GridSpec,
    #[serde(default = "default_metrics")]
    pub metrics: Vec<Metric>,
    /// Metric used for ranking and selection; the first metric otherwise
    #[serde(default)]
    pub rank_metric: Option<Metric>,
    #[serde(default)]
    pub selection: Selection,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// HTTP timeout for remote sources
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_metrics() -> Vec<Metric> {
    MetricSet::default().metrics().to_vec()
}

fn default_threshold() -> f64 {
    0.5
}

fn default_parallel() -> bool {
    true
}

fn default_timeout() -> u64 {
    60
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            split: SplitConfig::default(),
            resampling: ResamplingConfig::default(),
            preprocessors: Vec::new(),
            models: Vec::new(),
            pairing: Pairing::default(),
            grid: GridSpec::default(),
            metrics: default_metrics(),
            rank_metric: None,
            selection: Selection::default(),
            threshold: default_threshold(),
            parallel: default_parallel(),
            timeout_secs: default_timeout(),
        }
    }
}

impl PipelineConfig {
    pub fn new(source: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self {
            data: DataConfig {
                source: source.into(),
                outcome: outcome.into(),
                ..DataConfig::default()
            },
            ..Self::default()
        }
    }

    /// Recode a 0/1 outcome into labels `"0"`/`"1"` with `"1"` as the event
    pub fn with_binary_outcome(mut self) -> Self {
        self.data.recode = Some(
            [("0", "0"), ("1", "1")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self.data.event_level = Some("1".to_string());
        self
    }

    pub fn with_event_level(mut self, level: impl Into<String>) -> Self {
        self.data.event_level = Some(level.into());
        self
    }

    /// Stratify both the split and the folds on `column`
    pub fn with_strata(mut self, column: impl Into<String>) -> Self {
        let column = column.into();
        self.split.strata = Some(column.clone());
        self.resampling.strata = Some(column);
        self
    }

    pub fn with_prop(mut self, prop: f64) -> Self {
        self.split.prop = prop;
        self
    }

    pub fn with_folds(mut self, v: usize, repeats: usize) -> Self {
        self.resampling.v = v;
        self.resampling.repeats = repeats;
        self
    }

    /// Seed both the split and the folds
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.split.seed = seed;
        self.resampling.seed = seed;
        self
    }

    pub fn with_preprocessor(mut self, id: &str, preprocessor: impl Into<Preprocessor>) -> Self {
        self.preprocessors.push(NamedPreprocessor {
            id: id.to_string(),
            preprocessor: preprocessor.into(),
        });
        self
    }

    pub fn with_model(mut self, id: &str, model: ModelSpec) -> Self {
        self.models.push(NamedModel {
            id: id.to_string(),
            model,
        });
        self
    }

    pub fn with_pairing(mut self, pairing: Pairing) -> Self {
        self.pairing = pairing;
        self
    }

    pub fn with_grid(mut self, grid: GridSpec) -> Self {
        self.grid = grid;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<Metric>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_rank_metric(mut self, metric: Metric) -> Self {
        self.rank_metric = Some(metric);
        self
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Save as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(FlowError::Config(msg));

        if self.data.source.trim().is_empty() {
            return fail("data.source is empty".to_string());
        }
        if self.data.outcome.trim().is_empty() {
            return fail("data.outcome is empty".to_string());
        }
        if !self.data.separator.is_ascii() {
            return fail(format!("data.separator '{}' is not a single-byte character", self.data.separator));
        }
        if !(self.split.prop > 0.0 && self.split.prop < 1.0) {
            return fail(format!("split.prop must lie in (0, 1), got {}", self.split.prop));
        }
        if self.resampling.v < 2 {
            return fail(format!("resampling.v must be at least 2, got {}", self.resampling.v));
        }
        if self.resampling.repeats == 0 {
            return fail("resampling.repeats must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return fail(format!("threshold must lie in [0, 1], got {}", self.threshold));
        }
        if self.metrics.is_empty() {
            return fail("metrics is empty".to_string());
        }
        if let Some(metric) = self.rank_metric {
            if !self.metrics.contains(&metric) {
                return fail(format!("rank_metric '{}' is not in metrics", metric));
            }
        }

        let mut ids = BTreeSet::new();
        for p in &self.preprocessors {
            if !ids.insert(p.id.as_str()) {
                return fail(format!("duplicate preprocessor id '{}'", p.id));
            }
            if p.preprocessor.outcome() != self.data.outcome {
                return fail(format!(
                    "preprocessor '{}' predicts '{}' but data.outcome is '{}'",
                    p.id,
                    p.preprocessor.outcome(),
                    self.data.outcome
                ));
            }
        }
        let mut ids = BTreeSet::new();
        for m in &self.models {
            if !ids.insert(m.id.as_str()) {
                return fail(format!("duplicate model id '{}'", m.id));
            }
            m.model
                .validate()
                .map_err(|e| FlowError::Config(format!("model '{}': {}", m.id, e)))?;
        }
        if self.pairing == Pairing::Paired && self.preprocessors.len() != self.models.len() {
            return fail(format!(
                "paired workflows need as many models ({}) as preprocessors ({})",
                self.models.len(),
                self.preprocessors.len()
            ));
        }
        Ok(())
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions::new()
            .with_separator(self.data.separator as u8)
            .with_null_value(self.data.null_value.clone())
            .with_timeout(self.timeout_secs)
    }

    pub fn metric_set(&self) -> MetricSet {
        MetricSet::new(self.metrics.clone())
    }

    /// Ranking metric: `rank_metric` or the first metric
    pub fn primary_metric(&self) -> Result<Metric> {
        self.rank_metric
            .or_else(|| self.metrics.first().copied())
            .ok_or_else(|| FlowError::Config("metrics is empty".to_string()))
    }

    pub fn control(&self) -> Control {
        Control::new()
            .with_parallel(self.parallel)
            .with_threshold(self.threshold)
    }

    /// Candidate workflows, with the configured event level applied
    pub fn workflow_set(&self) -> Result<WorkflowSet> {
        let preprocessors: Vec<(String, Preprocessor)> = if self.preprocessors.is_empty() {
            vec![(
                "formula".to_string(),
                Preprocessor::formula::<&str>(&self.data.outcome, &[]),
            )]
        } else {
            self.preprocessors
                .iter()
                .map(|p| (p.id.clone(), p.preprocessor.clone()))
                .collect()
        };
        let models: Vec<(String, ModelSpec)> = if self.models.is_empty() {
            vec![("glm".to_string(), ModelSpec::logistic_reg())]
        } else {
            self.models.iter().map(|m| (m.id.clone(), m.model.clone())).collect()
        };

        let set = match self.pairing {
            Pairing::Cross => WorkflowSet::cross(preprocessors, models)?,
            Pairing::Paired => WorkflowSet::paired(preprocessors, models)?,
        };
        Ok(match &self.data.event_level {
            Some(level) => set.with_event_level(level),
            None => set,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tunable;
    use crate::preprocessing::{Recipe, Selector};
    use crate::tuning::Grid;
    use tempfile::tempdir;

    fn malaria() -> PipelineConfig {
        PipelineConfig::new("data/malaria.csv", "severe")
            .with_binary_outcome()
            .with_strata("severe")
            .with_preprocessor(
                "poly",
                Recipe::new("severe").step_poly(Selector::names(&["age"]), Tunable::tune("degree")),
            )
            .with_model("glm", ModelSpec::logistic_reg())
            .with_model("tree", ModelSpec::decision_tree().tune("cost_complexity"))
            .with_grid(GridSpec::new(Grid::Regular { levels: 3 }))
            .with_rank_metric(Metric::RocAuc)
    }

    #[test]
    fn test_default_is_invalid_without_source() {
        let err = PipelineConfig::default().validate().unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn test_builder_validates() {
        let config = malaria();
        config.validate().unwrap();
        assert_eq!(config.split.strata.as_deref(), Some("severe"));
        assert_eq!(config.primary_metric().unwrap(), Metric::RocAuc);

        let set = config.workflow_set().unwrap();
        assert_eq!(set.ids(), vec!["poly_glm", "poly_tree"]);
        assert_eq!(set.extract_workflow("poly_glm").unwrap().event_level(), Some("1"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let config = malaria();
        config.save(&path).unwrap();
        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let config = PipelineConfig::from_json(r#"{"data": {"source": "x.csv", "outcome": "y"}}"#).unwrap();
        assert_eq!(config.split.prop, 0.75);
        assert_eq!(config.resampling.v, 10);
        assert_eq!(config.metrics, vec![Metric::Accuracy, Metric::RocAuc, Metric::BrierClass]);
        config.validate().unwrap();
        assert_eq!(config.workflow_set().unwrap().ids(), vec!["formula_glm"]);
    }

    #[test]
    fn test_validation_failures() {
        assert!(malaria().with_prop(1.0).validate().is_err());
        assert!(malaria().with_folds(1, 1).validate().is_err());
        assert!(malaria().with_metrics(vec![Metric::Accuracy]).validate().is_err());
        assert!(malaria().with_pairing(Pairing::Paired).with_model("rf", ModelSpec::rand_forest()).validate().is_err());

        let wrong_outcome = malaria().with_preprocessor("other", Recipe::new("died"));
        assert!(wrong_outcome.validate().is_err());

        let bad_model = malaria().with_model("bad", ModelSpec::logistic_reg().with_param("trees", 3i64));
        assert!(bad_model.validate().is_err());
    }
}
