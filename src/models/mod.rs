//! Model specifications and fitted models
//!
//! A [`ModelSpec`] is a declarative description (algorithm, mode, engine,
//! hyperparameters) with no fitted state. Hyperparameters may be left as
//! [`Tunable::Tune`] placeholders; they must all be resolved before
//! [`ModelSpec::fit`] is called.

pub mod forest;
pub mod logistic;
pub mod params;
pub mod tree;

pub use forest::{ForestParams, RandomForestModel};
pub use logistic::{LogisticModel, LogisticSolver};
pub use params::{compare_param_sets, format_params, ParamSet, ParamValue, Tunable};
pub use tree::{ClassificationTree, TreeNode, TreeParams};

use crate::error::{FlowError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// Model family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    LogisticRegression,
    DecisionTree,
    RandomForest,
}

impl Algorithm {
    /// Hyperparameters this family accepts
    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            Algorithm::LogisticRegression => &["penalty", "max_iter"],
            Algorithm::DecisionTree => &["cost_complexity", "tree_depth", "min_n"],
            Algorithm::RandomForest => &["mtry", "trees", "min_n"],
        }
    }

    pub fn default_engine(&self) -> Engine {
        match self {
            Algorithm::LogisticRegression => Engine::Irls,
            Algorithm::DecisionTree => Engine::Cart,
            Algorithm::RandomForest => Engine::Bagging,
        }
    }

    /// Short id used in workflow ids
    pub fn short_name(&self) -> &'static str {
        match self {
            Algorithm::LogisticRegression => "logistic_reg",
            Algorithm::DecisionTree => "decision_tree",
            Algorithm::RandomForest => "rand_forest",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

/// Prediction task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Classification,
    Regression,
}

/// Fitting backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    Irls,
    GradientDescent,
    Cart,
    Bagging,
}

impl Engine {
    fn supports(&self, algorithm: Algorithm) -> bool {
        matches!(
            (self, algorithm),
            (Engine::Irls | Engine::GradientDescent, Algorithm::LogisticRegression)
                | (Engine::Cart, Algorithm::DecisionTree)
                | (Engine::Bagging, Algorithm::RandomForest)
        )
    }
}

/// Declarative model description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub algorithm: Algorithm,
    pub mode: Mode,
    pub engine: Engine,
    #[serde(default)]
    pub params: BTreeMap<String, Tunable<ParamValue>>,
    /// Seed for stochastic engines
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_seed() -> u64 {
    42
}

impl ModelSpec {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            mode: Mode::Classification,
            engine: algorithm.default_engine(),
            params: BTreeMap::new(),
            seed: default_seed(),
        }
    }

    pub fn logistic_reg() -> Self {
        Self::new(Algorithm::LogisticRegression)
    }

    pub fn decision_tree() -> Self {
        Self::new(Algorithm::DecisionTree)
    }

    pub fn rand_forest() -> Self {
        Self::new(Algorithm::RandomForest)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set a hyperparameter to a concrete value
    pub fn with_param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.to_string(), Tunable::Fixed(value.into()));
        self
    }

    /// Mark a hyperparameter for tuning under its own name
    pub fn tune(mut self, name: &str) -> Self {
        self.params.insert(name.to_string(), Tunable::tune(name));
        self
    }

    /// Mark a hyperparameter for tuning under a custom id
    pub fn tune_as(mut self, name: &str, id: &str) -> Self {
        self.params.insert(name.to_string(), Tunable::tune(id));
        self
    }

    /// Check parameter names and the engine against the algorithm
    pub fn validate(&self) -> Result<()> {
        if !self.engine.supports(self.algorithm) {
            return Err(FlowError::invalid(
                "engine",
                format!("{:?}", self.engine),
                &format!("not available for {}", self.algorithm),
            ));
        }
        let allowed = self.algorithm.param_names();
        if let Some(name) = self.params.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(FlowError::invalid(
                name,
                &self.params[name],
                &format!("not a parameter of {}; expected one of {:?}", self.algorithm, allowed),
            ));
        }
        Ok(())
    }

    /// `(tuning id, parameter name)` for every placeholder
    pub fn tunable_params(&self) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter_map(|(name, t)| t.tune_id().map(|id| (id.to_string(), name.clone())))
            .collect()
    }

    /// Copy with every placeholder bound in `params` replaced by its value
    pub fn finalize(&self, params: &ParamSet) -> Result<Self> {
        let mut out = self.clone();
        for value in out.params.values_mut() {
            *value = value.resolve_with(params, |v| Some(v.clone()))?;
        }
        Ok(out)
    }

    fn float(&self, name: &str, default: f64) -> Result<f64> {
        match self.params.get(name) {
            None => Ok(default),
            Some(t) => {
                let v = t.value()?;
                v.as_f64()
                    .ok_or_else(|| FlowError::invalid(name, v, "expected a number"))
            }
        }
    }

    fn count(&self, name: &str) -> Result<Option<usize>> {
        match self.params.get(name) {
            None => Ok(None),
            Some(t) => {
                let v = t.value()?;
                match v.as_i64() {
                    Some(i) if i >= 1 => Ok(Some(i as usize)),
                    _ => Err(FlowError::invalid(name, v, "expected a positive integer")),
                }
            }
        }
    }

    /// Fit on a numeric design matrix and class indices in `0..n_classes`
    pub fn fit(&self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<FittedModel> {
        self.validate()?;
        if let Some((id, _)) = self.tunable_params().into_iter().next() {
            return Err(FlowError::UnresolvedParameter(id));
        }
        if self.mode != Mode::Classification {
            return Err(FlowError::Training(format!(
                "{} supports classification only",
                self.algorithm
            )));
        }

        debug!(
            algorithm = %self.algorithm,
            rows = x.nrows(),
            features = x.ncols(),
            "fitting model"
        );

        let model = match self.algorithm {
            Algorithm::LogisticRegression => {
                if n_classes != 2 {
                    return Err(FlowError::Training(format!(
                        "logistic regression needs a binary outcome, found {} classes",
                        n_classes
                    )));
                }
                let penalty = self.float("penalty", 0.0)?;
                let (solver, default_iter) = match self.engine {
                    Engine::GradientDescent => (LogisticSolver::GradientDescent { learning_rate: 0.1 }, 1000),
                    _ => (LogisticSolver::Irls, 25),
                };
                let max_iter = self.count("max_iter")?.unwrap_or(default_iter);
                FittedModel::Logistic(LogisticModel::fit(x, y, penalty, max_iter, solver)?)
            }
            Algorithm::DecisionTree => {
                let params = TreeParams {
                    max_depth: Some(self.count("tree_depth")?.unwrap_or(30)),
                    min_samples_split: self.count("min_n")?.unwrap_or(2),
                    min_samples_leaf: 1,
                    cost_complexity: self.float("cost_complexity", 0.01)?,
                    max_features: None,
                    seed: self.seed,
                };
                FittedModel::Tree(ClassificationTree::fit(x, y, n_classes, &params)?)
            }
            Algorithm::RandomForest => {
                let params = ForestParams {
                    n_trees: self.count("trees")?.unwrap_or(500),
                    mtry: self.count("mtry")?,
                    min_samples_split: self.count("min_n")?.unwrap_or(2),
                    bootstrap: true,
                    seed: self.seed,
                };
                FittedModel::Forest(RandomForestModel::fit(x, y, n_classes, &params)?)
            }
        };
        Ok(model)
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.algorithm, self.engine)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            write!(f, " [{}]", params.join(", "))?;
        }
        Ok(())
    }
}

/// A fitted model of any supported family
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FittedModel {
    Logistic(LogisticModel),
    Tree(ClassificationTree),
    Forest(RandomForestModel),
}

impl FittedModel {
    /// `n × n_classes` probabilities, columns in level order
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            FittedModel::Logistic(m) => m.predict_proba(x),
            FittedModel::Tree(m) => m.predict_proba(x),
            FittedModel::Forest(m) => m.predict_proba(x),
        }
    }

    /// Impurity importances for tree models
    pub fn feature_importances(&self) -> Option<&Array1<f64>> {
        match self {
            FittedModel::Logistic(_) => None,
            FittedModel::Tree(m) => Some(m.feature_importances()),
            FittedModel::Forest(m) => Some(m.feature_importances()),
        }
    }

    pub fn as_logistic(&self) -> Option<&LogisticModel> {
        match self {
            FittedModel::Logistic(m) => Some(m),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_validate_rejects_unknown_param() {
        let spec = ModelSpec::logistic_reg().with_param("mtry", 3i64);
        assert!(matches!(spec.validate(), Err(FlowError::InvalidParameter { .. })));
    }

    #[test]
    fn test_validate_rejects_wrong_engine() {
        let spec = ModelSpec::decision_tree().with_engine(Engine::Irls);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_fit_with_placeholder_fails() {
        let spec = ModelSpec::decision_tree().tune("tree_depth");
        let x = array![[1.0], [2.0]];
        let err = spec.fit(&x, &[0, 1], 2).unwrap_err();
        assert!(matches!(err, FlowError::UnresolvedParameter(ref id) if id == "tree_depth"));
    }

    #[test]
    fn test_finalize_binds_placeholders() {
        let spec = ModelSpec::rand_forest().tune("mtry").tune_as("min_n", "node_size");
        assert_eq!(spec.tunable_params().len(), 2);

        let mut params = ParamSet::new();
        params.insert("mtry".to_string(), ParamValue::Int(2));
        let partial = spec.finalize(&params).unwrap();
        assert_eq!(partial.tunable_params(), vec![("node_size".to_string(), "min_n".to_string())]);

        params.insert("node_size".to_string(), ParamValue::Int(5));
        let full = spec.finalize(&params).unwrap();
        assert!(full.tunable_params().is_empty());
        assert_eq!(full.params["min_n"], Tunable::Fixed(ParamValue::Int(5)));
        // the original is untouched
        assert_eq!(spec.tunable_params().len(), 2);
    }

    #[test]
    fn test_regression_mode_rejected_at_fit() {
        let spec = ModelSpec::logistic_reg().with_mode(Mode::Regression);
        let x = array![[1.0], [2.0]];
        assert!(matches!(spec.fit(&x, &[0, 1], 2), Err(FlowError::Training(_))));
    }

    #[test]
    fn test_fit_each_family() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let y = [0, 0, 1, 0, 1, 1];
        for spec in [
            ModelSpec::logistic_reg(),
            ModelSpec::decision_tree().with_param("cost_complexity", 0.0),
            ModelSpec::rand_forest().with_param("trees", 10i64),
        ] {
            let model = spec.fit(&x, &y, 2).unwrap();
            let proba = model.predict_proba(&x).unwrap();
            assert_eq!(proba.dim(), (6, 2));
        }
    }
}
