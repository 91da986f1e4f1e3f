//! Workflows: a preprocessor bundled with a model specification
//!
//! [`Workflow::fit`] preps the recipe on the training data, bakes it, builds
//! the numeric design matrix and fits the model. The resulting
//! [`FittedWorkflow`] is read-only and bakes new data with the parameters
//! learned at fit time.

pub mod predictions;

pub use predictions::{Predictions, DEFAULT_THRESHOLD};

use crate::data::{Dataset, LabelSet};
use crate::error::{FlowError, Result};
use crate::models::{FittedModel, ModelSpec, ParamSet};
use crate::preprocessing::{PreparedRecipe, Recipe, Selector};
use crate::tuning::ParamRange;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt;
use std::time::Instant;
use tracing::{debug, info};

/// How raw data becomes model input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Preprocessor {
    Recipe(Recipe),
    /// `outcome ~ predictors`; nominal predictors are dummy encoded. An
    /// empty predictor list means every other column.
    Formula {
        outcome: String,
        #[serde(default)]
        predictors: Vec<String>,
    },
}

impl Preprocessor {
    pub fn formula<S: AsRef<str>>(outcome: &str, predictors: &[S]) -> Self {
        Preprocessor::Formula {
            outcome: outcome.to_string(),
            predictors: predictors.iter().map(|s| s.as_ref().to_string()).collect(),
        }
    }

    pub fn outcome(&self) -> &str {
        match self {
            Preprocessor::Recipe(r) => r.outcome(),
            Preprocessor::Formula { outcome, .. } => outcome,
        }
    }

    /// The equivalent recipe
    pub fn to_recipe(&self) -> Recipe {
        match self {
            Preprocessor::Recipe(r) => r.clone(),
            Preprocessor::Formula { outcome, predictors } => {
                let recipe = Recipe::new(outcome.as_str());
                let recipe = if predictors.is_empty() {
                    recipe
                } else {
                    recipe.with_predictors(predictors)
                };
                recipe.step_dummy(Selector::AllNominalPredictors)
            }
        }
    }

    pub fn tunable_params(&self) -> Vec<(String, String)> {
        match self {
            Preprocessor::Recipe(r) => r.tunable_params(),
            Preprocessor::Formula { .. } => Vec::new(),
        }
    }

    fn finalize(&self, params: &ParamSet) -> Result<Self> {
        Ok(match self {
            Preprocessor::Recipe(r) => Preprocessor::Recipe(r.finalize(params)?),
            formula => formula.clone(),
        })
    }
}

impl From<Recipe> for Preprocessor {
    fn from(recipe: Recipe) -> Self {
        Preprocessor::Recipe(recipe)
    }
}

/// Preprocessor plus model, optionally with an explicit event level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    preprocessor: Preprocessor,
    model: ModelSpec,
    #[serde(default)]
    event_level: Option<String>,
}

impl Workflow {
    pub fn new(preprocessor: impl Into<Preprocessor>, model: ModelSpec) -> Self {
        Self {
            preprocessor: preprocessor.into(),
            model,
            event_level: None,
        }
    }

    /// Level treated as the event by binary metrics; the first sorted level otherwise
    pub fn with_event_level(mut self, level: impl Into<String>) -> Self {
        self.event_level = Some(level.into());
        self
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    pub fn outcome(&self) -> &str {
        self.preprocessor.outcome()
    }

    pub fn event_level(&self) -> Option<&str> {
        self.event_level.as_deref()
    }

    /// `(tuning id, parameter name)` for every placeholder, recipe first
    pub fn tunable_params(&self) -> Vec<(String, String)> {
        let mut params = self.preprocessor.tunable_params();
        params.extend(self.model.tunable_params());
        params
    }

    pub fn is_tunable(&self) -> bool {
        !self.tunable_params().is_empty()
    }

    /// Default search ranges for every placeholder. Data-dependent bounds
    /// (the `mtry` upper limit) are read from `data`.
    pub fn parameters(&self, data: &Dataset) -> Result<Vec<ParamRange>> {
        let n_predictors = self.preprocessor.to_recipe().raw_predictors(data)?.len();
        self.tunable_params()
            .into_iter()
            .map(|(id, name)| ParamRange::default_for(&id, &name, n_predictors))
            .collect()
    }

    /// Substitute `params` into every placeholder. Any placeholder left
    /// unbound is an error; keys that match no placeholder are ignored.
    pub fn finalize(&self, params: &ParamSet) -> Result<Workflow> {
        let out = Workflow {
            preprocessor: self.preprocessor.finalize(params)?,
            model: self.model.finalize(params)?,
            event_level: self.event_level.clone(),
        };
        if let Some((id, _)) = out.tunable_params().into_iter().next() {
            return Err(FlowError::UnresolvedParameter(id));
        }
        Ok(out)
    }

    /// Prep, bake and fit on `data`
    pub fn fit(&self, data: &Dataset) -> Result<FittedWorkflow> {
        let start = Instant::now();
        if let Some((id, _)) = self.tunable_params().into_iter().next() {
            return Err(FlowError::UnresolvedParameter(id));
        }
        self.model.validate()?;

        let outcome = self.outcome().to_string();
        let recipe = self.preprocessor.to_recipe().prep(data)?;
        let baked = recipe.bake(data)?;

        let labels = baked.labels(&outcome)?;
        let label_set = LabelSet::from_labels(&labels, self.event_level.as_deref())?;
        let y = label_set.encode(&labels)?;
        let x = design_matrix(&baked, recipe.predictors())?;

        let model = self.model.fit(&x, &y, label_set.len())?;

        info!(
            model = %self.model.algorithm,
            rows = x.nrows(),
            predictors = x.ncols(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "workflow fitted"
        );

        Ok(FittedWorkflow {
            outcome,
            spec: self.model.clone(),
            recipe,
            model,
            labels: label_set,
        })
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.preprocessor {
            Preprocessor::Recipe(r) => {
                let steps: Vec<&str> = r.steps().iter().map(|s| s.name()).collect();
                write!(f, "recipe[{}]", steps.join(", "))?;
            }
            Preprocessor::Formula { outcome, predictors } if predictors.is_empty() => {
                write!(f, "{} ~ .", outcome)?;
            }
            Preprocessor::Formula { outcome, predictors } => {
                write!(f, "{} ~ {}", outcome, predictors.join(" + "))?;
            }
        }
        write!(f, " | {}", self.model)
    }
}

/// Numeric `n × p` matrix from the named columns. Nulls are rejected.
pub(crate) fn design_matrix(data: &Dataset, predictors: &[String]) -> Result<Array2<f64>> {
    let mut x = Array2::zeros((data.n_rows(), predictors.len()));
    for (j, name) in predictors.iter().enumerate() {
        for (i, value) in data.numeric(name)?.into_iter().enumerate() {
            x[[i, j]] = value.ok_or_else(|| {
                FlowError::Data(format!(
                    "predictor '{}' has a missing value at row {}; add an impute step",
                    name, i
                ))
            })?;
        }
    }
    Ok(x)
}

/// One logistic regression term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coefficient {
    pub term: String,
    pub estimate: f64,
    pub std_error: Option<f64>,
    /// Wald z statistic
    pub statistic: Option<f64>,
    /// Two-sided p-value of `statistic` under a standard normal
    pub p_value: Option<f64>,
}

/// Two-sided p-value of a Wald z statistic
fn wald_p_value(z: f64) -> Option<f64> {
    let normal = Normal::new(0.0, 1.0).ok()?;
    Some(2.0 * (1.0 - normal.cdf(z.abs())))
}

/// A workflow fitted on training data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedWorkflow {
    outcome: String,
    spec: ModelSpec,
    recipe: PreparedRecipe,
    model: FittedModel,
    labels: LabelSet,
}

impl FittedWorkflow {
    /// Class probabilities for `data` in input order
    pub fn predict(&self, data: &Dataset) -> Result<Predictions> {
        let baked = self.recipe.bake(data)?;
        let x = design_matrix(&baked, self.recipe.predictors())?;
        let proba = self.model.predict_proba(&x)?;
        debug!(rows = x.nrows(), "predicted");
        Predictions::new(self.labels.levels().to_vec(), self.labels.event(), proba)
    }

    /// `data` with `.pred_class` and one `.pred_{level}` column per level appended
    pub fn augment(&self, data: &Dataset) -> Result<Dataset> {
        self.augment_at(data, DEFAULT_THRESHOLD)
    }

    /// [`augment`](Self::augment) with an explicit event threshold
    pub fn augment_at(&self, data: &Dataset, threshold: f64) -> Result<Dataset> {
        let predictions = self.predict(data)?;
        let mut out = data.clone();
        out.set_categorical(
            ".pred_class",
            predictions.class_labels(threshold).into_iter().map(Some).collect(),
        )?;
        for (k, level) in predictions.levels().iter().enumerate() {
            let column = predictions.probabilities().column(k).iter().map(|&p| Some(p)).collect();
            out.set_numeric(&format!(".pred_{}", level), column)?;
        }
        Ok(out)
    }

    /// Outcome of `data` as level indices. Levels unseen at fit time are an error.
    pub fn truth(&self, data: &Dataset) -> Result<Vec<usize>> {
        let labels = data.labels(&self.outcome)?;
        self.labels.encode(&labels)
    }

    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    pub fn label_set(&self) -> &LabelSet {
        &self.labels
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn prepared_recipe(&self) -> &PreparedRecipe {
        &self.recipe
    }

    pub fn model(&self) -> &FittedModel {
        &self.model
    }

    /// Predictor columns of the design matrix
    pub fn predictors(&self) -> &[String] {
        self.recipe.predictors()
    }

    /// Coefficient table for logistic regression, intercept first
    pub fn coefficients(&self) -> Option<Vec<Coefficient>> {
        let model = self.model.as_logistic()?;
        let terms = std::iter::once("(Intercept)".to_string()).chain(self.predictors().iter().cloned());
        Some(
            terms
                .zip(model.coefficients().iter())
                .enumerate()
                .map(|(i, (term, &estimate))| {
                    let std_error = model.std_errors().map(|se| se[i]).filter(|se| se.is_finite());
                    let statistic = std_error.filter(|&se| se > 0.0).map(|se| estimate / se);
                    let p_value = statistic.and_then(wald_p_value);
                    Coefficient {
                        term,
                        estimate,
                        std_error,
                        statistic,
                        p_value,
                    }
                })
                .collect(),
        )
    }

    /// Impurity importance per predictor, largest first
    pub fn variable_importance(&self) -> Option<Vec<(String, f64)>> {
        let importances = self.model.feature_importances()?;
        let mut rows: Vec<(String, f64)> = self
            .predictors()
            .iter()
            .cloned()
            .zip(importances.iter().copied())
            .collect();
        rows.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Some(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ColumnKind;
    use crate::models::ParamValue;
    use crate::preprocessing::ImputeMethod;
    use polars::prelude::*;

    fn training() -> Dataset {
        let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let site: Vec<&str> = (0..40).map(|i| if i % 3 == 0 { "north" } else { "south" }).collect();
        let severe: Vec<&str> = (0..40)
            .map(|i| if (i < 20) ^ (i % 7 == 0) { "0" } else { "1" })
            .collect();
        Dataset::new(df! { "x" => &x, "site" => &site, "severe" => &severe }.unwrap()).unwrap()
    }

    #[test]
    fn test_fit_predict_formula() {
        let wf = Workflow::new(Preprocessor::formula("severe", &["x", "site"]), ModelSpec::logistic_reg())
            .with_event_level("1");
        let fitted = wf.fit(&training()).unwrap();
        assert_eq!(fitted.predictors(), &["x", "site_south"]);
        assert_eq!(fitted.label_set().event_level(), "1");

        let preds = fitted.predict(&training()).unwrap();
        assert_eq!(preds.len(), 40);
        for row in preds.probabilities().rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        // x is strongly associated with the event
        let p = preds.event_probabilities();
        assert!(p[39] > p[0]);
    }

    #[test]
    fn test_augment_keeps_rows_and_adds_columns() {
        let wf = Workflow::new(Preprocessor::formula::<&str>("severe", &[]), ModelSpec::logistic_reg());
        let fitted = wf.fit(&training()).unwrap();
        let augmented = fitted.augment(&training()).unwrap();
        assert_eq!(augmented.n_rows(), 40);
        assert_eq!(augmented.kind(".pred_class").unwrap(), ColumnKind::Categorical);
        assert!(augmented.has_column(".pred_0"));
        assert!(augmented.has_column(".pred_1"));
        assert_eq!(augmented.numeric("x").unwrap(), training().numeric("x").unwrap());
    }

    #[test]
    fn test_predict_without_outcome() {
        let wf = Workflow::new(Preprocessor::formula("severe", &["x"]), ModelSpec::decision_tree());
        let fitted = wf.fit(&training()).unwrap();
        let mut new = training();
        new.drop_column("severe").unwrap();
        assert_eq!(fitted.predict(&new).unwrap().len(), 40);
    }

    #[test]
    fn test_missing_values_need_imputation() {
        let data = Dataset::new(
            df! {
                "x" => &[Some(1.0), None, Some(3.0), Some(4.0)],
                "severe" => &["0", "0", "1", "1"],
            }
            .unwrap(),
        )
        .unwrap();
        let plain = Workflow::new(Recipe::new("severe"), ModelSpec::logistic_reg());
        assert!(matches!(plain.fit(&data), Err(FlowError::Data(_))));

        let imputed = Workflow::new(
            Recipe::new("severe").step_impute(Selector::AllNumericPredictors, ImputeMethod::Mean),
            ModelSpec::logistic_reg().with_param("penalty", 0.1),
        );
        assert!(imputed.fit(&data).is_ok());
    }

    #[test]
    fn test_unresolved_and_finalize() {
        let recipe = Recipe::new("severe")
            .step_dummy(Selector::AllNominalPredictors)
            .step_poly(Selector::names(&["x"]), crate::models::Tunable::tune("degree"));
        let wf = Workflow::new(recipe, ModelSpec::logistic_reg().tune("penalty"));
        assert_eq!(wf.tunable_params().len(), 2);
        assert!(matches!(wf.fit(&training()), Err(FlowError::UnresolvedParameter(ref id)) if id == "degree"));

        let mut params = ParamSet::new();
        params.insert("degree".into(), ParamValue::Int(2));
        assert!(matches!(wf.finalize(&params), Err(FlowError::UnresolvedParameter(ref id)) if id == "penalty"));

        params.insert("penalty".into(), ParamValue::Float(0.01));
        let fitted = wf.finalize(&params).unwrap().fit(&training()).unwrap();
        assert_eq!(fitted.predictors(), &["site_south", "x_poly_1", "x_poly_2"]);
    }

    #[test]
    fn test_parameters_default_ranges() {
        let wf = Workflow::new(Recipe::new("severe"), ModelSpec::rand_forest().tune("mtry").tune("trees"));
        let ranges = wf.parameters(&training()).unwrap();
        assert_eq!(ranges.len(), 2);
        let mtry = ranges.iter().find(|r| r.id == "mtry").unwrap();
        assert_eq!(mtry.upper, 2.0);
    }

    #[test]
    fn test_coefficients_table() {
        let wf = Workflow::new(Preprocessor::formula("severe", &["x"]), ModelSpec::logistic_reg());
        let fitted = wf.fit(&training()).unwrap();
        let coefs = fitted.coefficients().unwrap();
        assert_eq!(coefs.len(), 2);
        assert_eq!(coefs[0].term, "(Intercept)");
        assert_eq!(coefs[1].term, "x");
        assert!(coefs[1].std_error.unwrap() > 0.0);
        let p = coefs[1].p_value.unwrap();
        assert!((0.0..=1.0).contains(&p));
        assert!(fitted.variable_importance().is_none());
    }

    #[test]
    fn test_wald_p_value() {
        assert!((wald_p_value(1.959964).unwrap() - 0.05).abs() < 1e-5);
        assert_eq!(wald_p_value(-1.959964), wald_p_value(1.959964));
        assert!((wald_p_value(0.0).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_variable_importance_for_trees() {
        let wf = Workflow::new(
            Preprocessor::formula("severe", &["x", "site"]),
            ModelSpec::decision_tree().with_param("cost_complexity", 0.0),
        );
        let fitted = wf.fit(&training()).unwrap();
        let vip = fitted.variable_importance().unwrap();
        assert_eq!(vip.len(), 2);
        assert!(vip[0].1 >= vip[1].1);
        assert!(fitted.coefficients().is_none());
    }

    #[test]
    fn test_unknown_event_level() {
        let wf = Workflow::new(Recipe::new("severe"), ModelSpec::logistic_reg()).with_event_level("yes");
        assert!(matches!(wf.fit(&training()), Err(FlowError::InvalidParameter { .. })));
    }
}
