//! Preprocessing recipes
//!
//! A [`Recipe`] names the outcome and lists [`Step`]s. [`Recipe::prep`]
//! learns every step's parameters from a reference dataset and returns a
//! [`PreparedRecipe`]; only the prepared form can [`bake`](PreparedRecipe::bake)
//! new data, and baking reuses the stored parameters as they are.

pub mod polynomial;
pub mod steps;

pub use polynomial::PolyBasis;
pub use steps::{Fill, ImputeMethod, PreparedStep, Selector, Step};

use crate::data::{Dataset, Schema};
use crate::error::{FlowError, Result};
use crate::models::{ParamSet, Tunable};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Declared preprocessing pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    outcome: String,
    /// Predictor columns; all non-outcome columns when `None`
    #[serde(default)]
    predictors: Option<Vec<String>>,
    #[serde(default)]
    steps: Vec<Step>,
}

impl Recipe {
    pub fn new(outcome: impl Into<String>) -> Self {
        Self {
            outcome: outcome.into(),
            predictors: None,
            steps: Vec::new(),
        }
    }

    /// Restrict the predictors to `names`
    pub fn with_predictors<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.predictors = Some(names.iter().map(|s| s.as_ref().to_string()).collect());
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_impute(self, selector: Selector, method: ImputeMethod) -> Self {
        self.step(Step::Impute { selector, method })
    }

    pub fn step_dummy(self, selector: Selector) -> Self {
        self.step(Step::Dummy { selector, one_hot: false })
    }

    pub fn step_zv(self, selector: Selector) -> Self {
        self.step(Step::ZeroVariance { selector })
    }

    pub fn step_normalize(self, selector: Selector) -> Self {
        self.step(Step::Normalize { selector })
    }

    /// Orthogonal polynomial expansion
    pub fn step_poly(self, selector: Selector, degree: impl Into<Tunable<i64>>) -> Self {
        self.step(Step::Polynomial {
            selector,
            degree: degree.into(),
            raw: false,
        })
    }

    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// `(tuning id, parameter name)` for every placeholder
    pub fn tunable_params(&self) -> Vec<(String, String)> {
        self.steps.iter().filter_map(Step::tunable_param).collect()
    }

    /// Copy with placeholders bound in `params` substituted
    pub fn finalize(&self, params: &ParamSet) -> Result<Recipe> {
        Ok(Recipe {
            outcome: self.outcome.clone(),
            predictors: self.predictors.clone(),
            steps: self.steps.iter().map(|s| s.finalize(params)).collect::<Result<_>>()?,
        })
    }

    /// Predictor names before any step runs
    pub fn raw_predictors(&self, data: &Dataset) -> Result<Vec<String>> {
        match &self.predictors {
            Some(names) => {
                if let Some(missing) = names.iter().find(|n| !data.has_column(n)) {
                    return Err(FlowError::ColumnNotFound(missing.clone()));
                }
                Ok(names.iter().filter(|n| **n != self.outcome).cloned().collect())
            }
            None => Ok(data.column_names().into_iter().filter(|n| *n != self.outcome).collect()),
        }
    }

    /// Learn every step's parameters from `data`, in declared order
    pub fn prep(&self, data: &Dataset) -> Result<PreparedRecipe> {
        let start = Instant::now();
        if !data.has_column(&self.outcome) {
            return Err(FlowError::ColumnNotFound(self.outcome.clone()));
        }
        if let Some((id, _)) = self.tunable_params().into_iter().next() {
            return Err(FlowError::UnresolvedParameter(id));
        }

        let mut columns = self.raw_predictors(data)?;
        columns.push(self.outcome.clone());
        let mut working = data.select(&columns)?;
        let raw_schema = working.schema();

        let mut prepared = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let p = step.prep(&working, &self.outcome)?;
            p.apply(&mut working)?;
            prepared.push(p);
        }

        let predictors = working
            .column_names()
            .into_iter()
            .filter(|n| *n != self.outcome)
            .collect::<Vec<_>>();

        debug!(
            steps = prepared.len(),
            rows = data.n_rows(),
            predictors = predictors.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "recipe prepped"
        );

        Ok(PreparedRecipe {
            outcome: self.outcome.clone(),
            raw_schema,
            steps: prepared,
            predictors,
        })
    }
}

/// A recipe with learned parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedRecipe {
    outcome: String,
    raw_schema: Schema,
    steps: Vec<PreparedStep>,
    predictors: Vec<String>,
}

impl PreparedRecipe {
    /// Apply the learned steps to raw data with the schema seen at prep time.
    ///
    /// The outcome column may be absent. A missing predictor or a kind
    /// mismatch is a `SchemaMismatch` naming the column.
    pub fn bake(&self, data: &Dataset) -> Result<Dataset> {
        self.raw_schema.check(&data.schema(), &self.outcome)?;

        let columns: Vec<String> = self
            .raw_schema
            .names()
            .into_iter()
            .filter(|n| *n != self.outcome || data.has_column(n))
            .collect();
        let mut out = data.select(&columns)?;
        for step in &self.steps {
            step.apply(&mut out)?;
        }
        Ok(out)
    }

    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    /// Schema of the raw data the recipe was prepped on
    pub fn raw_schema(&self) -> &Schema {
        &self.raw_schema
    }

    /// Predictor columns produced by the last step
    pub fn predictors(&self) -> &[String] {
        &self.predictors
    }

    pub fn steps(&self) -> &[PreparedStep] {
        &self.steps
    }
}
