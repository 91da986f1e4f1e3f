//! Recipe steps: declarations and learned state

use super::polynomial::PolyBasis;
use crate::data::{ColumnKind, Dataset, Schema};
use crate::error::{FlowError, Result};
use crate::models::{ParamSet, ParamValue, Tunable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Which columns a step acts on. Resolved against the schema produced by
/// the previous step; the outcome is never selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Names(Vec<String>),
    AllNumericPredictors,
    AllNominalPredictors,
    AllPredictors,
}

impl Selector {
    pub fn names<S: AsRef<str>>(names: &[S]) -> Self {
        Selector::Names(names.iter().map(|s| s.as_ref().to_string()).collect())
    }

    /// Column names in schema order; explicit names must exist and, if
    /// `required` is set, have that kind
    pub fn resolve(&self, schema: &Schema, outcome: &str, required: Option<ColumnKind>) -> Result<Vec<String>> {
        let predictors = schema.iter().filter(|(n, _)| *n != outcome);
        match self {
            Selector::Names(names) => {
                for name in names {
                    match schema.get(name) {
                        None => return Err(FlowError::ColumnNotFound(name.clone())),
                        Some(_) if name == outcome => {
                            return Err(FlowError::invalid("selector", name, "the outcome cannot be transformed"))
                        }
                        Some(kind) => {
                            if let Some(req) = required.filter(|r| *r != kind) {
                                return Err(FlowError::SchemaMismatch {
                                    column: name.clone(),
                                    expected: req.to_string(),
                                    found: kind.to_string(),
                                });
                            }
                        }
                    }
                }
                Ok(names.clone())
            }
            Selector::AllNumericPredictors => Ok(predictors
                .filter(|(_, k)| *k == ColumnKind::Numeric)
                .map(|(n, _)| n.to_string())
                .collect()),
            Selector::AllNominalPredictors => Ok(predictors
                .filter(|(_, k)| *k == ColumnKind::Categorical)
                .map(|(n, _)| n.to_string())
                .collect()),
            Selector::AllPredictors => Ok(predictors
                .filter(|(_, k)| required.map_or(true, |r| r == *k))
                .map(|(n, _)| n.to_string())
                .collect()),
        }
    }
}

/// Statistic used to fill missing numeric cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputeMethod {
    Mean,
    Median,
}

/// A declared preprocessing step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Fill nulls: numeric columns by `method`, categorical by the mode
    Impute { selector: Selector, method: ImputeMethod },
    /// Indicator columns for categorical predictors; the first level is the
    /// reference unless `one_hot`
    Dummy {
        selector: Selector,
        #[serde(default)]
        one_hot: bool,
    },
    /// Drop columns with at most one distinct value
    ZeroVariance { selector: Selector },
    /// Centre to mean 0 and scale to standard deviation 1
    Normalize { selector: Selector },
    /// Replace each column with `degree` polynomial basis columns
    Polynomial {
        selector: Selector,
        degree: Tunable<i64>,
        #[serde(default)]
        raw: bool,
    },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Impute { .. } => "impute",
            Step::Dummy { .. } => "dummy",
            Step::ZeroVariance { .. } => "zv",
            Step::Normalize { .. } => "normalize",
            Step::Polynomial { .. } => "poly",
        }
    }

    /// `(tuning id, parameter name)` of a placeholder, if any
    pub fn tunable_param(&self) -> Option<(String, String)> {
        match self {
            Step::Polynomial { degree, .. } => degree.tune_id().map(|id| (id.to_string(), "degree".to_string())),
            _ => None,
        }
    }

    pub(crate) fn finalize(&self, params: &ParamSet) -> Result<Step> {
        Ok(match self {
            Step::Polynomial { selector, degree, raw } => Step::Polynomial {
                selector: selector.clone(),
                degree: degree.resolve_with(params, ParamValue::as_i64)?,
                raw: *raw,
            },
            other => other.clone(),
        })
    }

    /// Learn this step's parameters from `data`
    pub(crate) fn prep(&self, data: &Dataset, outcome: &str) -> Result<PreparedStep> {
        let schema = data.schema();
        match self {
            Step::Impute { selector, method } => {
                let mut fills = Vec::new();
                for column in selector.resolve(&schema, outcome, None)? {
                    let fill = match data.kind(&column)? {
                        ColumnKind::Numeric => {
                            let mut observed: Vec<f64> = data.numeric(&column)?.into_iter().flatten().collect();
                            if observed.is_empty() {
                                return Err(FlowError::Data(format!("column '{}' has no observed values to impute from", column)));
                            }
                            Fill::Numeric(match method {
                                ImputeMethod::Mean => observed.iter().sum::<f64>() / observed.len() as f64,
                                ImputeMethod::Median => median(&mut observed),
                            })
                        }
                        ColumnKind::Categorical => {
                            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
                            for v in data.categorical(&column)?.into_iter().flatten() {
                                *counts.entry(v).or_insert(0) += 1;
                            }
                            // max_by_key keeps the last maximum; iterate in reverse so ties go to the smallest level
                            let mode = counts
                                .into_iter()
                                .rev()
                                .max_by_key(|(_, c)| *c)
                                .map(|(level, _)| level)
                                .ok_or_else(|| {
                                    FlowError::Data(format!("column '{}' has no observed values to impute from", column))
                                })?;
                            Fill::Categorical(mode)
                        }
                    };
                    fills.push((column, fill));
                }
                Ok(PreparedStep::Impute { fills })
            }
            Step::Dummy { selector, one_hot } => {
                let mut columns = Vec::new();
                for column in selector.resolve(&schema, outcome, Some(ColumnKind::Categorical))? {
                    let levels: BTreeSet<String> = data.categorical(&column)?.into_iter().flatten().collect();
                    columns.push((column, levels.into_iter().collect()));
                }
                Ok(PreparedStep::Dummy {
                    columns,
                    one_hot: *one_hot,
                })
            }
            Step::ZeroVariance { selector } => {
                let mut removed = Vec::new();
                for column in selector.resolve(&schema, outcome, None)? {
                    let distinct: BTreeSet<String> = data.keys(&column)?.into_iter().flatten().collect();
                    if distinct.len() <= 1 {
                        removed.push(column);
                    }
                }
                Ok(PreparedStep::ZeroVariance { removed })
            }
            Step::Normalize { selector } => {
                let mut stats = Vec::new();
                for column in selector.resolve(&schema, outcome, Some(ColumnKind::Numeric))? {
                    let observed: Vec<f64> = data.numeric(&column)?.into_iter().flatten().collect();
                    let n = observed.len() as f64;
                    let mean = if observed.is_empty() { 0.0 } else { observed.iter().sum::<f64>() / n };
                    let var = if observed.len() < 2 {
                        0.0
                    } else {
                        observed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
                    };
                    let sd = if var > 0.0 && var.is_finite() {
                        var.sqrt()
                    } else {
                        warn!(column = %column, "zero variance column is centred but not scaled");
                        1.0
                    };
                    stats.push((column, mean, sd));
                }
                Ok(PreparedStep::Normalize { stats })
            }
            Step::Polynomial { selector, degree, raw } => {
                let degree = *degree.value()?;
                if degree < 1 {
                    return Err(FlowError::invalid("degree", degree, "must be at least 1"));
                }
                let mut bases = Vec::new();
                for column in selector.resolve(&schema, outcome, Some(ColumnKind::Numeric))? {
                    let observed: Vec<f64> = data.numeric(&column)?.into_iter().flatten().collect();
                    let basis = PolyBasis::fit(&observed, degree as usize, *raw).map_err(|e| match e {
                        FlowError::InvalidParameter { name, value, reason } => FlowError::InvalidParameter {
                            name,
                            value,
                            reason: format!("{} in column '{}'", reason, column),
                        },
                        other => other,
                    })?;
                    bases.push((column, basis));
                }
                Ok(PreparedStep::Polynomial { bases })
            }
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

/// Fill value learned by an impute step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Fill {
    Numeric(f64),
    Categorical(String),
}

/// A step with its learned parameters. Applying it never looks at the
/// statistics of the data it transforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PreparedStep {
    Impute { fills: Vec<(String, Fill)> },
    Dummy { columns: Vec<(String, Vec<String>)>, one_hot: bool },
    ZeroVariance { removed: Vec<String> },
    Normalize { stats: Vec<(String, f64, f64)> },
    Polynomial { bases: Vec<(String, PolyBasis)> },
}

impl PreparedStep {
    pub fn name(&self) -> &'static str {
        match self {
            PreparedStep::Impute { .. } => "impute",
            PreparedStep::Dummy { .. } => "dummy",
            PreparedStep::ZeroVariance { .. } => "zv",
            PreparedStep::Normalize { .. } => "normalize",
            PreparedStep::Polynomial { .. } => "poly",
        }
    }

    pub(crate) fn apply(&self, data: &mut Dataset) -> Result<()> {
        match self {
            PreparedStep::Impute { fills } => {
                for (column, fill) in fills {
                    match fill {
                        Fill::Numeric(v) => {
                            let filled = data.numeric(column)?.into_iter().map(|x| Some(x.unwrap_or(*v))).collect();
                            data.set_numeric(column, filled)?;
                        }
                        Fill::Categorical(level) => {
                            let filled = data
                                .categorical(column)?
                                .into_iter()
                                .map(|x| Some(x.unwrap_or_else(|| level.clone())))
                                .collect();
                            data.set_categorical(column, filled)?;
                        }
                    }
                }
            }
            PreparedStep::Dummy { columns, one_hot } => {
                for (column, levels) in columns {
                    let values = data.categorical(column)?;
                    let unseen: BTreeSet<&str> = values
                        .iter()
                        .flatten()
                        .filter(|v| !levels.contains(v))
                        .map(|v| v.as_str())
                        .collect();
                    if !unseen.is_empty() {
                        warn!(column = %column, levels = ?unseen, "levels not seen at prep time get all-zero indicators");
                    }
                    let skip = if *one_hot { 0 } else { 1 };
                    for level in levels.iter().skip(skip) {
                        let indicator = values
                            .iter()
                            .map(|v| v.as_ref().map(|v| if v == level { 1.0 } else { 0.0 }))
                            .collect();
                        data.set_numeric(&format!("{}_{}", column, level), indicator)?;
                    }
                    data.drop_column(column)?;
                }
            }
            PreparedStep::ZeroVariance { removed } => {
                for column in removed {
                    data.drop_column(column)?;
                }
            }
            PreparedStep::Normalize { stats } => {
                for (column, mean, sd) in stats {
                    let scaled = data.numeric(column)?.into_iter().map(|x| x.map(|v| (v - mean) / sd)).collect();
                    data.set_numeric(column, scaled)?;
                }
            }
            PreparedStep::Polynomial { bases } => {
                for (column, basis) in bases {
                    let values = data.numeric(column)?;
                    let expanded: Vec<Option<Vec<f64>>> = values.iter().map(|x| x.map(|v| basis.evaluate(v))).collect();
                    for k in 0..basis.degree() {
                        let col = expanded.iter().map(|row| row.as_ref().map(|r| r[k])).collect();
                        data.set_numeric(&format!("{}_poly_{}", column, k + 1), col)?;
                    }
                    data.drop_column(column)?;
                }
            }
        }
        Ok(())
    }
}
