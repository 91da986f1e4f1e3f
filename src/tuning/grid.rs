//! Parameter ranges and candidate grids

use crate::data::Dataset;
use crate::error::{FlowError, Result};
use crate::models::{compare_param_sets, ParamSet, ParamValue};
use crate::workflow::Workflow;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Scale on which a range is spaced and sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scale {
    Linear,
    /// Bounds are powers of ten; values are `10^x`
    Log10,
}

/// Search range of one tuning id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub id: String,
    /// Parameter the id is bound to
    pub name: String,
    /// Lower bound on the range's scale
    pub lower: f64,
    /// Upper bound on the range's scale
    pub upper: f64,
    pub scale: Scale,
    pub integer: bool,
}

impl ParamRange {
    /// Integer range `lower..=upper`
    pub fn int(id: &str, lower: i64, upper: i64) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            lower: lower as f64,
            upper: upper as f64,
            scale: Scale::Linear,
            integer: true,
        }
    }

    /// Float range `lower..=upper`
    pub fn float(id: &str, lower: f64, upper: f64) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            lower,
            upper,
            scale: Scale::Linear,
            integer: false,
        }
    }

    /// Float range `10^lower ..= 10^upper`
    pub fn log10(id: &str, lower: f64, upper: f64) -> Self {
        Self {
            scale: Scale::Log10,
            ..Self::float(id, lower, upper)
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Default range for a model or step parameter. `n_predictors` bounds `mtry`.
    pub fn default_for(id: &str, name: &str, n_predictors: usize) -> Result<Self> {
        let range = match name {
            "degree" => Self::int(id, 1, 3),
            "penalty" => Self::log10(id, -10.0, 0.0),
            "cost_complexity" => Self::log10(id, -10.0, -1.0),
            "tree_depth" => Self::int(id, 1, 15),
            "min_n" => Self::int(id, 2, 40),
            "trees" => Self::int(id, 1, 2000),
            "max_iter" => Self::int(id, 10, 1000),
            "mtry" => {
                if n_predictors == 0 {
                    return Err(FlowError::invalid("mtry", 0, "no predictors to sample from"));
                }
                Self::int(id, 1, n_predictors as i64)
            }
            other => {
                return Err(FlowError::invalid(
                    id,
                    other,
                    "no default range for this parameter; supply one",
                ))
            }
        };
        Ok(range.with_name(name))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lower.is_finite() && self.upper.is_finite()) || self.lower > self.upper {
            return Err(FlowError::invalid(
                &self.id,
                format!("[{}, {}]", self.lower, self.upper),
                "range bounds must be finite with lower <= upper",
            ));
        }
        Ok(())
    }

    fn value_at(&self, x: f64) -> ParamValue {
        let v = match self.scale {
            Scale::Linear => x,
            Scale::Log10 => 10f64.powf(x),
        };
        if self.integer {
            ParamValue::Int(v.round() as i64)
        } else {
            ParamValue::Float(v)
        }
    }

    /// `levels` equally spaced values on the range's scale, duplicates
    /// removed after integer rounding
    pub fn regular(&self, levels: usize) -> Vec<ParamValue> {
        let mut values: Vec<ParamValue> = match levels {
            0 => Vec::new(),
            1 => vec![self.value_at(self.lower)],
            _ => (0..levels)
                .map(|i| {
                    let t = i as f64 / (levels - 1) as f64;
                    self.value_at(self.lower + t * (self.upper - self.lower))
                })
                .collect(),
        };
        values.dedup();
        values
    }

    /// One uniform draw on the range's scale
    pub fn sample<R: Rng>(&self, rng: &mut R) -> ParamValue {
        if self.integer && self.scale == Scale::Linear {
            return ParamValue::Int(rng.gen_range(self.lower.round() as i64..=self.upper.round() as i64));
        }
        let x = if self.upper > self.lower {
            rng.gen_range(self.lower..=self.upper)
        } else {
            self.lower
        };
        self.value_at(x)
    }
}

/// How candidates are generated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Grid {
    /// Candidates given as they are
    Explicit { candidates: Vec<ParamSet> },
    /// Cross product of `levels` values per range
    Regular { levels: usize },
    /// `size` distinct random draws
    Random { size: usize, seed: u64 },
}

impl Default for Grid {
    fn default() -> Self {
        Grid::Regular { levels: 3 }
    }
}

/// A grid plus range overrides keyed by tuning id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub grid: Grid,
    #[serde(default)]
    pub ranges: Vec<ParamRange>,
}

impl From<Grid> for GridSpec {
    fn from(grid: Grid) -> Self {
        Self {
            grid,
            ranges: Vec::new(),
        }
    }
}

impl GridSpec {
    pub fn new(grid: Grid) -> Self {
        grid.into()
    }

    /// Replace the default range of `range.id`
    pub fn with_range(mut self, range: ParamRange) -> Self {
        self.ranges.retain(|r| r.id != range.id);
        self.ranges.push(range);
        self
    }

    /// Ranges for every tuning id of `workflow`, overrides first
    pub fn ranges_for(&self, workflow: &Workflow, data: &Dataset) -> Result<Vec<ParamRange>> {
        let n_predictors = workflow.preprocessor().to_recipe().raw_predictors(data)?.len();
        workflow
            .tunable_params()
            .into_iter()
            .map(|(id, name)| match self.ranges.iter().find(|r| r.id == id) {
                Some(r) => {
                    r.validate()?;
                    Ok(r.clone().with_name(&name))
                }
                None => ParamRange::default_for(&id, &name, n_predictors),
            })
            .collect()
    }

    /// Candidate parameter sets for `workflow`. A workflow without tuning
    /// ids yields a single empty candidate.
    pub fn candidates(&self, workflow: &Workflow, data: &Dataset) -> Result<Vec<ParamSet>> {
        if !workflow.is_tunable() {
            return Ok(vec![ParamSet::new()]);
        }
        let candidates = match &self.grid {
            Grid::Explicit { candidates } => {
                let ids: Vec<String> = workflow.tunable_params().into_iter().map(|(id, _)| id).collect();
                for candidate in candidates {
                    if let Some(missing) = ids.iter().find(|id| !candidate.contains_key(*id)) {
                        return Err(FlowError::UnresolvedParameter(missing.clone()));
                    }
                }
                candidates.clone()
            }
            Grid::Regular { levels } => regular_grid(&self.ranges_for(workflow, data)?, *levels)?,
            Grid::Random { size, seed } => random_grid(&self.ranges_for(workflow, data)?, *size, *seed)?,
        };
        if candidates.is_empty() {
            return Err(FlowError::invalid("grid", "empty", "produced no candidates"));
        }
        debug!(candidates = candidates.len(), "grid generated");
        Ok(candidates)
    }
}

/// Cross product of each range's regular values; the first range varies slowest
pub fn regular_grid(ranges: &[ParamRange], levels: usize) -> Result<Vec<ParamSet>> {
    if levels == 0 {
        return Err(FlowError::invalid("levels", levels, "must be at least 1"));
    }
    let mut grid = vec![ParamSet::new()];
    for range in ranges {
        range.validate()?;
        let values = range.regular(levels);
        grid = grid
            .into_iter()
            .flat_map(|partial| {
                values.iter().map(move |v| {
                    let mut next = partial.clone();
                    next.insert(range.id.clone(), v.clone());
                    next
                })
            })
            .collect();
    }
    Ok(grid)
}

/// Up to `size` distinct draws from the ranges. Small integer ranges may
/// hold fewer distinct candidates than requested.
pub fn random_grid(ranges: &[ParamRange], size: usize, seed: u64) -> Result<Vec<ParamSet>> {
    if size == 0 {
        return Err(FlowError::invalid("size", size, "must be at least 1"));
    }
    for range in ranges {
        range.validate()?;
    }
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut grid: Vec<ParamSet> = Vec::with_capacity(size);
    let max_draws = size.saturating_mul(20);
    for _ in 0..max_draws {
        if grid.len() == size {
            break;
        }
        let candidate: ParamSet = ranges.iter().map(|r| (r.id.clone(), r.sample(&mut rng))).collect();
        if !grid.iter().any(|g| compare_param_sets(g, &candidate).is_eq()) {
            grid.push(candidate);
        }
    }
    Ok(grid)
}
