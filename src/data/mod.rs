//! Tabular dataset container
//!
//! A [`Dataset`] wraps a polars `DataFrame` and only admits two column kinds:
//! numeric (any integer, float or boolean dtype) and categorical (string).
//! Everything downstream (splits, recipes, models) reads columns through the
//! typed accessors here.

pub mod loader;
pub mod split;

pub use loader::{read_csv, read_csv_bytes, DataSource, LoadOptions};
pub use split::{initial_split, InitialSplit};

use crate::error::{FlowError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a dataset column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

impl ColumnKind {
    fn of(dtype: &DataType) -> Option<Self> {
        match dtype {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Boolean => Some(ColumnKind::Numeric),
            DataType::String => Some(ColumnKind::Categorical),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Numeric => write!(f, "numeric"),
            ColumnKind::Categorical => write!(f, "categorical"),
        }
    }
}

/// Ordered column names and kinds
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<(String, ColumnKind)>,
}

impl Schema {
    pub fn new(columns: Vec<(String, ColumnKind)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<ColumnKind> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, k)| *k)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ColumnKind)> {
        self.columns.iter().map(|(n, k)| (n.as_str(), *k))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Check `other` against this schema for every column except `skip`.
    /// Returns the first missing or mismatched column.
    pub fn check(&self, other: &Schema, skip: &str) -> Result<()> {
        for (name, expected) in self.iter().filter(|(n, _)| *n != skip) {
            match other.get(name) {
                None => {
                    return Err(FlowError::SchemaMismatch {
                        column: name.to_string(),
                        expected: expected.to_string(),
                        found: "missing".to_string(),
                    })
                }
                Some(found) if found != expected => {
                    return Err(FlowError::SchemaMismatch {
                        column: name.to_string(),
                        expected: expected.to_string(),
                        found: found.to_string(),
                    })
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Render a numeric cell as a label key (`1.0` becomes `"1"`)
pub(crate) fn numeric_key(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

/// Tabular dataset with a fixed schema
#[derive(Debug, Clone)]
pub struct Dataset {
    df: DataFrame,
}

impl Dataset {
    /// Wrap a DataFrame; every column must be numeric or string typed
    pub fn new(df: DataFrame) -> Result<Self> {
        for col in df.get_columns() {
            if ColumnKind::of(col.dtype()).is_none() {
                return Err(FlowError::Data(format!(
                    "column '{}' has unsupported dtype {:?}",
                    col.name(),
                    col.dtype()
                )));
            }
        }
        Ok(Self { df })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.df
    }

    pub fn into_frame(self) -> DataFrame {
        self.df
    }

    pub fn n_rows(&self) -> usize {
        self.df.height()
    }

    pub fn n_cols(&self) -> usize {
        self.df.width()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.df.column(name).is_ok()
    }

    pub fn schema(&self) -> Schema {
        Schema::new(
            self.df
                .get_columns()
                .iter()
                .filter_map(|c| ColumnKind::of(c.dtype()).map(|k| (c.name().to_string(), k)))
                .collect(),
        )
    }

    pub fn kind(&self, name: &str) -> Result<ColumnKind> {
        let col = self.column(name)?;
        ColumnKind::of(col.dtype())
            .ok_or_else(|| FlowError::Data(format!("column '{}' has unsupported dtype", name)))
    }

    fn column(&self, name: &str) -> Result<&Column> {
        self.df
            .column(name)
            .map_err(|_| FlowError::ColumnNotFound(name.to_string()))
    }

    /// Values of a numeric column as f64, nulls kept
    pub fn numeric(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let kind = self.kind(name)?;
        if kind != ColumnKind::Numeric {
            return Err(FlowError::SchemaMismatch {
                column: name.to_string(),
                expected: ColumnKind::Numeric.to_string(),
                found: kind.to_string(),
            });
        }
        let series = self
            .column(name)?
            .as_materialized_series()
            .cast(&DataType::Float64)?;
        let ca = series.f64()?;
        Ok(ca.into_iter().collect())
    }

    /// Values of a categorical column, nulls kept
    pub fn categorical(&self, name: &str) -> Result<Vec<Option<String>>> {
        let kind = self.kind(name)?;
        if kind != ColumnKind::Categorical {
            return Err(FlowError::SchemaMismatch {
                column: name.to_string(),
                expected: ColumnKind::Categorical.to_string(),
                found: kind.to_string(),
            });
        }
        let series = self.column(name)?.as_materialized_series();
        let ca = series.str()?;
        Ok(ca.into_iter().map(|v| v.map(str::to_string)).collect())
    }

    /// Values of any column rendered as string keys
    pub fn keys(&self, name: &str) -> Result<Vec<Option<String>>> {
        match self.kind(name)? {
            ColumnKind::Categorical => self.categorical(name),
            ColumnKind::Numeric => Ok(self
                .numeric(name)?
                .into_iter()
                .map(|v| v.map(numeric_key))
                .collect()),
        }
    }

    /// Outcome labels; a null label is an error
    pub fn labels(&self, name: &str) -> Result<Vec<String>> {
        self.keys(name)?
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                v.ok_or_else(|| FlowError::Data(format!("column '{}' has a null label at row {}", name, i)))
            })
            .collect()
    }

    /// Row counts per distinct value of a column
    pub fn class_counts(&self, name: &str) -> Result<BTreeMap<String, usize>> {
        let mut counts = BTreeMap::new();
        for key in self.keys(name)? {
            *counts.entry(key.unwrap_or_else(|| "NA".to_string())).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Select rows by position, in the given order
    pub fn take(&self, indices: &[usize]) -> Result<Dataset> {
        let n = self.n_rows();
        if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
            return Err(FlowError::Data(format!("row index {} out of bounds for {} rows", bad, n)));
        }
        let idx = IdxCa::from_vec(
            "idx".into(),
            indices.iter().map(|&i| i as IdxSize).collect(),
        );
        Ok(Self { df: self.df.take(&idx)? })
    }

    /// Keep only `names`, in that order
    pub fn select(&self, names: &[String]) -> Result<Dataset> {
        if let Some(missing) = names.iter().find(|n| !self.has_column(n)) {
            return Err(FlowError::ColumnNotFound(missing.clone()));
        }
        Ok(Self { df: self.df.select(names.iter().map(|s| s.as_str()))? })
    }

    /// Replace or append a numeric column
    pub fn set_numeric(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<()> {
        self.set_column(Column::new(name.into(), values))
    }

    /// Replace or append a categorical column
    pub fn set_categorical(&mut self, name: &str, values: Vec<Option<String>>) -> Result<()> {
        self.set_column(Column::new(name.into(), values))
    }

    fn set_column(&mut self, column: Column) -> Result<()> {
        if column.len() != self.n_rows() && self.n_cols() > 0 {
            return Err(FlowError::Data(format!(
                "column '{}' has {} rows, dataset has {}",
                column.name(),
                column.len(),
                self.n_rows()
            )));
        }
        self.df.with_column(column)?;
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<()> {
        self.column(name)?;
        self.df = self.df.drop(name)?;
        Ok(())
    }

    /// Recode a raw outcome column into string labels.
    ///
    /// Cell values are matched by their key form (`0`, `1`, or the raw string).
    /// A non-null value missing from `mapping` is an error.
    pub fn recode_outcome(&self, column: &str, mapping: &BTreeMap<String, String>) -> Result<Dataset> {
        let recoded = self
            .keys(column)?
            .into_iter()
            .map(|v| match v {
                None => Ok(None),
                Some(key) => mapping.get(&key).cloned().map(Some).ok_or_else(|| {
                    FlowError::Data(format!("column '{}' has value '{}' with no recoding", column, key))
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut out = self.clone();
        out.set_categorical(column, recoded)?;
        Ok(out)
    }
}

/// Outcome levels seen at fit time plus the event level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSet {
    levels: Vec<String>,
    event: usize,
}

impl LabelSet {
    /// Sorted distinct levels of `labels`; the event level defaults to the first one
    pub fn from_labels(labels: &[String], event_level: Option<&str>) -> Result<Self> {
        let mut levels: Vec<String> = labels.to_vec();
        levels.sort();
        levels.dedup();

        if levels.len() < 2 {
            return Err(FlowError::Training(format!(
                "outcome needs at least 2 levels, found {}",
                levels.len()
            )));
        }

        let event = match event_level {
            None => 0,
            Some(level) => levels.iter().position(|l| l == level).ok_or_else(|| {
                FlowError::invalid("event_level", level, "level not present in outcome")
            })?,
        };

        Ok(Self { levels, event })
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn is_binary(&self) -> bool {
        self.levels.len() == 2
    }

    pub fn event(&self) -> usize {
        self.event
    }

    pub fn event_level(&self) -> &str {
        &self.levels[self.event]
    }

    pub fn index_of(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }

    /// Map labels to level indices; unseen labels are an error
    pub fn encode(&self, labels: &[String]) -> Result<Vec<usize>> {
        labels
            .iter()
            .map(|l| {
                self.index_of(l)
                    .ok_or_else(|| FlowError::Data(format!("label '{}' was not seen at fit time", l)))
            })
            .collect()
    }
}
