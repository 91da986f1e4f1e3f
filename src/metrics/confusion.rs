//! Confusion matrix

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Counts of (truth, predicted) level pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    levels: Vec<String>,
    /// `counts[truth][predicted]`
    counts: Vec<Vec<usize>>,
}

/// Binary cell counts for one event level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryCounts {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_: usize,
}

pub(crate) fn ratio(num: usize, den: usize) -> Option<f64> {
    if den == 0 {
        None
    } else {
        Some(num as f64 / den as f64)
    }
}

impl ConfusionMatrix {
    /// Tabulate class indices into `levels`
    pub fn new(truth: &[usize], predicted: &[usize], levels: &[String]) -> Result<Self> {
        if truth.len() != predicted.len() {
            return Err(FlowError::Metric(format!(
                "truth has {} values but predictions have {}",
                truth.len(),
                predicted.len()
            )));
        }
        let k = levels.len();
        let mut counts = vec![vec![0usize; k]; k];
        for (&t, &p) in truth.iter().zip(predicted) {
            if t >= k || p >= k {
                return Err(FlowError::Metric(format!("class index out of range for {} levels", k)));
            }
            counts[t][p] += 1;
        }
        Ok(Self {
            levels: levels.to_vec(),
            counts,
        })
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn count(&self, truth: usize, predicted: usize) -> usize {
        self.counts[truth][predicted]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn trace(&self) -> usize {
        (0..self.levels.len()).map(|i| self.counts[i][i]).sum()
    }

    /// Rows with truth level `k`
    pub fn truth_total(&self, k: usize) -> usize {
        self.counts[k].iter().sum()
    }

    /// Rows predicted as level `k`
    pub fn predicted_total(&self, k: usize) -> usize {
        self.counts.iter().map(|row| row[k]).sum()
    }

    /// One-vs-rest counts with `event` as the positive level
    pub fn binary(&self, event: usize) -> BinaryCounts {
        let tp = self.counts[event][event];
        let fn_ = self.truth_total(event) - tp;
        let fp = self.predicted_total(event) - tp;
        let tn = self.total() - tp - fn_ - fp;
        BinaryCounts { tp, fp, tn, fn_ }
    }

    /// trace / total
    pub fn accuracy(&self) -> Option<f64> {
        ratio(self.trace(), self.total())
    }

    /// Cohen's kappa from the marginal class shares
    pub fn kappa(&self) -> Option<f64> {
        let n = self.total();
        if n == 0 {
            return None;
        }
        let n = n as f64;
        let observed = self.trace() as f64 / n;
        let expected: f64 = (0..self.levels.len())
            .map(|k| (self.truth_total(k) as f64 / n) * (self.predicted_total(k) as f64 / n))
            .sum();
        if (1.0 - expected).abs() < f64::EPSILON {
            None
        } else {
            Some((observed - expected) / (1.0 - expected))
        }
    }
}

impl fmt::Display for ConfusionMatrix {
    /// Predictions down the side, truth across the top
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .levels
            .iter()
            .map(|l| l.len())
            .chain(self.counts.iter().flatten().map(|c| c.to_string().len()))
            .max()
            .unwrap_or(1)
            .max(5);

        write!(f, "{:>10}", "Truth")?;
        for level in &self.levels {
            write!(f, " {:>width$}", level, width = width)?;
        }
        writeln!(f)?;
        writeln!(f, "{:<10}", "Prediction")?;
        for (p, level) in self.levels.iter().enumerate() {
            write!(f, "{:>10}", level)?;
            for t in 0..self.levels.len() {
                write!(f, " {:>width$}", self.counts[t][p], width = width)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
