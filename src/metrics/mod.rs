//! Classification metrics
//!
//! Every metric returns `Option<f64>`: `None` marks an undefined value such
//! as a zero denominator, and the row is kept in result tables.

pub mod confusion;
pub mod roc;

pub use confusion::{BinaryCounts, ConfusionMatrix};
pub use roc::{RocCurve, RocPoint};

use crate::error::{FlowError, Result};
use crate::workflow::Predictions;
use confusion::ratio;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Accuracy,
    Sensitivity,
    Specificity,
    Precision,
    FMeas,
    Kap,
    BrierClass,
    MnLogLoss,
    RocAuc,
}

/// Whether larger or smaller values are better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Maximize,
    Minimize,
}

impl Metric {
    pub const ALL: [Metric; 9] = [
        Metric::Accuracy,
        Metric::Sensitivity,
        Metric::Specificity,
        Metric::Precision,
        Metric::FMeas,
        Metric::Kap,
        Metric::BrierClass,
        Metric::MnLogLoss,
        Metric::RocAuc,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::Sensitivity => "sensitivity",
            Metric::Specificity => "specificity",
            Metric::Precision => "precision",
            Metric::FMeas => "f_meas",
            Metric::Kap => "kap",
            Metric::BrierClass => "brier_class",
            Metric::MnLogLoss => "mn_log_loss",
            Metric::RocAuc => "roc_auc",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Metric::BrierClass | Metric::MnLogLoss => Direction::Minimize,
            _ => Direction::Maximize,
        }
    }

    /// Whether the metric reads probabilities rather than hard classes
    pub fn uses_probabilities(&self) -> bool {
        matches!(self, Metric::BrierClass | Metric::MnLogLoss | Metric::RocAuc)
    }

    fn estimator(n_levels: usize) -> &'static str {
        if n_levels == 2 {
            "binary"
        } else {
            "macro"
        }
    }

    /// Compute this metric
    pub fn compute(&self, truth: &[usize], predictions: &Predictions, threshold: f64) -> Result<Option<f64>> {
        if truth.len() != predictions.len() {
            return Err(FlowError::Metric(format!(
                "truth has {} values but predictions have {}",
                truth.len(),
                predictions.len()
            )));
        }
        if let Some(&bad) = truth.iter().find(|&&t| t >= predictions.levels().len()) {
            return Err(FlowError::Metric(format!(
                "truth class index {} out of range for {} levels",
                bad,
                predictions.levels().len()
            )));
        }
        if self.uses_probabilities() {
            return Ok(match self {
                Metric::BrierClass => brier_class(truth, predictions),
                Metric::MnLogLoss => mn_log_loss(truth, predictions),
                _ => roc_auc(truth, predictions),
            });
        }

        let classes = predictions.classes(threshold);
        let cm = ConfusionMatrix::new(truth, &classes, predictions.levels())?;
        Ok(match self {
            Metric::Accuracy => cm.accuracy(),
            Metric::Kap => cm.kappa(),
            _ => class_rate(*self, &cm, predictions),
        })
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Metric {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.to_lowercase();
        let key = match lower.as_str() {
            "auc" => "roc_auc",
            "recall" | "sens" => "sensitivity",
            "spec" => "specificity",
            "f1" => "f_meas",
            "kappa" => "kap",
            "brier" => "brier_class",
            "log_loss" | "logloss" => "mn_log_loss",
            other => other,
        };
        Metric::ALL
            .iter()
            .find(|m| m.name() == key)
            .copied()
            .ok_or_else(|| FlowError::invalid("metric", s, "unknown metric"))
    }
}

/// Sensitivity, specificity, precision or F1 for the event level, or their
/// macro average over levels when there are more than two
fn class_rate(metric: Metric, cm: &ConfusionMatrix, predictions: &Predictions) -> Option<f64> {
    let rate_for = |positive: usize| -> Option<f64> {
        let c = cm.binary(positive);
        match metric {
            Metric::Sensitivity => ratio(c.tp, c.tp + c.fn_),
            Metric::Specificity => ratio(c.tn, c.tn + c.fp),
            Metric::Precision => ratio(c.tp, c.tp + c.fp),
            _ => {
                let precision = ratio(c.tp, c.tp + c.fp)?;
                let recall = ratio(c.tp, c.tp + c.fn_)?;
                if precision + recall == 0.0 {
                    None
                } else {
                    Some(2.0 * precision * recall / (precision + recall))
                }
            }
        }
    };

    if predictions.levels().len() == 2 {
        return rate_for(predictions.event());
    }
    macro_average((0..predictions.levels().len()).map(rate_for))
}

/// Mean of the defined values, `None` if there are none
fn macro_average(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let defined: Vec<f64> = values.flatten().collect();
    if defined.is_empty() {
        None
    } else {
        Some(defined.iter().sum::<f64>() / defined.len() as f64)
    }
}

/// Truth indices that line up with the probability matrix
fn aligned(truth: &[usize], predictions: &Predictions) -> bool {
    let proba = predictions.probabilities();
    truth.len() == proba.nrows() && truth.iter().all(|&t| t < proba.ncols())
}

/// (1/n) Σ_i Σ_k (y_ik − p_ik)² with one-hot truth; `None` when empty or when
/// `truth` does not match the predictions
pub fn brier_class(truth: &[usize], predictions: &Predictions) -> Option<f64> {
    if truth.is_empty() || !aligned(truth, predictions) {
        return None;
    }
    let proba = predictions.probabilities();
    let total: f64 = truth
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            proba
                .row(i)
                .iter()
                .enumerate()
                .map(|(k, &p)| {
                    let y = if k == t { 1.0 } else { 0.0 };
                    (y - p).powi(2)
                })
                .sum::<f64>()
        })
        .sum();
    Some(total / truth.len() as f64)
}

/// Mean negative log probability of the true level, clipped away from 0 and 1
pub fn mn_log_loss(truth: &[usize], predictions: &Predictions) -> Option<f64> {
    if truth.is_empty() || !aligned(truth, predictions) {
        return None;
    }
    let proba = predictions.probabilities();
    let total: f64 = truth
        .iter()
        .enumerate()
        .map(|(i, &t)| -proba[[i, t]].clamp(1e-15, 1.0 - 1e-15).ln())
        .sum();
    Some(total / truth.len() as f64)
}

/// Area under the ROC curve of the event level; macro one-vs-rest for more
/// than two levels
pub fn roc_auc(truth: &[usize], predictions: &Predictions) -> Option<f64> {
    if !aligned(truth, predictions) {
        return None;
    }
    let proba = predictions.probabilities();
    let auc_for = |k: usize| -> Option<f64> {
        let scores = proba.column(k).to_vec();
        RocCurve::new(truth, &scores, k).map(|c| c.auc())
    };
    if predictions.levels().len() == 2 {
        return auc_for(predictions.event());
    }
    macro_average((0..predictions.levels().len()).map(auc_for))
}

/// ROC curve of the event level
pub fn roc_curve(truth: &[usize], predictions: &Predictions) -> Option<RocCurve> {
    let scores = predictions.event_probabilities();
    RocCurve::new(truth, &scores, predictions.event())
}

/// One metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEstimate {
    pub metric: Metric,
    /// `binary` for two levels, `macro` otherwise
    pub estimator: String,
    /// `None` when undefined; serialised as `null`
    pub estimate: Option<f64>,
}

/// A named group of metrics evaluated together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    metrics: Vec<Metric>,
}

impl Default for MetricSet {
    fn default() -> Self {
        Self::new(vec![Metric::Accuracy, Metric::RocAuc, Metric::BrierClass])
    }
}

impl MetricSet {
    /// Duplicates are dropped, first occurrence kept
    pub fn new(metrics: Vec<Metric>) -> Self {
        let mut unique = Vec::with_capacity(metrics.len());
        for m in metrics {
            if !unique.contains(&m) {
                unique.push(m);
            }
        }
        Self { metrics: unique }
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn contains(&self, metric: Metric) -> bool {
        self.metrics.contains(&metric)
    }

    /// First metric, used when no ranking metric is named
    pub fn primary(&self) -> Option<Metric> {
        self.metrics.first().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// One row per metric, in set order. Hard classes are derived from the
    /// stored probabilities at `threshold`.
    pub fn evaluate(&self, truth: &[usize], predictions: &Predictions, threshold: f64) -> Result<Vec<MetricEstimate>> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(FlowError::invalid("threshold", threshold, "must lie in [0, 1]"));
        }
        let n_levels = predictions.levels().len();
        self.metrics
            .iter()
            .map(|&metric| {
                Ok(MetricEstimate {
                    metric,
                    estimator: Metric::estimator(n_levels).to_string(),
                    estimate: metric.compute(truth, predictions, threshold)?,
                })
            })
            .collect()
    }
}
