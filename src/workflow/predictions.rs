//! Class probability predictions

use crate::error::{FlowError, Result};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

/// Default probability cut-off for the event level
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Per-row class probabilities in input order, one column per level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    levels: Vec<String>,
    event: usize,
    probabilities: Array2<f64>,
}

impl Predictions {
    pub fn new(levels: Vec<String>, event: usize, probabilities: Array2<f64>) -> Result<Self> {
        if probabilities.ncols() != levels.len() {
            return Err(FlowError::Data(format!(
                "{} probability columns for {} levels",
                probabilities.ncols(),
                levels.len()
            )));
        }
        if event >= levels.len() {
            return Err(FlowError::invalid("event", event, "index outside the level set"));
        }
        Ok(Self {
            levels,
            event,
            probabilities,
        })
    }

    pub fn len(&self) -> usize {
        self.probabilities.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Index of the event level
    pub fn event(&self) -> usize {
        self.event
    }

    pub fn event_level(&self) -> &str {
        &self.levels[self.event]
    }

    pub fn probabilities(&self) -> &Array2<f64> {
        &self.probabilities
    }

    /// Probability of the event level per row
    pub fn event_probabilities(&self) -> Vec<f64> {
        self.probabilities.column(self.event).to_vec()
    }

    /// Hard class indices. With two levels a row is the event when its event
    /// probability is at least `threshold`; otherwise the most probable level
    /// wins, ties going to the lower index.
    pub fn classes(&self, threshold: f64) -> Vec<usize> {
        if self.levels.len() == 2 {
            let other = 1 - self.event;
            return self
                .probabilities
                .column(self.event)
                .iter()
                .map(|&p| if p >= threshold { self.event } else { other })
                .collect();
        }
        self.probabilities
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (k, &p)| if p > best.1 { (k, p) } else { best })
                    .0
            })
            .collect()
    }

    /// Hard class labels
    pub fn class_labels(&self, threshold: f64) -> Vec<String> {
        self.classes(threshold)
            .into_iter()
            .map(|k| self.levels[k].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn levels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_binary_threshold() {
        let proba = array![[0.3, 0.7], [0.6, 0.4], [0.5, 0.5]];
        let preds = Predictions::new(levels(&["0", "1"]), 1, proba).unwrap();
        assert_eq!(preds.classes(0.5), vec![1, 0, 1]);
        assert_eq!(preds.classes(0.8), vec![0, 0, 0]);
        assert_eq!(preds.class_labels(0.35), vec!["1", "1", "1"]);
        assert_eq!(preds.event_probabilities(), vec![0.7, 0.4, 0.5]);
    }

    #[test]
    fn test_event_on_first_level() {
        let proba = array![[0.7, 0.3], [0.2, 0.8]];
        let preds = Predictions::new(levels(&["yes", "no"]), 0, proba).unwrap();
        assert_eq!(preds.classes(0.5), vec![0, 1]);
        assert_eq!(preds.event_level(), "yes");
    }

    #[test]
    fn test_multiclass_argmax() {
        let proba = array![[0.2, 0.5, 0.3], [0.4, 0.4, 0.2]];
        let preds = Predictions::new(levels(&["a", "b", "c"]), 0, proba).unwrap();
        assert_eq!(preds.classes(0.9), vec![1, 0]);
    }

    #[test]
    fn test_shape_checks() {
        let proba = array![[0.2, 0.8]];
        assert!(Predictions::new(levels(&["a", "b", "c"]), 0, proba.clone()).is_err());
        assert!(Predictions::new(levels(&["a", "b"]), 2, proba).is_err());
    }
}
