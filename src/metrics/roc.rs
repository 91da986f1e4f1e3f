//! ROC curve and area under it

use serde::{Deserialize, Serialize};

/// One operating point of a ROC curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RocPoint {
    /// Rows with score >= threshold are called positive
    pub threshold: f64,
    pub false_positive_rate: f64,
    pub true_positive_rate: f64,
}

/// ROC curve from (0, 0) to (1, 1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    points: Vec<RocPoint>,
}

impl RocCurve {
    /// Build the curve for `positive` from scores of that level.
    ///
    /// Distinct scores are visited in descending order, so tied scores move
    /// the curve diagonally in one step. Returns `None` when the truth has no
    /// positives or no negatives, or when any score is NaN.
    pub fn new(truth: &[usize], scores: &[f64], positive: usize) -> Option<Self> {
        let n_pos = truth.iter().filter(|&&t| t == positive).count();
        let n_neg = truth.len() - n_pos;
        if n_pos == 0 || n_neg == 0 || truth.len() != scores.len() || scores.iter().any(|s| s.is_nan()) {
            return None;
        }

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let mut points = Vec::with_capacity(order.len() + 1);
        points.push(RocPoint {
            threshold: f64::INFINITY,
            false_positive_rate: 0.0,
            true_positive_rate: 0.0,
        });

        let (mut tp, mut fp) = (0usize, 0usize);
        let mut i = 0;
        while i < order.len() {
            let threshold = scores[order[i]];
            while i < order.len() && scores[order[i]].total_cmp(&threshold).is_eq() {
                if truth[order[i]] == positive {
                    tp += 1;
                } else {
                    fp += 1;
                }
                i += 1;
            }
            points.push(RocPoint {
                threshold,
                false_positive_rate: fp as f64 / n_neg as f64,
                true_positive_rate: tp as f64 / n_pos as f64,
            });
        }

        Some(Self { points })
    }

    pub fn points(&self) -> &[RocPoint] {
        &self.points
    }

    /// Trapezoidal area under the curve
    pub fn auc(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| {
                let dx = w[1].false_positive_rate - w[0].false_positive_rate;
                dx * (w[0].true_positive_rate + w[1].true_positive_rate) / 2.0
            })
            .sum()
    }
}
