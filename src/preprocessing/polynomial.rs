//! Polynomial basis expansion

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};

/// Polynomial basis learned from one numeric column.
///
/// The orthogonal basis is built with the three-term recurrence
/// `P0 = 1`, `P1 = x - a0`, `P(k+1) = (x - a_k) P_k - (n_k / n_(k-1)) P_(k-1)`
/// where `n_k = Σ P_k²` and `a_k = Σ x P_k² / n_k` over the training values.
/// Column `k` is `P_k / sqrt(n_k)`, so on the training data the columns are
/// orthonormal and orthogonal to the constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolyBasis {
    degree: usize,
    raw: bool,
    /// `a_0 .. a_(degree-1)`
    alpha: Vec<f64>,
    /// `n_0 .. n_degree`
    norm2: Vec<f64>,
}

impl PolyBasis {
    /// Learn the basis from the observed (non-null) values
    pub fn fit(values: &[f64], degree: usize, raw: bool) -> Result<Self> {
        if degree == 0 {
            return Err(FlowError::invalid("degree", degree, "must be at least 1"));
        }
        if raw {
            return Ok(Self {
                degree,
                raw,
                alpha: Vec::new(),
                norm2: Vec::new(),
            });
        }

        let mut distinct = values.to_vec();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();
        if distinct.len() <= degree {
            return Err(FlowError::invalid(
                "degree",
                degree,
                &format!("needs at least {} distinct values, found {}", degree + 1, distinct.len()),
            ));
        }

        let n = values.len();
        let mut alpha = Vec::with_capacity(degree);
        let mut norm2 = Vec::with_capacity(degree + 1);

        let mut prev = vec![0.0; n];
        let mut cur = vec![1.0; n];
        norm2.push(n as f64);

        for k in 0..degree {
            let nk = norm2[k];
            let a = values.iter().zip(&cur).map(|(x, p)| x * p * p).sum::<f64>() / nk;
            alpha.push(a);

            let ratio = if k == 0 { 0.0 } else { nk / norm2[k - 1] };
            let next: Vec<f64> = values
                .iter()
                .zip(cur.iter().zip(&prev))
                .map(|(x, (p, q))| (x - a) * p - ratio * q)
                .collect();
            let n_next: f64 = next.iter().map(|p| p * p).sum();
            if !(n_next.is_finite() && n_next > 1e-12 * nk.max(1.0)) {
                return Err(FlowError::invalid("degree", degree, "basis is numerically degenerate"));
            }
            norm2.push(n_next);
            prev = cur;
            cur = next;
        }

        Ok(Self {
            degree,
            raw,
            alpha,
            norm2,
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Basis columns `1..=degree` for one value
    pub fn evaluate(&self, x: f64) -> Vec<f64> {
        if self.raw {
            return (1..=self.degree).map(|k| x.powi(k as i32)).collect();
        }
        let mut out = Vec::with_capacity(self.degree);
        let mut prev = 1.0;
        let mut cur = x - self.alpha[0];
        out.push(cur / self.norm2[1].sqrt());
        for k in 1..self.degree {
            let next = (x - self.alpha[k]) * cur - (self.norm2[k] / self.norm2[k - 1]) * prev;
            out.push(next / self.norm2[k + 1].sqrt());
            prev = cur;
            cur = next;
        }
        out
    }
}
