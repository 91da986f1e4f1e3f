//! Binary logistic regression

use crate::error::{FlowError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Cholesky factor `L` of a symmetric positive-definite matrix (`A = L Lᵀ`)
fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solve `L Lᵀ x = b` by forward then backward substitution
fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }
    x
}

/// Factor `a`, adding a small ridge to the diagonal if it is not positive definite
fn factor_with_ridge(a: &Array2<f64>) -> Option<Array2<f64>> {
    if let Some(l) = cholesky(a) {
        return Some(l);
    }
    let n = a.nrows();
    let ridge = 1e-8 * a.diag().iter().map(|v| v.abs()).sum::<f64>().max(1.0) / n as f64;
    let mut reg = a.clone();
    for k in 0..n {
        reg[[k, k]] += ridge;
    }
    cholesky(&reg)
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Logistic regression solver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LogisticSolver {
    /// Iteratively reweighted least squares (Newton's method)
    Irls,
    /// Batch gradient descent
    GradientDescent { learning_rate: f64 },
}

/// Fitted binary logistic regression.
///
/// Models the probability of the second outcome level; the first level gets
/// the complement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    /// Intercept followed by one coefficient per feature
    coefficients: Array1<f64>,
    /// Standard errors, same layout as `coefficients` (IRLS only)
    std_errors: Option<Array1<f64>>,
    iterations: usize,
    converged: bool,
}

impl LogisticModel {
    /// Fit on a design matrix without intercept column; `y` holds class
    /// indices 0 or 1. `penalty` is an L2 penalty on the non-intercept terms.
    pub fn fit(x: &Array2<f64>, y: &[usize], penalty: f64, max_iter: usize, solver: LogisticSolver) -> Result<Self> {
        let n = x.nrows();
        if n != y.len() {
            return Err(FlowError::Training(format!(
                "design matrix has {} rows but outcome has {}",
                n,
                y.len()
            )));
        }
        if n == 0 {
            return Err(FlowError::Training("cannot fit on zero rows".to_string()));
        }
        if let Some(&bad) = y.iter().find(|&&c| c > 1) {
            return Err(FlowError::Training(format!(
                "logistic regression needs a binary outcome, found class index {}",
                bad
            )));
        }
        if penalty < 0.0 {
            return Err(FlowError::invalid("penalty", penalty, "must be non-negative"));
        }

        // Prepend the intercept column
        let mut design = Array2::ones((n, x.ncols() + 1));
        design.slice_mut(ndarray::s![.., 1..]).assign(x);
        let target: Array1<f64> = y.iter().map(|&c| c as f64).collect();

        match solver {
            LogisticSolver::Irls => Self::fit_irls(&design, &target, penalty, max_iter),
            LogisticSolver::GradientDescent { learning_rate } => {
                Ok(Self::fit_gradient_descent(&design, &target, penalty, max_iter, learning_rate))
            }
        }
    }

    fn penalty_matrix(p: usize, n: usize, penalty: f64) -> Array2<f64> {
        let mut pen = Array2::zeros((p, p));
        for j in 1..p {
            pen[[j, j]] = penalty * n as f64;
        }
        pen
    }

    fn fit_irls(design: &Array2<f64>, y: &Array1<f64>, penalty: f64, max_iter: usize) -> Result<Self> {
        let (n, p) = design.dim();
        let pen = Self::penalty_matrix(p, n, penalty);
        let mut beta = Array1::<f64>::zeros(p);
        let mut deviance = f64::INFINITY;
        let mut converged = false;
        let mut iterations = 0;
        let mut last_factor = None;

        for iter in 0..max_iter.max(1) {
            iterations = iter + 1;
            let eta = design.dot(&beta);
            let mu = eta.mapv(|e| sigmoid(e).clamp(1e-10, 1.0 - 1e-10));
            let w = mu.mapv(|m| m * (1.0 - m));

            // Working response z = eta + (y - mu) / w
            let z: Array1<f64> = &eta + &((y - &mu) / &w);

            let weighted = design * &w.view().insert_axis(Axis(1));
            let xtwx = design.t().dot(&weighted) + &pen;
            let xtwz = weighted.t().dot(&z);

            let l = factor_with_ridge(&xtwx).ok_or_else(|| {
                FlowError::Training("logistic regression normal equations are singular".to_string())
            })?;
            beta = cholesky_solve(&l, &xtwz);
            last_factor = Some(l);

            let new_deviance = Self::deviance(design, y, &beta);
            debug!(iteration = iterations, deviance = new_deviance, "irls step");
            if !new_deviance.is_finite() {
                return Err(FlowError::Training("logistic regression diverged".to_string()));
            }
            if (new_deviance - deviance).abs() / (new_deviance.abs() + 0.1) < 1e-8 {
                deviance = new_deviance;
                converged = true;
                break;
            }
            deviance = new_deviance;
        }

        if !converged {
            warn!(iterations, deviance, "logistic regression did not converge");
        }

        // Standard errors from the diagonal of (XᵀWX + P)⁻¹
        let std_errors = last_factor.map(|l| {
            (0..p)
                .map(|j| {
                    let mut e = Array1::zeros(p);
                    e[j] = 1.0;
                    cholesky_solve(&l, &e)[j].max(0.0).sqrt()
                })
                .collect::<Array1<f64>>()
        });

        Ok(Self {
            coefficients: beta,
            std_errors,
            iterations,
            converged,
        })
    }

    fn fit_gradient_descent(
        design: &Array2<f64>,
        y: &Array1<f64>,
        penalty: f64,
        max_iter: usize,
        learning_rate: f64,
    ) -> Self {
        let (n, p) = design.dim();
        let mut beta = Array1::<f64>::zeros(p);
        let mut converged = false;
        let mut iterations = 0;

        for iter in 0..max_iter {
            iterations = iter + 1;
            let mu = design.dot(&beta).mapv(sigmoid);
            let errors = &mu - y;
            let mut grad = design.t().dot(&errors) / n as f64;
            for j in 1..p {
                grad[j] += penalty * beta[j];
            }

            let grad_norm = grad.mapv(|v| v * v).sum().sqrt();
            if grad_norm < 1e-6 {
                converged = true;
                break;
            }
            beta = beta - learning_rate * grad;
        }

        if !converged {
            warn!(iterations, "gradient descent stopped before convergence");
        }

        Self {
            coefficients: beta,
            std_errors: None,
            iterations,
            converged,
        }
    }

    fn deviance(design: &Array2<f64>, y: &Array1<f64>, beta: &Array1<f64>) -> f64 {
        let mu = design.dot(beta);
        -2.0 * mu
            .iter()
            .zip(y.iter())
            .map(|(&eta, &yi)| {
                let p = sigmoid(eta).clamp(1e-15, 1.0 - 1e-15);
                yi * p.ln() + (1.0 - yi) * (1.0 - p).ln()
            })
            .sum::<f64>()
    }

    /// `n × 2` class probabilities
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let p = self.coefficients.len() - 1;
        if x.ncols() != p {
            return Err(FlowError::Data(format!(
                "model was fitted on {} features, got {}",
                p,
                x.ncols()
            )));
        }
        let intercept = self.coefficients[0];
        let slopes = self.coefficients.slice(ndarray::s![1..]);
        let eta = x.dot(&slopes) + intercept;

        let mut proba = Array2::zeros((x.nrows(), 2));
        for (i, &e) in eta.iter().enumerate() {
            let p1 = sigmoid(e);
            proba[[i, 0]] = 1.0 - p1;
            proba[[i, 1]] = p1;
        }
        Ok(proba)
    }

    pub fn intercept(&self) -> f64 {
        self.coefficients[0]
    }

    /// Intercept followed by the feature coefficients
    pub fn coefficients(&self) -> &Array1<f64> {
        &self.coefficients
    }

    pub fn std_errors(&self) -> Option<&Array1<f64>> {
        self.std_errors.as_ref()
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn overlapping() -> (Array2<f64>, Vec<usize>) {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0]];
        let y = vec![0, 0, 0, 1, 0, 1, 1, 1];
        (x, y)
    }

    #[test]
    fn test_irls_fits_increasing_trend() {
        let (x, y) = overlapping();
        let model = LogisticModel::fit(&x, &y, 0.0, 25, LogisticSolver::Irls).unwrap();
        assert!(model.converged());
        assert!(model.coefficients()[1] > 0.0);

        let proba = model.predict_proba(&x).unwrap();
        assert!(proba[[0, 1]] < 0.5);
        assert!(proba[[7, 1]] > 0.5);
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        let se = model.std_errors().unwrap();
        assert!(se.iter().all(|s| *s > 0.0));
    }

    #[test]
    fn test_gradient_descent_agrees_in_sign() {
        let (x, y) = overlapping();
        let irls = LogisticModel::fit(&x, &y, 0.0, 25, LogisticSolver::Irls).unwrap();
        let gd = LogisticModel::fit(&x, &y, 0.0, 5000, LogisticSolver::GradientDescent { learning_rate: 0.1 }).unwrap();
        assert_eq!(irls.coefficients()[1].signum(), gd.coefficients()[1].signum());
        assert!(gd.std_errors().is_none());
    }

    #[test]
    fn test_penalty_shrinks_slope() {
        let (x, y) = overlapping();
        let free = LogisticModel::fit(&x, &y, 0.0, 25, LogisticSolver::Irls).unwrap();
        let shrunk = LogisticModel::fit(&x, &y, 1.0, 25, LogisticSolver::Irls).unwrap();
        assert!(shrunk.coefficients()[1].abs() < free.coefficients()[1].abs());
    }

    #[test]
    fn test_rejects_multiclass() {
        let x = array![[1.0], [2.0], [3.0]];
        let err = LogisticModel::fit(&x, &[0, 1, 2], 0.0, 25, LogisticSolver::Irls).unwrap_err();
        assert!(matches!(err, FlowError::Training(_)));
    }

    #[test]
    fn test_feature_count_checked() {
        let (x, y) = overlapping();
        let model = LogisticModel::fit(&x, &y, 0.0, 25, LogisticSolver::Irls).unwrap();
        assert!(model.predict_proba(&array![[1.0, 2.0]]).is_err());
    }
}
