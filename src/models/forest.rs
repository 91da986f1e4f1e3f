//! Random forest classifier

use super::tree::{ClassificationTree, TreeParams};
use crate::error::{FlowError, Result};
use ndarray::{Array1, Array2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Forest growth controls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    /// Features tried per split; `None` means `floor(sqrt(p))`
    pub mtry: Option<usize>,
    /// Minimum rows a node needs to be split
    pub min_samples_split: usize,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 500,
            mtry: None,
            min_samples_split: 2,
            bootstrap: true,
            seed: 42,
        }
    }
}

/// Fitted random forest; probabilities are averaged leaf distributions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestModel {
    trees: Vec<ClassificationTree>,
    n_features: usize,
    n_classes: usize,
    mtry: usize,
    feature_importances: Array1<f64>,
}

impl RandomForestModel {
    pub fn fit(x: &Array2<f64>, y: &[usize], n_classes: usize, params: &ForestParams) -> Result<Self> {
        let (n_samples, n_features) = x.dim();
        if n_samples != y.len() {
            return Err(FlowError::Training(format!(
                "design matrix has {} rows but outcome has {}",
                n_samples,
                y.len()
            )));
        }
        if params.n_trees == 0 {
            return Err(FlowError::invalid("trees", 0, "at least one tree is needed"));
        }
        if n_samples == 0 || n_features == 0 {
            return Err(FlowError::Training("random forest needs rows and features".to_string()));
        }

        let mtry = params
            .mtry
            .unwrap_or_else(|| (n_features as f64).sqrt().floor() as usize)
            .clamp(1, n_features);

        // Tree i is seeded with seed + i so the forest is reproducible under rayon
        let trees: Vec<ClassificationTree> = (0..params.n_trees)
            .into_par_iter()
            .map(|tree_idx| {
                let seed = params.seed.wrapping_add(tree_idx as u64);
                let mut rng = ChaCha8Rng::seed_from_u64(seed);

                let rows: Vec<usize> = if params.bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };
                let x_boot = x.select(Axis(0), &rows);
                let y_boot: Vec<usize> = rows.iter().map(|&i| y[i]).collect();

                let tree_params = TreeParams {
                    max_depth: None,
                    min_samples_split: params.min_samples_split,
                    min_samples_leaf: 1,
                    cost_complexity: 0.0,
                    max_features: Some(mtry),
                    seed: rng.gen(),
                };
                ClassificationTree::fit(&x_boot, &y_boot, n_classes, &tree_params)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(trees = trees.len(), mtry, "random forest grown");

        let mut importances = Array1::<f64>::zeros(n_features);
        for tree in &trees {
            importances += tree.feature_importances();
        }
        let total = importances.sum();
        if total > 0.0 {
            importances /= total;
        }

        Ok(Self {
            trees,
            n_features,
            n_classes,
            mtry,
            feature_importances: importances,
        })
    }

    /// `n × n_classes` class probabilities
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features {
            return Err(FlowError::Data(format!(
                "forest was fitted on {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        let per_tree: Vec<Array2<f64>> = self
            .trees
            .par_iter()
            .map(|tree| tree.predict_proba(x))
            .collect::<Result<Vec<_>>>()?;

        let mut proba = Array2::<f64>::zeros((x.nrows(), self.n_classes));
        for p in &per_tree {
            proba += p;
        }
        proba /= self.trees.len() as f64;
        Ok(proba)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn mtry(&self) -> usize {
        self.mtry
    }

    /// Mean impurity decrease per feature, normalised to sum to one
    pub fn feature_importances(&self) -> &Array1<f64> {
        &self.feature_importances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn small() -> ForestParams {
        ForestParams {
            n_trees: 25,
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_forest_separates_clusters() {
        let x = array![[0.0, 0.0], [0.1, 0.1], [0.2, 0.2], [1.0, 1.0], [1.1, 1.1], [1.2, 1.2]];
        let y = [0, 0, 0, 1, 1, 1];
        let forest = RandomForestModel::fit(&x, &y, 2, &small()).unwrap();
        assert_eq!(forest.n_trees(), 25);
        assert_eq!(forest.mtry(), 1);

        let proba = forest.predict_proba(&array![[0.05, 0.05], [1.15, 1.15]]).unwrap();
        assert!(proba[[0, 0]] > 0.5);
        assert!(proba[[1, 1]] > 0.5);
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_forest_is_reproducible() {
        let x = array![[0.0, 3.0], [1.0, 2.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0], [5.0, 2.0]];
        let y = [0, 1, 0, 1, 1, 1];
        let a = RandomForestModel::fit(&x, &y, 2, &small()).unwrap();
        let b = RandomForestModel::fit(&x, &y, 2, &small()).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_importances_sum_to_one() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]];
        let y = [0, 0, 1, 1];
        let params = ForestParams {
            mtry: Some(2),
            ..small()
        };
        let forest = RandomForestModel::fit(&x, &y, 2, &params).unwrap();
        let imp = forest.feature_importances();
        assert!((imp.sum() - 1.0).abs() < 1e-9);
        assert!(imp[0] > imp[1]);
    }

    #[test]
    fn test_zero_trees_rejected() {
        let x = array![[1.0], [2.0]];
        let params = ForestParams {
            n_trees: 0,
            ..ForestParams::default()
        };
        assert!(RandomForestModel::fit(&x, &[0, 1], 2, &params).is_err());
    }
}
