//! CART classification tree

use crate::error::{FlowError, Result};
use ndarray::{Array1, Array2};
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    /// Leaf holding the class proportions of its training rows
    Leaf {
        distribution: Vec<f64>,
        n_samples: usize,
    },
    /// Internal node; rows with `x[feature] <= threshold` go left
    Split {
        feature: usize,
        /// Class proportions, used if the node is pruned back to a leaf
        distribution: Vec<f64>,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
        impurity: f64,
    },
}

/// Growth controls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeParams {
    /// Maximum depth; the root is depth 0
    pub max_depth: Option<usize>,
    /// Minimum rows a node needs to be split
    pub min_samples_split: usize,
    /// Minimum rows in each child
    pub min_samples_leaf: usize,
    /// Complexity penalty per leaf as a fraction of the root's total
    /// impurity; the grown tree is pruned to the subtree minimising
    /// `risk + cp * root_risk * leaves`
    pub cost_complexity: f64,
    /// Features tried per split, drawn at random (all if `None`)
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: Some(30),
            min_samples_split: 2,
            min_samples_leaf: 1,
            cost_complexity: 0.01,
            max_features: None,
            seed: 42,
        }
    }
}

struct GrowContext<'a> {
    x: &'a Array2<f64>,
    y: &'a [usize],
    n_classes: usize,
    params: &'a TreeParams,
}

/// Fitted classification tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationTree {
    root: TreeNode,
    n_features: usize,
    n_classes: usize,
    feature_importances: Array1<f64>,
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    1.0 - counts.iter().map(|&c| (c as f64 / n).powi(2)).sum::<f64>()
}

impl ClassificationTree {
    /// Grow a tree on `x` with class indices `y` in `0..n_classes`
    pub fn fit(x: &Array2<f64>, y: &[usize], n_classes: usize, params: &TreeParams) -> Result<Self> {
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(FlowError::Training(format!(
                "design matrix has {} rows but outcome has {}",
                n_samples,
                y.len()
            )));
        }
        if n_samples == 0 {
            return Err(FlowError::Training("cannot grow a tree on zero rows".to_string()));
        }
        if params.cost_complexity < 0.0 {
            return Err(FlowError::invalid("cost_complexity", params.cost_complexity, "must be non-negative"));
        }
        if let Some(&bad) = y.iter().find(|&&c| c >= n_classes) {
            return Err(FlowError::Training(format!("class index {} out of range", bad)));
        }

        let mut counts = vec![0usize; n_classes];
        for &c in y {
            counts[c] += 1;
        }
        let root_risk = n_samples as f64 * gini(&counts, n_samples);
        let ctx = GrowContext { x, y, n_classes, params };

        let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
        let indices: Vec<usize> = (0..n_samples).collect();
        let grown = Self::grow(&ctx, &indices, 0, &mut rng);
        let (root, _) = Self::prune(grown, params.cost_complexity * root_risk);

        let mut importances = vec![0.0; x.ncols()];
        Self::accumulate_importances(&root, &mut importances);

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for imp in &mut importances {
                *imp /= total;
            }
        }

        Ok(Self {
            root,
            n_features: x.ncols(),
            n_classes,
            feature_importances: Array1::from_vec(importances),
        })
    }

    fn class_counts(ctx: &GrowContext<'_>, indices: &[usize]) -> Vec<usize> {
        let mut counts = vec![0usize; ctx.n_classes];
        for &i in indices {
            counts[ctx.y[i]] += 1;
        }
        counts
    }

    fn leaf(counts: &[usize], n_samples: usize) -> TreeNode {
        let n = n_samples.max(1) as f64;
        TreeNode::Leaf {
            distribution: counts.iter().map(|&c| c as f64 / n).collect(),
            n_samples,
        }
    }

    fn grow(
        ctx: &GrowContext<'_>,
        indices: &[usize],
        depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> TreeNode {
        let n_samples = indices.len();
        let counts = Self::class_counts(ctx, indices);
        let impurity = gini(&counts, n_samples);

        let stop = n_samples < ctx.params.min_samples_split
            || n_samples < 2 * ctx.params.min_samples_leaf
            || ctx.params.max_depth.is_some_and(|d| depth >= d)
            || impurity <= 0.0;
        if stop {
            return Self::leaf(&counts, n_samples);
        }

        let n_features = ctx.x.ncols();
        let features: Vec<usize> = match ctx.params.max_features {
            Some(m) if m < n_features => {
                let mut f = sample(rng, n_features, m.max(1)).into_vec();
                f.sort_unstable();
                f
            }
            _ => (0..n_features).collect(),
        };

        let best = Self::best_split(ctx, indices, &counts, &features);
        let Some((feature, threshold, _)) = best else {
            return Self::leaf(&counts, n_samples);
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| ctx.x[[i, feature]] <= threshold);

        let left = Box::new(Self::grow(ctx, &left_idx, depth + 1, rng));
        let right = Box::new(Self::grow(ctx, &right_idx, depth + 1, rng));

        let n = n_samples as f64;
        TreeNode::Split {
            feature,
            distribution: counts.iter().map(|&c| c as f64 / n).collect(),
            threshold,
            left,
            right,
            n_samples,
            impurity,
        }
    }

    /// Rows × gini of a node as if it were a leaf
    fn node_risk(node: &TreeNode) -> f64 {
        match node {
            TreeNode::Leaf { distribution, n_samples } => {
                *n_samples as f64 * (1.0 - distribution.iter().map(|p| p * p).sum::<f64>())
            }
            TreeNode::Split { n_samples, impurity, .. } => *n_samples as f64 * impurity,
        }
    }

    /// Minimal cost-complexity pruning for penalty `alpha` per leaf.
    ///
    /// Bottom-up: a split is collapsed when its own risk plus one leaf's
    /// penalty is no worse than the cost of its pruned subtree. Returns the
    /// pruned node and its cost.
    fn prune(node: TreeNode, alpha: f64) -> (TreeNode, f64) {
        match node {
            TreeNode::Leaf { .. } => {
                let cost = Self::node_risk(&node) + alpha;
                (node, cost)
            }
            TreeNode::Split {
                feature,
                distribution,
                threshold,
                left,
                right,
                n_samples,
                impurity,
            } => {
                let (left, left_cost) = Self::prune(*left, alpha);
                let (right, right_cost) = Self::prune(*right, alpha);
                let collapsed = n_samples as f64 * impurity + alpha;
                if collapsed <= left_cost + right_cost {
                    (TreeNode::Leaf { distribution, n_samples }, collapsed)
                } else {
                    let node = TreeNode::Split {
                        feature,
                        distribution,
                        threshold,
                        left: Box::new(left),
                        right: Box::new(right),
                        n_samples,
                        impurity,
                    };
                    (node, left_cost + right_cost)
                }
            }
        }
    }

    /// Impurity decrease of every kept split, credited to its feature
    fn accumulate_importances(node: &TreeNode, importances: &mut [f64]) {
        if let TreeNode::Split { feature, left, right, .. } = node {
            importances[*feature] += Self::node_risk(node) - Self::node_risk(left) - Self::node_risk(right);
            Self::accumulate_importances(left, importances);
            Self::accumulate_importances(right, importances);
        }
    }

    /// Best (feature, threshold, impurity decrease) over `features`.
    /// Ties keep the lowest feature index.
    fn best_split(
        ctx: &GrowContext<'_>,
        indices: &[usize],
        counts: &[usize],
        features: &[usize],
    ) -> Option<(usize, f64, f64)> {
        let n = indices.len();
        let parent = gini(counts, n);
        let min_leaf = ctx.params.min_samples_leaf.max(1);

        let per_feature: Vec<Option<(usize, f64, f64)>> = features
            .par_iter()
            .map(|&feature| {
                let mut order: Vec<(f64, usize)> = indices.iter().map(|&i| (ctx.x[[i, feature]], ctx.y[i])).collect();
                order.sort_by(|a, b| a.0.total_cmp(&b.0));

                let mut left = vec![0usize; ctx.n_classes];
                let mut right = counts.to_vec();
                let mut best: Option<(f64, f64)> = None;

                for k in 0..n - 1 {
                    let (value, class) = order[k];
                    left[class] += 1;
                    right[class] -= 1;

                    let next = order[k + 1].0;
                    if next <= value {
                        continue;
                    }
                    let n_left = k + 1;
                    let n_right = n - n_left;
                    if n_left < min_leaf || n_right < min_leaf {
                        continue;
                    }

                    let weighted = (n_left as f64 * gini(&left, n_left) + n_right as f64 * gini(&right, n_right)) / n as f64;
                    let gain = parent - weighted;
                    if gain > best.map_or(1e-12, |b| b.1) {
                        best = Some(((value + next) / 2.0, gain));
                    }
                }

                best.map(|(threshold, gain)| (feature, threshold, gain))
            })
            .collect();

        per_feature.into_iter().flatten().fold(None, |acc, cand| match acc {
            Some(a) if a.2 >= cand.2 => Some(a),
            _ => Some(cand),
        })
    }

    /// `n × n_classes` class probabilities from the leaf distributions
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.n_features {
            return Err(FlowError::Data(format!(
                "tree was fitted on {} features, got {}",
                self.n_features,
                x.ncols()
            )));
        }
        let mut proba = Array2::zeros((x.nrows(), self.n_classes));
        for (i, row) in x.rows().into_iter().enumerate() {
            let sample = row.to_vec();
            let dist = self.leaf_for(&sample);
            for (k, &p) in dist.iter().enumerate() {
                proba[[i, k]] = p;
            }
        }
        Ok(proba)
    }

    fn leaf_for(&self, sample: &[f64]) -> &[f64] {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { distribution, .. } => return distribution,
                TreeNode::Split { feature, threshold, left, right, .. } => {
                    node = if sample[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn root(&self) -> &TreeNode {
        &self.root
    }

    pub fn feature_importances(&self) -> &Array1<f64> {
        &self.feature_importances
    }

    pub fn depth(&self) -> usize {
        fn node_depth(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + node_depth(left).max(node_depth(right)),
            }
        }
        node_depth(&self.root)
    }

    pub fn n_leaves(&self) -> usize {
        fn count(node: &TreeNode) -> usize {
            match node {
                TreeNode::Leaf { .. } => 1,
                TreeNode::Split { left, right, .. } => count(left) + count(right),
            }
        }
        count(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn unconstrained() -> TreeParams {
        TreeParams {
            cost_complexity: 0.0,
            ..TreeParams::default()
        }
    }

    #[test]
    fn test_separable_classes() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [4.0, 0.0]];
        let y = [0, 0, 1, 1];
        let tree = ClassificationTree::fit(&x, &y, 2, &unconstrained()).unwrap();

        let proba = tree.predict_proba(&x).unwrap();
        assert_eq!(proba.row(0).to_vec(), vec![1.0, 0.0]);
        assert_eq!(proba.row(3).to_vec(), vec![0.0, 1.0]);
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.n_leaves(), 2);

        let imp = tree.feature_importances();
        assert!((imp[0] - 1.0).abs() < 1e-12);
        assert_eq!(imp[1], 0.0);
    }

    #[test]
    fn test_max_depth() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0]];
        let y = [0, 1, 0, 1, 0, 1, 0, 1];
        let params = TreeParams {
            max_depth: Some(2),
            ..unconstrained()
        };
        let tree = ClassificationTree::fit(&x, &y, 2, &params).unwrap();
        assert!(tree.depth() <= 2);
    }

    #[test]
    fn test_cost_complexity_prunes() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0], [8.0]];
        let y = [0, 1, 0, 1, 0, 1, 0, 1];
        let params = TreeParams {
            cost_complexity: 0.9,
            ..TreeParams::default()
        };
        let tree = ClassificationTree::fit(&x, &y, 2, &params).unwrap();
        assert_eq!(tree.n_leaves(), 1);
        let proba = tree.predict_proba(&x).unwrap();
        assert!((proba[[0, 0]] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_pruning_keeps_weak_split_with_strong_children() {
        // Interaction: splitting on x0 barely helps, but splitting on x1
        // inside each half gives pure leaves
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for (x0, x1, class, count) in [(0.0, 0.0, 0, 4), (0.0, 1.0, 1, 4), (1.0, 0.0, 1, 5), (1.0, 1.0, 0, 3)] {
            for _ in 0..count {
                rows.extend([x0, x1]);
                y.push(class);
            }
        }
        let x = Array2::from_shape_vec((y.len(), 2), rows).unwrap();
        let params = TreeParams {
            cost_complexity: 0.05,
            ..TreeParams::default()
        };
        let tree = ClassificationTree::fit(&x, &y, 2, &params).unwrap();
        assert_eq!(tree.n_leaves(), 4);
        let proba = tree.predict_proba(&x).unwrap();
        for (i, &class) in y.iter().enumerate() {
            assert_eq!(proba[[i, class]], 1.0);
        }

        // A large enough penalty collapses everything
        let stump = ClassificationTree::fit(&x, &y, 2, &TreeParams { cost_complexity: 0.5, ..params }).unwrap();
        assert_eq!(stump.n_leaves(), 1);
        assert!(stump.feature_importances().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_three_classes() {
        let x = array![[0.0], [0.1], [5.0], [5.1], [9.0], [9.1]];
        let y = [0, 0, 1, 1, 2, 2];
        let tree = ClassificationTree::fit(&x, &y, 3, &unconstrained()).unwrap();
        let proba = tree.predict_proba(&array![[0.05], [5.05], [9.05]]).unwrap();
        assert_eq!(proba[[0, 0]], 1.0);
        assert_eq!(proba[[1, 1]], 1.0);
        assert_eq!(proba[[2, 2]], 1.0);
    }

    #[test]
    fn test_seeded_feature_sampling_is_deterministic() {
        let x = array![[1.0, 4.0, 0.0], [2.0, 3.0, 1.0], [3.0, 2.0, 0.0], [4.0, 1.0, 1.0]];
        let y = [0, 0, 1, 1];
        let params = TreeParams {
            max_features: Some(1),
            ..unconstrained()
        };
        let a = ClassificationTree::fit(&x, &y, 2, &params).unwrap();
        let b = ClassificationTree::fit(&x, &y, 2, &params).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }
}
