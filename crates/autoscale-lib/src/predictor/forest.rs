//! Random forest regressor
//!
//! Bagged CART trees with variance-reduction splits. Nodes live in a flat
//! arena per tree so a trained forest serializes to plain JSON.

use crate::error::PredictorError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Minimum impurity decrease for a split to be kept
const MIN_GAIN: f64 = 1e-12;

/// Tree growth parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    params: ForestParams,
    nodes: Vec<Node>,
    importances: &'a mut [f64],
}

impl TreeBuilder<'_> {
    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let (sum, sum_sq) = indices.iter().fold((0.0, 0.0), |(s, sq), &i| {
            (s + self.y[i], sq + self.y[i] * self.y[i])
        });
        let n = indices.len() as f64;
        let mean = sum / n;
        let sse = sum_sq - sum * sum / n;

        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        if depth >= self.params.max_depth
            || indices.len() < self.params.min_samples_split
            || sse <= MIN_GAIN
        {
            return id;
        }

        let Some(split) = self.best_split(&indices, sse) else {
            return id;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .copied()
            .partition(|&i| self.x[i][split.feature] <= split.threshold);
        if left.is_empty() || right.is_empty() {
            return id;
        }
        self.importances[split.feature] += split.gain;

        let left_id = self.grow(left, depth + 1);
        let right_id = self.grow(right, depth + 1);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: left_id,
            right: right_id,
        };
        id
    }

    fn best_split(&self, indices: &[usize], parent_sse: f64) -> Option<SplitCandidate> {
        let n = indices.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        if n < 2 * min_leaf {
            return None;
        }

        let total_sum: f64 = indices.iter().map(|&i| self.y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| self.y[i] * self.y[i]).sum();
        let n_features = self.x[indices[0]].len();

        let mut best: Option<SplitCandidate> = None;
        let mut sorted = indices.to_vec();

        for feature in 0..n_features {
            sorted.sort_by(|&a, &b| {
                self.x[a][feature]
                    .partial_cmp(&self.x[b][feature])
                    .unwrap_or(Ordering::Equal)
            });

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for k in 1..n {
                let y = self.y[sorted[k - 1]];
                left_sum += y;
                left_sq += y * y;

                if k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let lo = self.x[sorted[k - 1]][feature];
                let hi = self.x[sorted[k]][feature];
                if hi <= lo {
                    continue;
                }

                let left_n = k as f64;
                let right_n = (n - k) as f64;
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / left_n)
                    + (right_sq - right_sum * right_sum / right_n);
                let gain = parent_sse - sse;

                if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: split_point(lo, hi),
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Threshold `t` with `lo <= t < hi`, so `<= t` separates the two values
fn split_point(lo: f64, hi: f64) -> f64 {
    let mid = lo + (hi - lo) / 2.0;
    if mid.is_finite() && mid >= lo && mid < hi {
        mid
    } else {
        lo
    }
}

/// Bagged ensemble of regression trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
    importances: Vec<f64>,
}

impl RandomForest {
    /// Fit on `x` rows against `y` targets
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: ForestParams) -> Result<Self, PredictorError> {
        if x.len() != y.len() {
            return Err(PredictorError::LengthMismatch {
                rows: x.len(),
                targets: y.len(),
            });
        }
        let n_features = x.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = x.iter().find(|row| row.len() != n_features) {
            return Err(PredictorError::ShapeMismatch {
                expected: n_features,
                actual: bad.len(),
            });
        }
        if x.is_empty() || n_features == 0 {
            return Err(PredictorError::ShapeMismatch {
                expected: 1,
                actual: 0,
            });
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(params.n_trees);

        for _ in 0..params.n_trees.max(1) {
            let sample: Vec<usize> = (0..x.len()).map(|_| rng.gen_range(0..x.len())).collect();
            let mut builder = TreeBuilder {
                x,
                y,
                params,
                nodes: Vec::new(),
                importances: &mut importances,
            };
            builder.grow(sample, 0);
            trees.push(RegressionTree {
                nodes: builder.nodes,
            });
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Ok(Self {
            trees,
            n_features,
            importances,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Normalised impurity decrease per feature, summing to 1
    pub fn importances(&self) -> &[f64] {
        &self.importances
    }

    /// Prediction of every tree for `row`
    pub fn tree_predictions(&self, row: &[f64]) -> Result<Vec<f64>, PredictorError> {
        if row.len() != self.n_features {
            return Err(PredictorError::ShapeMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        Ok(self.trees.iter().map(|t| t.predict(row)).collect())
    }

    /// Mean prediction across trees
    pub fn predict(&self, row: &[f64]) -> Result<f64, PredictorError> {
        let predictions = self.tree_predictions(row)?;
        Ok(crate::stats::mean(&predictions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ForestParams {
        ForestParams {
            n_trees: 20,
            max_depth: 6,
            min_samples_split: 5,
            min_samples_leaf: 2,
            seed: 42,
        }
    }

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        // Target depends only on feature 0 crossing 50; feature 1 is noise-free filler
        let x: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let y: Vec<f64> = (0..100).map(|i| if i < 50 { 10.0 } else { 30.0 }).collect();
        (x, y)
    }

    #[test]
    fn test_learns_step_function() {
        let (x, y) = step_data();
        let forest = RandomForest::fit(&x, &y, params()).unwrap();
        assert!((forest.predict(&[10.0, 1.0]).unwrap() - 10.0).abs() < 1.0);
        assert!((forest.predict(&[90.0, 1.0]).unwrap() - 30.0).abs() < 1.0);
        assert_eq!(forest.n_trees(), 20);
    }

    #[test]
    fn test_importance_favours_informative_feature() {
        let (x, y) = step_data();
        let forest = RandomForest::fit(&x, &y, params()).unwrap();
        let imp = forest.importances();
        assert!(imp[0] > imp[1]);
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let (x, y) = step_data();
        let a = RandomForest::fit(&x, &y, params()).unwrap();
        let b = RandomForest::fit(&x, &y, params()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shape_checks() {
        let (x, y) = step_data();
        assert!(matches!(
            RandomForest::fit(&x, &y[..10], params()),
            Err(PredictorError::LengthMismatch { .. })
        ));

        let forest = RandomForest::fit(&x, &y, params()).unwrap();
        assert!(matches!(
            forest.predict(&[1.0]),
            Err(PredictorError::ShapeMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_adjacent_float_split_keeps_both_children() {
        let lo = 52.175228580174415_f64;
        let hi = f64::from_bits(lo.to_bits() + 1);
        assert!(split_point(lo, hi) < hi);
        assert!(split_point(lo, hi) >= lo);

        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![if i < 20 { lo } else { hi }]).collect();
        let y: Vec<f64> = (0..40).map(|i| if i < 20 { 1.0 } else { 3.4 }).collect();
        let forest = RandomForest::fit(&x, &y, params()).unwrap();

        for row in [[lo], [hi], [hi + 1.0], [0.0]] {
            let members = forest.tree_predictions(&row).unwrap();
            assert!(members.iter().all(|p| p.is_finite()), "non-finite leaf for {:?}", row);
        }
        assert!((forest.predict(&[hi]).unwrap() - 3.4).abs() < 0.5);
        assert!((forest.predict(&[lo]).unwrap() - 1.0).abs() < 0.5);
    }

    #[test]
    fn test_trained_forest_has_only_finite_leaves() {
        let x: Vec<Vec<f64>> = (0..300)
            .map(|i| vec![(i as f64 * 0.37).sin() * 50.0 + 50.0, (i % 24) as f64, i as f64 / 7.0])
            .collect();
        let y: Vec<f64> = x.iter().map(|r| r[0] * 0.5 + r[1]).collect();
        let forest = RandomForest::fit(&x, &y, params()).unwrap();

        let json = serde_json::to_string(&forest).unwrap();
        assert!(!json.contains("null"));
        let restored: RandomForest = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, forest);
    }

    #[test]
    fn test_constant_target_yields_single_leaf() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y = vec![7.0; 20];
        let forest = RandomForest::fit(&x, &y, params()).unwrap();
        let spread = forest.tree_predictions(&[3.0]).unwrap();
        assert!(spread.iter().all(|p| (*p - 7.0).abs() < 1e-12));
    }
}
