//! Bagged regression trees
//!
//! A small random-forest regressor: every tree is fitted on a bootstrap
//! sample of the training rows and predictions are averaged. Splits minimise
//! squared error, so no feature scaling is needed and non-monotonic hour or
//! weekday effects are captured. The bootstrap uses a seeded RNG, making a
//! fit fully reproducible for identical input.

use super::Regressor;
use crate::error::FitError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

/// Default number of trees in the ensemble
pub const DEFAULT_N_ESTIMATORS: usize = 100;

/// Default RNG seed for bootstrap sampling
pub const DEFAULT_SEED: u64 = 42;

/// Forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_estimators: usize,
    pub seed: u64,
    /// Unlimited when `None`
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            seed: DEFAULT_SEED,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
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

/// A single regression tree stored as a flat node arena, root at index 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    fn fit(inputs: &[Vec<f64>], targets: &[f64], sample: Vec<usize>, config: &ForestConfig) -> Self {
        let mut builder = TreeBuilder {
            inputs,
            targets,
            config,
            nodes: Vec::new(),
        };
        let mut sample = sample;
        builder.grow(&mut sample, 0);
        Self {
            nodes: builder.nodes,
        }
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let x = features.get(*feature).copied().unwrap_or(0.0);
                    idx = if x <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

struct TreeBuilder<'a> {
    inputs: &'a [Vec<f64>],
    targets: &'a [f64],
    config: &'a ForestConfig,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    /// Number of samples going left once sorted by `feature`
    left_len: usize,
    sse: f64,
}

impl TreeBuilder<'_> {
    /// Grow a subtree over `sample` and return its node index
    fn grow(&mut self, sample: &mut [usize], depth: usize) -> usize {
        let idx = self.nodes.len();
        let (mean, sse) = self.stats(sample);
        self.nodes.push(Node::Leaf { value: mean });

        let depth_exhausted = self.config.max_depth.is_some_and(|max| depth >= max);
        if depth_exhausted || sample.len() < self.config.min_samples_split || sse <= f64::EPSILON {
            return idx;
        }

        let Some(best) = self.best_split(sample) else {
            return idx;
        };
        if best.sse >= sse {
            return idx;
        }

        self.sort_by_feature(sample, best.feature);
        let (left_sample, right_sample) = sample.split_at_mut(best.left_len);
        let left = self.grow(left_sample, depth + 1);
        let right = self.grow(right_sample, depth + 1);

        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }

    fn stats(&self, sample: &[usize]) -> (f64, f64) {
        let n = sample.len() as f64;
        let sum: f64 = sample.iter().map(|&i| self.targets[i]).sum();
        let mean = sum / n;
        let sse = sample
            .iter()
            .map(|&i| (self.targets[i] - mean).powi(2))
            .sum();
        (mean, sse)
    }

    fn sort_by_feature(&self, sample: &mut [usize], feature: usize) {
        sample.sort_by(|&a, &b| {
            self.inputs[a][feature]
                .partial_cmp(&self.inputs[b][feature])
                .unwrap_or(Ordering::Equal)
        });
    }

    fn best_split(&self, sample: &mut [usize]) -> Option<BestSplit> {
        let n = sample.len();
        let min_leaf = self.config.min_samples_leaf.max(1);
        let feature_count = self.inputs[sample[0]].len();
        let total: f64 = sample.iter().map(|&i| self.targets[i]).sum();
        let total_sq: f64 = sample.iter().map(|&i| self.targets[i].powi(2)).sum();
        let mut best: Option<BestSplit> = None;

        for feature in 0..feature_count {
            self.sort_by_feature(sample, feature);

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for pos in 0..n - 1 {
                let y = self.targets[sample[pos]];
                left_sum += y;
                left_sq += y * y;

                let left_len = pos + 1;
                let right_len = n - left_len;
                if left_len < min_leaf || right_len < min_leaf {
                    continue;
                }

                let here = self.inputs[sample[pos]][feature];
                let next = self.inputs[sample[pos + 1]][feature];
                if next <= here {
                    continue;
                }

                let right_sum = total - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / left_len as f64)
                    + (right_sq - right_sum * right_sum / right_len as f64);

                if best.as_ref().map_or(true, |b| sse < b.sse) {
                    best = Some(BestSplit {
                        feature,
                        threshold: (here + next) / 2.0,
                        left_len,
                        sse,
                    });
                }
            }
        }

        best
    }
}

/// Ensemble of bootstrap-trained regression trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    config: ForestConfig,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    /// Fit a forest on `inputs` (one row per sample) and `targets`
    pub fn fit(inputs: &[Vec<f64>], targets: &[f64], config: &ForestConfig) -> Result<Self, FitError> {
        Self::fit_cancellable(inputs, targets, config, &AtomicBool::new(false))
    }

    /// Like [`RandomForest::fit`], but gives up with [`FitError::Cancelled`]
    /// once `cancel` is set. The flag is checked before each tree.
    pub fn fit_cancellable(
        inputs: &[Vec<f64>],
        targets: &[f64],
        config: &ForestConfig,
        cancel: &AtomicBool,
    ) -> Result<Self, FitError> {
        if inputs.is_empty() {
            return Err(FitError::Empty);
        }
        if inputs.len() != targets.len() {
            return Err(FitError::LengthMismatch {
                inputs: inputs.len(),
                targets: targets.len(),
            });
        }
        let finite = inputs.iter().flatten().chain(targets).all(|v| v.is_finite());
        if !finite {
            return Err(FitError::NonFinite);
        }

        let n = inputs.len();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let estimators = config.n_estimators.max(1);
        let mut trees = Vec::with_capacity(estimators);
        for _ in 0..estimators {
            if cancel.load(AtomicOrdering::Relaxed) {
                return Err(FitError::Cancelled);
            }
            let sample: Vec<usize> = (0..n).map(|_| rng.random_range(0..n)).collect();
            trees.push(RegressionTree::fit(inputs, targets, sample, config));
        }

        Ok(Self {
            config: config.clone(),
            trees,
        })
    }

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}

impl Regressor for RandomForest {
    fn predict(&self, features: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        sum / self.trees.len() as f64
    }

    fn name(&self) -> &'static str {
        "random_forest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hourly_pattern() -> (Vec<Vec<f64>>, Vec<f64>) {
        // Busy mid-morning, quiet otherwise: not monotonic in the hour
        let mut inputs = Vec::new();
        let mut targets = Vec::new();
        for day in 1..=7 {
            for hour in 8..18 {
                let wait = if (10..=12).contains(&hour) { 60.0 } else { 10.0 };
                inputs.push(vec![hour as f64, day as f64, 3.0]);
                targets.push(wait);
            }
        }
        (inputs, targets)
    }

    #[test]
    fn test_rejects_bad_input() {
        let config = ForestConfig::default();
        assert_eq!(RandomForest::fit(&[], &[], &config), Err(FitError::Empty));
        assert!(matches!(
            RandomForest::fit(&[vec![1.0]], &[1.0, 2.0], &config),
            Err(FitError::LengthMismatch { .. })
        ));
        assert_eq!(
            RandomForest::fit(&[vec![f64::NAN]], &[1.0], &config),
            Err(FitError::NonFinite)
        );
    }

    #[test]
    fn test_cancelled_fit_stops() {
        let (inputs, targets) = hourly_pattern();
        let cancel = AtomicBool::new(true);
        assert_eq!(
            RandomForest::fit_cancellable(&inputs, &targets, &ForestConfig::default(), &cancel),
            Err(FitError::Cancelled)
        );
    }

    #[test]
    fn test_constant_target_predicts_constant() {
        let inputs: Vec<Vec<f64>> = (0..12).map(|h| vec![h as f64, 1.0, 2.0]).collect();
        let targets = vec![20.0; 12];
        let forest = RandomForest::fit(&inputs, &targets, &ForestConfig::default()).unwrap();

        assert!((forest.predict(&[5.0, 1.0, 2.0]) - 20.0).abs() < 1e-9);
        assert!((forest.predict(&[23.0, 7.0, 40.0]) - 20.0).abs() < 1e-9);
        assert!(forest.trees().iter().all(|t| t.node_count() == 1));
    }

    #[test]
    fn test_captures_non_monotonic_hour_effect() {
        let (inputs, targets) = hourly_pattern();
        let forest = RandomForest::fit(&inputs, &targets, &ForestConfig::default()).unwrap();

        let peak = forest.predict(&[11.0, 3.0, 3.0]);
        let early = forest.predict(&[8.0, 3.0, 3.0]);
        let late = forest.predict(&[16.0, 3.0, 3.0]);
        assert!(peak > 45.0, "peak was {}", peak);
        assert!(early < 25.0, "early was {}", early);
        assert!(late < 25.0, "late was {}", late);
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let (inputs, targets) = hourly_pattern();
        let config = ForestConfig {
            n_estimators: 20,
            ..Default::default()
        };
        let a = RandomForest::fit(&inputs, &targets, &config).unwrap();
        let b = RandomForest::fit(&inputs, &targets, &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.predict(&[9.5, 2.0, 3.0]), b.predict(&[9.5, 2.0, 3.0]));
    }

    #[test]
    fn test_max_depth_is_respected() {
        let (inputs, targets) = hourly_pattern();
        let config = ForestConfig {
            n_estimators: 5,
            max_depth: Some(2),
            ..Default::default()
        };
        let forest = RandomForest::fit(&inputs, &targets, &config).unwrap();
        assert!(forest.trees().iter().all(|t| t.depth() <= 2));
    }

    #[test]
    fn test_serde_keeps_predictions() {
        let (inputs, targets) = hourly_pattern();
        let config = ForestConfig {
            n_estimators: 10,
            ..Default::default()
        };
        let forest = RandomForest::fit(&inputs, &targets, &config).unwrap();
        let json = serde_json::to_vec(&forest).unwrap();
        let restored: RandomForest = serde_json::from_slice(&json).unwrap();
        assert!((forest.predict(&[11.0, 4.0, 3.0]) - restored.predict(&[11.0, 4.0, 3.0])).abs() < 1e-9);
    }
}
