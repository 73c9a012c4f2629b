use std::fmt;

use anyhow::{Result, anyhow};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::grid_search::{Estimator, Predictor};

pub const NEIGHBOR_GRID: [usize; 4] = [3, 5, 7, 10];
pub const POWER_GRID: [u32; 2] = [1, 2];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voting {
    Uniform,
    Distance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Euclidean,
    Manhattan,
    Minkowski,
}

impl fmt::Display for Voting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Voting::Uniform => "uniform",
            Voting::Distance => "distance",
        })
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::Euclidean => "euclidean",
            Metric::Manhattan => "manhattan",
            Metric::Minkowski => "minkowski",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnnParams {
    pub n_neighbors: usize,
    pub weights: Voting,
    pub metric: Metric,
    /// Power for `Metric::Minkowski`; ignored by the other metrics.
    pub p: u32,
}

impl Default for KnnParams {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            weights: Voting::Uniform,
            metric: Metric::Minkowski,
            p: 2,
        }
    }
}

impl KnnParams {
    fn distance(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        let diffs = a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs());
        match self.metric {
            Metric::Euclidean => diffs.map(|d| d * d).sum::<f64>().sqrt(),
            Metric::Manhattan => diffs.sum(),
            Metric::Minkowski => match self.p {
                1 => diffs.sum(),
                2 => diffs.map(|d| d * d).sum::<f64>().sqrt(),
                p => {
                    let p = f64::from(p);
                    diffs.map(|d| d.powf(p)).sum::<f64>().powf(1.0 / p)
                }
            },
        }
    }
}

pub fn knn_grid() -> Vec<KnnParams> {
    let mut grid = Vec::new();
    for &n_neighbors in &NEIGHBOR_GRID {
        for weights in [Voting::Uniform, Voting::Distance] {
            for metric in [Metric::Euclidean, Metric::Manhattan, Metric::Minkowski] {
                for &p in &POWER_GRID {
                    grid.push(KnnParams {
                        n_neighbors,
                        weights,
                        metric,
                        p,
                    });
                }
            }
        }
    }
    grid
}

/// Memorised training set. Each neighbour's vote is scaled by its sample
/// weight, so recency weighting shifts the average toward recent seasons.
#[derive(Debug, Clone)]
pub struct KnnModel {
    params: KnnParams,
    x: Array2<f64>,
    y: Vec<f64>,
    sample_weight: Vec<f64>,
}

impl KnnModel {
    pub fn params(&self) -> KnnParams {
        self.params
    }

    pub fn n_train(&self) -> usize {
        self.y.len()
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut dists: Vec<(usize, f64)> = self
            .x
            .rows()
            .into_iter()
            .enumerate()
            .map(|(i, train)| (i, self.params.distance(row, train)))
            .collect();
        // Stable sort keeps training order among equal distances.
        dists.sort_by(|a, b| a.1.total_cmp(&b.1));
        let neighbors = &dists[..self.params.n_neighbors];

        let votes: Vec<(f64, f64)> = match self.params.weights {
            Voting::Uniform => neighbors
                .iter()
                .map(|&(i, _)| (self.y[i], self.sample_weight[i]))
                .collect(),
            Voting::Distance if neighbors.iter().any(|&(_, d)| d == 0.0) => neighbors
                .iter()
                .filter(|&&(_, d)| d == 0.0)
                .map(|&(i, _)| (self.y[i], self.sample_weight[i]))
                .collect(),
            Voting::Distance => neighbors
                .iter()
                .map(|&(i, d)| (self.y[i], self.sample_weight[i] / d))
                .collect(),
        };

        let total: f64 = votes.iter().map(|(_, w)| w).sum();
        if total > 0.0 {
            votes.iter().map(|(y, w)| y * w).sum::<f64>() / total
        } else {
            // Every vote carries zero sample weight; fall back to a plain mean.
            votes.iter().map(|(y, _)| y).sum::<f64>() / votes.len() as f64
        }
    }
}

impl Predictor for KnnModel {
    fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        x.rows().into_iter().map(|row| self.predict_row(row)).collect()
    }
}

impl Estimator for KnnParams {
    type Fitted = KnnModel;

    fn fit(&self, x: &Array2<f64>, y: &[f64], sample_weight: Option<&[f64]>) -> Result<KnnModel> {
        let n = x.nrows();
        if y.len() != n {
            return Err(anyhow!("{} targets for {} samples", y.len(), n));
        }
        if self.n_neighbors == 0 {
            return Err(anyhow!("n_neighbors must be positive"));
        }
        if self.n_neighbors > n {
            return Err(anyhow!(
                "n_neighbors={} exceeds {} training samples",
                self.n_neighbors,
                n
            ));
        }
        if self.metric == Metric::Minkowski && self.p == 0 {
            return Err(anyhow!("minkowski power must be at least 1"));
        }
        let sample_weight = match sample_weight {
            Some(w) if w.len() != n => {
                return Err(anyhow!("{} sample weights for {} samples", w.len(), n));
            }
            Some(w) if w.iter().any(|v| !v.is_finite() || *v < 0.0) => {
                return Err(anyhow!("sample weights must be finite and non-negative"));
            }
            Some(w) => w.to_vec(),
            None => vec![1.0; n],
        };
        Ok(KnnModel {
            params: *self,
            x: x.clone(),
            y: y.to_vec(),
            sample_weight,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn params(k: usize, weights: Voting, metric: Metric) -> KnnParams {
        KnnParams {
            n_neighbors: k,
            weights,
            metric,
            p: 2,
        }
    }

    #[test]
    fn grid_covers_all_combinations() {
        assert_eq!(knn_grid().len(), 48);
    }

    #[test]
    fn uniform_vote_averages_nearest() {
        let x = array![[0.0], [1.0], [2.0], [10.0]];
        let y = vec![1.0, 2.0, 3.0, 100.0];
        let model = params(3, Voting::Uniform, Metric::Euclidean)
            .fit(&x, &y, None)
            .unwrap();
        let pred = model.predict(&array![[1.0]]);
        assert!((pred[0] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn distance_vote_with_exact_match_uses_that_row() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = vec![10.0, 20.0, 30.0];
        let model = params(3, Voting::Distance, Metric::Manhattan)
            .fit(&x, &y, None)
            .unwrap();
        assert_eq!(model.predict(&array![[1.0]]), vec![20.0]);
        let between = model.predict(&array![[0.5]])[0];
        assert!(between > 10.0 && between < 20.0);
    }

    #[test]
    fn ties_follow_training_order() {
        let x = array![[1.0], [-1.0], [3.0]];
        let y = vec![5.0, 7.0, 9.0];
        let model = params(1, Voting::Uniform, Metric::Euclidean)
            .fit(&x, &y, None)
            .unwrap();
        assert_eq!(model.predict(&array![[0.0]]), vec![5.0]);
    }

    #[test]
    fn sample_weights_scale_votes() {
        let x = array![[0.0], [2.0]];
        let y = vec![0.0, 10.0];
        let model = params(2, Voting::Uniform, Metric::Euclidean)
            .fit(&x, &y, Some([1.0, 3.0].as_slice()))
            .unwrap();
        assert!((model.predict(&array![[1.0]])[0] - 7.5).abs() < 1e-12);
    }

    #[test]
    fn too_many_neighbors_is_an_error() {
        let x = array![[0.0], [1.0]];
        assert!(
            params(3, Voting::Uniform, Metric::Euclidean)
                .fit(&x, &[1.0, 2.0], None)
                .is_err()
        );
    }

    #[test]
    fn minkowski_power_one_matches_manhattan() {
        let a = array![0.0, 0.0];
        let b = array![3.0, 4.0];
        let mink = KnnParams {
            p: 1,
            ..params(1, Voting::Uniform, Metric::Minkowski)
        };
        let manhattan = params(1, Voting::Uniform, Metric::Manhattan);
        let euclid = params(1, Voting::Uniform, Metric::Euclidean);
        assert_eq!(mink.distance(a.view(), b.view()), 7.0);
        assert_eq!(manhattan.distance(a.view(), b.view()), 7.0);
        assert_eq!(euclid.distance(a.view(), b.view()), 5.0);
    }
}
