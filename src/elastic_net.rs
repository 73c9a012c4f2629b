use anyhow::{Result, anyhow};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::grid_search::{Estimator, Predictor};

pub const ALPHA_GRID: [f64; 4] = [0.01, 0.1, 1.0, 10.0];
pub const L1_RATIO_GRID: [f64; 3] = [0.1, 0.5, 0.9];

/// Linear regression with a blended L1/L2 penalty, fitted by cyclic
/// coordinate descent on
/// `1/(2n)·Σ s_i (y_i − x_i·w − b)² + α·ρ·‖w‖₁ + ½·α·(1−ρ)·‖w‖²`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElasticNetParams {
    pub alpha: f64,
    pub l1_ratio: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for ElasticNetParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            l1_ratio: 0.5,
            max_iter: 10_000,
            tol: 1e-4,
        }
    }
}

pub fn elastic_net_grid() -> Vec<ElasticNetParams> {
    let mut grid = Vec::with_capacity(ALPHA_GRID.len() * L1_RATIO_GRID.len());
    for &alpha in &ALPHA_GRID {
        for &l1_ratio in &L1_RATIO_GRID {
            grid.push(ElasticNetParams {
                alpha,
                l1_ratio,
                ..Default::default()
            });
        }
    }
    grid
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticNetModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    pub n_iter: usize,
    pub converged: bool,
}

impl Predictor for ElasticNetModel {
    fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        x.rows()
            .into_iter()
            .map(|row| {
                self.intercept
                    + row
                        .iter()
                        .zip(&self.coefficients)
                        .map(|(a, b)| a * b)
                        .sum::<f64>()
            })
            .collect()
    }
}

impl Estimator for ElasticNetParams {
    type Fitted = ElasticNetModel;

    fn fit(&self, x: &Array2<f64>, y: &[f64], sample_weight: Option<&[f64]>) -> Result<ElasticNetModel> {
        let (n, p) = x.dim();
        if n == 0 {
            return Err(anyhow!("elastic net needs at least one sample"));
        }
        if y.len() != n {
            return Err(anyhow!("{} targets for {} samples", y.len(), n));
        }
        if !(self.alpha >= 0.0) || !(0.0..=1.0).contains(&self.l1_ratio) {
            return Err(anyhow!(
                "invalid penalty alpha={} l1_ratio={}",
                self.alpha,
                self.l1_ratio
            ));
        }
        let s = normalized_weights(sample_weight, n)?;

        let y_mean = weighted_mean(y.iter().copied(), &s, n);
        let x_mean: Vec<f64> = (0..p)
            .map(|j| weighted_mean(x.column(j).iter().copied(), &s, n))
            .collect();

        let mut xc = x.clone();
        for j in 0..p {
            xc.column_mut(j).mapv_inplace(|v| v - x_mean[j]);
        }
        let mut residual: Vec<f64> = y.iter().map(|v| v - y_mean).collect();
        let col_norm: Vec<f64> = (0..p)
            .map(|j| {
                xc.column(j)
                    .iter()
                    .zip(&s)
                    .map(|(v, w)| w * v * v)
                    .sum()
            })
            .collect();

        let nf = n as f64;
        let l1 = self.alpha * self.l1_ratio * nf;
        let l2 = self.alpha * (1.0 - self.l1_ratio) * nf;

        let mut coef = vec![0.0_f64; p];
        let mut converged = false;
        let mut n_iter = 0;
        for iter in 0..self.max_iter.max(1) {
            n_iter = iter + 1;
            let mut max_change = 0.0_f64;
            let mut max_coef = 0.0_f64;
            for j in 0..p {
                if col_norm[j] <= 0.0 {
                    continue;
                }
                let old = coef[j];
                let col = xc.column(j);
                let rho = col
                    .iter()
                    .zip(&residual)
                    .zip(&s)
                    .map(|((xv, r), w)| w * xv * r)
                    .sum::<f64>()
                    + old * col_norm[j];
                let new = soft_threshold(rho, l1) / (col_norm[j] + l2);
                if new != old {
                    let delta = new - old;
                    for (r, xv) in residual.iter_mut().zip(col.iter()) {
                        *r -= xv * delta;
                    }
                }
                coef[j] = new;
                max_change = max_change.max((new - old).abs());
                max_coef = max_coef.max(new.abs());
            }
            if max_coef == 0.0 || max_change / max_coef < self.tol {
                converged = true;
                break;
            }
        }
        if !converged {
            warn!(
                alpha = self.alpha,
                l1_ratio = self.l1_ratio,
                max_iter = self.max_iter,
                "elastic net did not converge"
            );
        }

        let intercept = y_mean - x_mean.iter().zip(&coef).map(|(m, c)| m * c).sum::<f64>();
        Ok(ElasticNetModel {
            coefficients: coef,
            intercept,
            n_iter,
            converged,
        })
    }
}

fn soft_threshold(x: f64, lambda: f64) -> f64 {
    if x > lambda {
        x - lambda
    } else if x < -lambda {
        x + lambda
    } else {
        0.0
    }
}

/// Sample weights rescaled to sum to `n`; uniform when absent.
fn normalized_weights(sample_weight: Option<&[f64]>, n: usize) -> Result<Vec<f64>> {
    let Some(w) = sample_weight else {
        return Ok(vec![1.0; n]);
    };
    if w.len() != n {
        return Err(anyhow!("{} sample weights for {} samples", w.len(), n));
    }
    if w.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(anyhow!("sample weights must be finite and non-negative"));
    }
    let total: f64 = w.iter().sum();
    if total <= 0.0 {
        return Err(anyhow!("sample weights sum to zero"));
    }
    Ok(w.iter().map(|v| v * n as f64 / total).collect())
}

fn weighted_mean(values: impl Iterator<Item = f64>, s: &[f64], n: usize) -> f64 {
    values.zip(s).map(|(v, w)| v * w).sum::<f64>() / n as f64
}

/// Normalised importance per feature: `|coef| / max |coef|`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeights {
    entries: Vec<(String, f64)>,
}

impl FeatureWeights {
    pub fn from_pairs(entries: Vec<(String, f64)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, w)| *w)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.entries.iter().map(|(n, w)| (n.as_str(), *w))
    }

    /// Highest weight first; equal weights keep feature order.
    pub fn ranked(&self) -> Vec<(String, f64)> {
        let mut out = self.entries.clone();
        out.sort_by(|a, b| b.1.total_cmp(&a.1));
        out
    }

    /// Scale each design-matrix column whose name has a weight. Columns
    /// without a weight are left as they are.
    pub fn apply(&self, names: &[String], x: &mut Array2<f64>) {
        for (j, name) in names.iter().enumerate() {
            if j >= x.ncols() {
                break;
            }
            if let Some(w) = self.get(name) {
                x.column_mut(j).mapv_inplace(|v| v * w);
            }
        }
    }
}

pub fn extract_feature_weights(model: &ElasticNetModel, names: &[String]) -> Result<FeatureWeights> {
    if names.len() != model.coefficients.len() {
        return Err(anyhow!(
            "{} feature names for {} coefficients",
            names.len(),
            model.coefficients.len()
        ));
    }
    let max = model
        .coefficients
        .iter()
        .fold(0.0_f64, |acc, c| acc.max(c.abs()));
    if max == 0.0 && !names.is_empty() {
        warn!("every stage-one coefficient is zero, all feature weights are zero");
    }
    let entries = names
        .iter()
        .zip(&model.coefficients)
        .map(|(name, c)| {
            let w = if max > 0.0 { c.abs() / max } else { 0.0 };
            (name.clone(), w)
        })
        .collect();
    Ok(FeatureWeights { entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn design(rows: &[[f64; 2]]) -> Array2<f64> {
        Array2::from_shape_fn((rows.len(), 2), |(i, j)| rows[i][j])
    }

    fn linear_data() -> (Array2<f64>, Vec<f64>) {
        let rows: Vec<[f64; 2]> = (0..20)
            .map(|i| [i as f64, ((i * 7) % 5) as f64])
            .collect();
        let y = rows.iter().map(|r| 3.0 * r[0] + 2.0).collect();
        (design(&rows), y)
    }

    #[test]
    fn grid_has_every_combination() {
        let grid = elastic_net_grid();
        assert_eq!(grid.len(), 12);
        assert!(grid.iter().all(|p| p.max_iter == 10_000));
    }

    #[test]
    fn light_penalty_recovers_linear_signal() {
        let (x, y) = linear_data();
        let params = ElasticNetParams {
            alpha: 0.001,
            ..Default::default()
        };
        let model = params.fit(&x, &y, None).unwrap();
        assert!(model.converged);
        assert!((model.coefficients[0] - 3.0).abs() < 0.05);
        assert!(model.coefficients[1].abs() < 0.05);
        let pred = model.predict(&x);
        assert!((pred[10] - 32.0).abs() < 0.5);
    }

    #[test]
    fn heavy_penalty_zeroes_everything() {
        let (x, y) = linear_data();
        let params = ElasticNetParams {
            alpha: 1e6,
            l1_ratio: 0.9,
            ..Default::default()
        };
        let model = params.fit(&x, &y, None).unwrap();
        assert!(model.coefficients.iter().all(|c| *c == 0.0));
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        assert!((model.intercept - mean).abs() < 1e-9);
    }

    #[test]
    fn bad_sample_weights_are_rejected() {
        let (x, y) = linear_data();
        let params = ElasticNetParams::default();
        assert!(params.fit(&x, &y, Some([1.0; 3].as_slice())).is_err());
        assert!(params.fit(&x, &y, Some(vec![0.0; 20].as_slice())).is_err());
    }

    #[test]
    fn integer_sample_weights_match_duplicated_rows() {
        let (x, y) = linear_data();
        let y: Vec<f64> = y
            .iter()
            .enumerate()
            .map(|(i, v)| v + ((i * 3) % 4) as f64)
            .collect();
        let mut weights = vec![1.0; 20];
        weights[3] = 3.0;
        weights[11] = 2.0;

        let mut rows = Vec::new();
        let mut y_dup = Vec::new();
        for (i, w) in weights.iter().enumerate() {
            for _ in 0..*w as usize {
                rows.push([x[[i, 0]], x[[i, 1]]]);
                y_dup.push(y[i]);
            }
        }

        let params = ElasticNetParams {
            alpha: 0.5,
            ..Default::default()
        };
        let weighted = params.fit(&x, &y, Some(weights.as_slice())).unwrap();
        let duplicated = params.fit(&design(&rows), &y_dup, None).unwrap();
        for (a, b) in weighted.coefficients.iter().zip(&duplicated.coefficients) {
            assert!((a - b).abs() < 1e-8, "{a} vs {b}");
        }
        assert!((weighted.intercept - duplicated.intercept).abs() < 1e-8);

        let plain = params.fit(&x, &y, None).unwrap();
        let shift: f64 = weighted
            .coefficients
            .iter()
            .zip(&plain.coefficients)
            .map(|(a, b)| (a - b).abs())
            .sum::<f64>()
            + (weighted.intercept - plain.intercept).abs();
        assert!(shift > 1e-3);
    }

    #[test]
    fn weights_are_normalised_by_largest_coefficient() {
        let model = ElasticNetModel {
            coefficients: vec![2.0, -4.0, 0.0],
            intercept: 0.0,
            n_iter: 1,
            converged: true,
        };
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let weights = extract_feature_weights(&model, &names).unwrap();
        assert_eq!(weights.get("a"), Some(0.5));
        assert_eq!(weights.get("b"), Some(1.0));
        assert_eq!(weights.get("c"), Some(0.0));
        assert_eq!(weights.ranked()[0].0, "b");
    }

    #[test]
    fn all_zero_coefficients_give_zero_weights() {
        let model = ElasticNetModel {
            coefficients: vec![0.0, 0.0],
            intercept: 1.0,
            n_iter: 1,
            converged: true,
        };
        let names = vec!["a".to_string(), "b".to_string()];
        let weights = extract_feature_weights(&model, &names).unwrap();
        assert!(weights.iter().all(|(_, w)| w == 0.0));
        assert!(extract_feature_weights(&model, &names[..1]).is_err());
    }

    #[test]
    fn apply_scales_matching_columns_only() {
        let weights = FeatureWeights::from_pairs(vec![("a".to_string(), 0.5)]);
        let mut x = design(&[[2.0, 3.0], [4.0, 5.0]]);
        weights.apply(&["a".to_string(), "b".to_string()], &mut x);
        assert_eq!(x.column(0).to_vec(), vec![1.0, 2.0]);
        assert_eq!(x.column(1).to_vec(), vec![3.0, 5.0]);
    }
}
