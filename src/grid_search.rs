use std::fmt;

use anyhow::{Result, anyhow, bail};
use ndarray::Array2;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::elastic_net::FeatureWeights;
use polars::prelude::DataFrame;

use crate::frame;
use crate::preprocess::{ColumnSpec, EncoderOptions, Preprocessor};

pub trait Predictor {
    fn predict(&self, x: &Array2<f64>) -> Vec<f64>;
}

/// A hyperparameter set that can be fitted to a design matrix.
pub trait Estimator: Clone + Send + Sync + fmt::Debug {
    type Fitted: Predictor + Send + Sync + Clone + fmt::Debug;

    fn fit(&self, x: &Array2<f64>, y: &[f64], sample_weight: Option<&[f64]>) -> Result<Self::Fitted>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CvConfig {
    pub folds: usize,
    pub shuffle: bool,
    pub seed: u64,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            folds: 10,
            shuffle: false,
            seed: 42,
        }
    }
}

/// (train, test) index pairs. The first `n % folds` test folds hold one extra
/// row.
pub fn kfold(n: usize, cv: &CvConfig) -> Result<Vec<(Vec<usize>, Vec<usize>)>> {
    if cv.folds < 2 {
        bail!("cross-validation needs at least 2 folds, got {}", cv.folds);
    }
    if cv.folds > n {
        bail!("cannot split {} rows into {} folds", n, cv.folds);
    }
    let mut order: Vec<usize> = (0..n).collect();
    if cv.shuffle {
        let mut rng = StdRng::seed_from_u64(cv.seed);
        order.shuffle(&mut rng);
    }

    let base = n / cv.folds;
    let extra = n % cv.folds;
    let mut splits = Vec::with_capacity(cv.folds);
    let mut start = 0;
    for fold in 0..cv.folds {
        let size = base + usize::from(fold < extra);
        let test = order[start..start + size].to_vec();
        let train = order[..start]
            .iter()
            .chain(&order[start + size..])
            .copied()
            .collect();
        splits.push((train, test));
        start += size;
    }
    Ok(splits)
}

/// Preprocessing shared by every fit: which columns to encode and how, plus
/// optional per-feature scaling applied to the encoded matrix.
#[derive(Debug, Clone, Default)]
pub struct PipelineSpec {
    pub columns: ColumnSpec,
    pub encoder: EncoderOptions,
    pub feature_weights: Option<FeatureWeights>,
}

impl PipelineSpec {
    pub fn new(columns: ColumnSpec) -> Self {
        Self {
            columns,
            ..Default::default()
        }
    }

    pub fn with_feature_weights(mut self, weights: Option<FeatureWeights>) -> Self {
        self.feature_weights = weights;
        self
    }

    fn fit_preprocessor(&self, table: &DataFrame) -> Result<Preprocessor> {
        Preprocessor::fit_with(table, &self.columns, self.encoder)
    }

    fn design(&self, pre: &Preprocessor, table: &DataFrame) -> Result<Array2<f64>> {
        let mut x = pre.transform(table)?;
        if let Some(weights) = &self.feature_weights {
            weights.apply(&pre.feature_names(), &mut x);
        }
        Ok(x)
    }

    pub fn fit<E: Estimator>(
        &self,
        estimator: &E,
        table: &DataFrame,
        y: &[f64],
        sample_weight: Option<&[f64]>,
    ) -> Result<FittedPipeline<E::Fitted>> {
        let preprocessor = self.fit_preprocessor(table)?;
        let x = self.design(&preprocessor, table)?;
        let model = estimator.fit(&x, y, sample_weight)?;
        Ok(FittedPipeline {
            spec: self.clone(),
            preprocessor,
            model,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FittedPipeline<M> {
    spec: PipelineSpec,
    pub preprocessor: Preprocessor,
    pub model: M,
}

impl<M: Predictor> FittedPipeline<M> {
    pub fn predict(&self, table: &DataFrame) -> Result<Vec<f64>> {
        let x = self.spec.design(&self.preprocessor, table)?;
        Ok(self.model.predict(&x))
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.preprocessor.feature_names()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore<P> {
    pub params: P,
    /// Mean negative MAE across folds; `None` when any fold failed.
    pub mean_score: Option<f64>,
    pub fold_scores: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct GridSearchOutcome<E: Estimator> {
    pub best_params: E,
    pub best_score: f64,
    pub candidates: Vec<CandidateScore<E>>,
    pub pipeline: FittedPipeline<E::Fitted>,
}

impl<E: Estimator> GridSearchOutcome<E> {
    pub fn best_mae(&self) -> f64 {
        -self.best_score
    }

    pub fn scored_candidates(&self) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.mean_score.is_some())
            .count()
    }
}

struct FoldData {
    x_train: Array2<f64>,
    y_train: Vec<f64>,
    w_train: Option<Vec<f64>>,
    x_test: Array2<f64>,
    y_test: Vec<f64>,
}

pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64
}

fn pick<T: Copy>(values: &[T], idx: &[usize]) -> Vec<T> {
    idx.iter().map(|&i| values[i]).collect()
}

/// Exhaustive search over `grid`, scored by negative MAE under k-fold CV.
/// The preprocessor is refit on each training fold. The winner is refit on
/// every row.
pub fn grid_search<E: Estimator>(
    pipeline: &PipelineSpec,
    grid: &[E],
    table: &DataFrame,
    y: &[f64],
    sample_weight: Option<&[f64]>,
    cv: &CvConfig,
) -> Result<GridSearchOutcome<E>> {
    if grid.is_empty() {
        bail!("empty hyperparameter grid");
    }
    let rows = table.height();
    if y.len() != rows {
        bail!("{} targets for {} rows", y.len(), rows);
    }
    if let Some(w) = sample_weight
        && w.len() != rows
    {
        bail!("{} sample weights for {} rows", w.len(), rows);
    }

    let splits = kfold(rows, cv)?;
    let folds: Vec<FoldData> = splits
        .par_iter()
        .map(|(train, test)| -> Result<FoldData> {
            let train_table = frame::take_rows(table, train)?;
            let test_table = frame::take_rows(table, test)?;
            let pre = pipeline.fit_preprocessor(&train_table)?;
            Ok(FoldData {
                x_train: pipeline.design(&pre, &train_table)?,
                y_train: pick(y, train),
                w_train: sample_weight.map(|w| pick(w, train)),
                x_test: pipeline.design(&pre, &test_table)?,
                y_test: pick(y, test),
            })
        })
        .collect::<Result<_>>()?;

    let jobs: Vec<(usize, usize)> = (0..grid.len())
        .flat_map(|c| (0..folds.len()).map(move |f| (c, f)))
        .collect();
    let scores: Vec<Result<f64>> = jobs
        .par_iter()
        .map(|&(c, f)| -> Result<f64> {
            let fold = &folds[f];
            let model = grid[c].fit(&fold.x_train, &fold.y_train, fold.w_train.as_deref())?;
            let pred = model.predict(&fold.x_test);
            Ok(-mean_absolute_error(&fold.y_test, &pred))
        })
        .collect();

    let mut candidates = Vec::with_capacity(grid.len());
    let mut best: Option<(usize, f64)> = None;
    for (c, params) in grid.iter().enumerate() {
        let chunk = &scores[c * folds.len()..(c + 1) * folds.len()];
        let mut fold_scores = Vec::with_capacity(folds.len());
        let mut failed = None;
        for score in chunk {
            match score {
                Ok(s) => fold_scores.push(*s),
                Err(err) => {
                    failed = Some(err);
                    break;
                }
            }
        }
        let mean_score = match failed {
            Some(err) => {
                warn!(?params, "grid candidate skipped: {err}");
                None
            }
            None => Some(fold_scores.iter().sum::<f64>() / fold_scores.len() as f64),
        };
        if let Some(score) = mean_score {
            debug!(?params, score, "grid candidate scored");
            if best.is_none_or(|(_, b)| score > b) {
                best = Some((c, score));
            }
        }
        candidates.push(CandidateScore {
            params: params.clone(),
            mean_score,
            fold_scores,
        });
    }

    let (best_idx, best_score) =
        best.ok_or_else(|| anyhow!("every one of {} grid candidates failed", grid.len()))?;
    let best_params = grid[best_idx].clone();
    info!(
        params = ?best_params,
        mae = -best_score,
        folds = folds.len(),
        "grid search finished"
    );
    let fitted = pipeline.fit(&best_params, table, y, sample_weight)?;

    Ok(GridSearchOutcome {
        best_params,
        best_score,
        candidates,
        pipeline: fitted,
    })
}
