use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use polars::prelude::*;
use tracing::{info, warn};

use crate::config::{env_bool, env_u64, env_usize};
use crate::frame::{self, has_column};
use crate::elastic_net::{ElasticNetParams, FeatureWeights, elastic_net_grid, extract_feature_weights};
use crate::grid_search::{CvConfig, Estimator, GridSearchOutcome, PipelineSpec, grid_search};
use crate::knn::{KnnParams, knn_grid};
use crate::merge::KEYS;
use crate::preprocess::{ColumnSpec, Preprocessor};

pub const TARGET: &str = "NWins";
pub const PREDICTION: &str = "Pred_NWins";
pub const LAGGED_PREDICTION: &str = "Pred_Wins";
pub const DEFAULT_RECENCY_COL: &str = "Season";

/// Free-text identifiers that would only memorise rows.
const IDENTIFIER_COLUMNS: [&str; 3] = ["Team", "Coach", "Player"];
const EXCLUDED_COLUMNS: [&str; 4] = ["Season", TARGET, PREDICTION, LAGGED_PREDICTION];

#[derive(Debug, Clone, PartialEq)]
pub struct WinModelConfig {
    pub stage1_cv: CvConfig,
    pub stage2_cv: CvConfig,
    /// Column driving the linear recency weight; `None` trains unweighted.
    pub recency_col: Option<String>,
    pub use_feature_weights: bool,
    pub top_features: usize,
}

impl Default for WinModelConfig {
    fn default() -> Self {
        Self {
            stage1_cv: CvConfig::default(),
            stage2_cv: CvConfig::default(),
            recency_col: Some(DEFAULT_RECENCY_COL.to_string()),
            use_feature_weights: true,
            top_features: 10,
        }
    }
}

impl WinModelConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let shuffle = env_bool("NBA_CV_SHUFFLE", false);
        let seed = env_u64("NBA_SEED", 42);
        let recency_col = match env::var("NBA_RECENCY_COL") {
            Ok(raw) => {
                let raw = raw.trim();
                if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
                    None
                } else {
                    Some(raw.to_string())
                }
            }
            Err(_) => defaults.recency_col,
        };
        Self {
            stage1_cv: CvConfig {
                folds: env_usize("NBA_STAGE1_FOLDS", defaults.stage1_cv.folds),
                shuffle,
                seed,
            },
            stage2_cv: CvConfig {
                folds: env_usize("NBA_STAGE2_FOLDS", defaults.stage2_cv.folds),
                shuffle,
                seed,
            },
            recency_col,
            use_feature_weights: env_bool("NBA_USE_FEATURE_WEIGHTS", true),
            top_features: env_usize("NBA_TOP_FEATURES", defaults.top_features),
        }
    }
}

/// Adds `NWins`: the same team's `W` in the following season, Null when that
/// season is absent.
pub fn add_next_season_target(table: &DataFrame) -> Result<DataFrame> {
    for column in ["W", "Team", "Season"] {
        if !has_column(table, column) {
            bail!("master table has no {column} column");
        }
    }
    let next = table
        .clone()
        .lazy()
        .select([
            col("Team"),
            (col("Season") - lit(1i64)).alias("Season"),
            col("W").cast(DataType::Float64).alias(TARGET),
        ])
        .filter(col(TARGET).is_not_null())
        .group_by_stable([col("Team"), col("Season")])
        .agg([col(TARGET).first()])
        .collect()?;

    let base = if has_column(table, TARGET) {
        table.drop(TARGET)?
    } else {
        table.clone()
    };
    frame::join(&base, &next, &KEYS, JoinType::Left)
}

/// Numeric columns become numeric features and text columns categorical
/// ones. Identifiers, keys, the target and earlier predictions are skipped.
pub fn infer_feature_spec(table: &DataFrame) -> ColumnSpec {
    let mut spec = ColumnSpec::default();
    for name in frame::column_names(table) {
        if IDENTIFIER_COLUMNS.contains(&name.as_str()) || EXCLUDED_COLUMNS.contains(&name.as_str()) {
            continue;
        }
        if frame::is_numeric_column(table, &name) {
            spec.numeric.push(name);
        } else {
            spec.categorical.push(name);
        }
    }
    spec
}

/// `1 + 0.1 × (season − earliest season)`. Rows without a season get 1.
pub fn recency_weights(table: &DataFrame, column: &str) -> Result<Vec<f64>> {
    if !has_column(table, column) {
        bail!("recency column `{column}` not found");
    }
    let seasons = frame::numbers(table, column)?;
    let Some(min) = seasons.iter().flatten().copied().reduce(f64::min) else {
        bail!("recency column `{column}` has no numeric values");
    };
    Ok(seasons
        .iter()
        .map(|s| s.map_or(1.0, |s| 1.0 + 0.1 * (s - min)))
        .collect())
}

/// Importance of each raw column: the largest weight among the encoded
/// features it produced. Highest first.
pub fn raw_feature_ranking(weights: &FeatureWeights, preprocessor: &Preprocessor) -> Vec<(String, f64)> {
    let mut ranking: Vec<(String, f64)> = Vec::new();
    for (name, source) in preprocessor
        .feature_names()
        .iter()
        .zip(preprocessor.feature_sources())
    {
        let w = weights.get(name).unwrap_or(0.0);
        match ranking.iter_mut().find(|(s, _)| *s == source) {
            Some(entry) => entry.1 = entry.1.max(w),
            None => ranking.push((source, w)),
        }
    }
    ranking.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranking
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport<P> {
    pub best_params: P,
    pub cv_mae: f64,
    pub folds: usize,
    pub candidates: usize,
    pub scored_candidates: usize,
}

impl<P: Estimator> StageReport<P> {
    fn from_outcome(outcome: &GridSearchOutcome<P>, cv: &CvConfig) -> Self {
        Self {
            best_params: outcome.best_params.clone(),
            cv_mae: outcome.best_mae(),
            folds: cv.folds,
            candidates: outcome.candidates.len(),
            scored_candidates: outcome.scored_candidates(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    pub generated_at: String,
    pub training_rows: usize,
    pub prediction_rows: usize,
    pub numeric_features: Vec<String>,
    pub categorical_features: Vec<String>,
    pub recency_col: Option<String>,
    pub used_feature_weights: bool,
    pub stage1: StageReport<ElasticNetParams>,
    pub stage2: StageReport<KnnParams>,
    pub feature_weights: Vec<(String, f64)>,
    pub top_features: Vec<String>,
}

impl FitReport {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok();
        }
        let raw = serde_json::to_string_pretty(self).context("serialize fit report")?;
        fs::write(path, raw).with_context(|| format!("write {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct WinModelRun {
    pub results: DataFrame,
    pub feature_weights: FeatureWeights,
    pub report: FitReport,
}

/// Stage 1 (ElasticNet) ranks the features, stage 2 (k-NN over the weighted
/// features) predicts next-season wins for every team-season.
pub fn train_win_model(master: &DataFrame, config: &WinModelConfig) -> Result<WinModelRun> {
    let data = add_next_season_target(master)?;

    let wins = frame::numbers(&data, "W")?;
    let targets = frame::numbers(&data, TARGET)?;
    let (train_idx, y): (Vec<usize>, Vec<f64>) = wins
        .iter()
        .zip(&targets)
        .enumerate()
        .filter_map(|(i, (w, target))| w.and(*target).map(|t| (i, t)))
        .unzip();
    if train_idx.is_empty() {
        bail!("no team-season has both W and a following season to learn from");
    }
    let train = frame::take_rows(&data, &train_idx)?;

    let spec = infer_feature_spec(&data);
    if spec.is_empty() {
        bail!("master table has no usable feature columns");
    }
    info!(
        rows = train.height(),
        numeric = spec.numeric.len(),
        categorical = spec.categorical.len(),
        "training win model"
    );

    let sample_weight = match &config.recency_col {
        Some(col) if has_column(&train, col) => Some(recency_weights(&train, col)?),
        Some(col) => {
            warn!(column = %col, "recency column missing, training unweighted");
            None
        }
        None => None,
    };

    let stage1_pipeline = PipelineSpec::new(spec.clone());
    let stage1 = grid_search(
        &stage1_pipeline,
        &elastic_net_grid(),
        &train,
        &y,
        sample_weight.as_deref(),
        &config.stage1_cv,
    )
    .context("stage 1 (elastic net) grid search")?;
    let weights = extract_feature_weights(&stage1.pipeline.model, &stage1.pipeline.feature_names())?;

    let stage2_pipeline = PipelineSpec::new(spec.clone())
        .with_feature_weights(config.use_feature_weights.then(|| weights.clone()));
    let stage2 = grid_search(
        &stage2_pipeline,
        &knn_grid(),
        &train,
        &y,
        sample_weight.as_deref(),
        &config.stage2_cv,
    )
    .context("stage 2 (k-NN) grid search")?;

    let predictions = stage2.pipeline.predict(&data)?;
    let top: Vec<String> = raw_feature_ranking(&weights, &stage1.pipeline.preprocessor)
        .into_iter()
        .filter(|(name, w)| *w > 0.0 && name != "W")
        .take(config.top_features)
        .map(|(name, _)| name)
        .collect();
    let results = build_results(&data, &predictions, &top)?;

    info!(
        stage1_mae = stage1.best_mae(),
        stage2_mae = stage2.best_mae(),
        rows = results.height(),
        "win model fitted"
    );

    let report = FitReport {
        generated_at: Utc::now().to_rfc3339(),
        training_rows: train.height(),
        prediction_rows: results.height(),
        numeric_features: spec.numeric,
        categorical_features: spec.categorical,
        recency_col: sample_weight.as_ref().and(config.recency_col.clone()),
        used_feature_weights: config.use_feature_weights,
        stage1: StageReport::from_outcome(&stage1, &config.stage1_cv),
        stage2: StageReport::from_outcome(&stage2, &config.stage2_cv),
        feature_weights: weights.ranked(),
        top_features: top,
    };

    Ok(WinModelRun {
        results,
        feature_weights: weights,
        report,
    })
}

/// `Season, Team, W, Pred_NWins, Pred_Wins` then the chosen feature columns.
/// `Pred_Wins` is the prediction made one season earlier for the same team.
fn build_results(data: &DataFrame, predictions: &[f64], features: &[String]) -> Result<DataFrame> {
    if predictions.len() != data.height() {
        bail!(
            "{} predictions for {} team-seasons",
            predictions.len(),
            data.height()
        );
    }
    let mut columns: Vec<String> = ["Season", "Team", "W"].map(String::from).to_vec();
    columns.extend(features.iter().cloned());
    let mut scored = data.select(columns.clone())?;
    scored.with_column(Series::new(PREDICTION.into(), predictions.to_vec()))?;
    let scored = scored
        .lazy()
        .filter(col("Team").is_not_null().and(col("Season").is_not_null()))
        .collect()?;

    let lagged = scored
        .clone()
        .lazy()
        .select([
            col("Team"),
            (col("Season") + lit(1i64)).alias("Season"),
            col(PREDICTION).alias(LAGGED_PREDICTION),
        ])
        .group_by_stable([col("Team"), col("Season")])
        .agg([col(LAGGED_PREDICTION).first()])
        .collect()?;

    columns.insert(3, PREDICTION.to_string());
    columns.insert(4, LAGGED_PREDICTION.to_string());
    Ok(frame::join(&scored, &lagged, &KEYS, JoinType::Left)?.select(columns)?)
}
