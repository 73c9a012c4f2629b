use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use polars::prelude::DataFrame;

use crate::frame;

const MISSING_CATEGORY: &str = "missing";
pub const INFREQUENT_SUFFIX: &str = "infrequent";

/// Which columns feed the model. Anything not listed is dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub numeric: Vec<String>,
    pub categorical: Vec<String>,
}

impl ColumnSpec {
    pub fn new(numeric: &[&str], categorical: &[&str]) -> Self {
        Self {
            numeric: numeric.iter().map(|s| s.to_string()).collect(),
            categorical: categorical.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.numeric.is_empty() && self.categorical.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderOptions {
    /// Categories seen fewer times than this share one bucket column.
    pub min_frequency: usize,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self { min_frequency: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NumericColumn {
    name: String,
    fill: f64,
    center: f64,
    scale: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CategoricalColumn {
    name: String,
    fill: String,
    /// Frequent categories, sorted; the first one is the dropped baseline.
    frequent: Vec<String>,
    has_infrequent: bool,
}

impl CategoricalColumn {
    fn width(&self) -> usize {
        self.frequent.len().saturating_sub(1) + usize::from(self.has_infrequent)
    }

    fn slot(&self, value: &str) -> Option<usize> {
        match self.frequent.iter().position(|c| c == value) {
            Some(0) => None,
            Some(pos) => Some(pos - 1),
            None if self.has_infrequent => Some(self.width() - 1),
            None => None,
        }
    }
}

/// Mean-impute + robust-scale numeric columns, mode-impute + one-hot encode
/// categorical ones, concatenated in that order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preprocessor {
    numeric: Vec<NumericColumn>,
    categorical: Vec<CategoricalColumn>,
}

impl Preprocessor {
    pub fn fit(table: &DataFrame, spec: &ColumnSpec) -> Result<Self> {
        Self::fit_with(table, spec, EncoderOptions::default())
    }

    pub fn fit_with(table: &DataFrame, spec: &ColumnSpec, options: EncoderOptions) -> Result<Self> {
        let mut numeric = Vec::with_capacity(spec.numeric.len());
        for name in &spec.numeric {
            let values = numeric_column(table, name)?;
            numeric.push(fit_numeric(name, &values));
        }

        let mut categorical = Vec::with_capacity(spec.categorical.len());
        for name in &spec.categorical {
            let values = categorical_column(table, name)?;
            categorical.push(fit_categorical(name, &values, options.min_frequency.max(1)));
        }

        Ok(Self {
            numeric,
            categorical,
        })
    }

    pub fn n_features(&self) -> usize {
        self.numeric.len() + self.categorical.iter().map(|c| c.width()).sum::<usize>()
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numeric.iter().map(|c| c.name.clone()).collect();
        for col in &self.categorical {
            for cat in col.frequent.iter().skip(1) {
                names.push(format!("{}_{}", col.name, cat));
            }
            if col.has_infrequent {
                names.push(format!("{}_{}", col.name, INFREQUENT_SUFFIX));
            }
        }
        names
    }

    /// Raw input column behind each output feature, aligned with
    /// `feature_names`.
    pub fn feature_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.numeric.iter().map(|c| c.name.clone()).collect();
        for col in &self.categorical {
            sources.extend(std::iter::repeat_n(col.name.clone(), col.width()));
        }
        sources
    }

    pub fn transform(&self, table: &DataFrame) -> Result<Array2<f64>> {
        let mut out = Array2::<f64>::zeros((table.height(), self.n_features()));

        for (j, col) in self.numeric.iter().enumerate() {
            let values = numeric_column(table, &col.name)?;
            for (i, v) in values.iter().enumerate() {
                let x = v.unwrap_or(col.fill);
                out[[i, j]] = (x - col.center) / col.scale;
            }
        }

        let mut offset = self.numeric.len();
        for col in &self.categorical {
            let values = categorical_column(table, &col.name)?;
            for (i, v) in values.iter().enumerate() {
                let label = v.clone().unwrap_or_else(|| col.fill.clone());
                if let Some(slot) = col.slot(&label) {
                    out[[i, offset + slot]] = 1.0;
                }
            }
            offset += col.width();
        }

        Ok(out)
    }
}

fn declared(table: &DataFrame, name: &str) -> Result<()> {
    if frame::has_column(table, name) {
        Ok(())
    } else {
        Err(anyhow!("column `{name}` declared for preprocessing is missing"))
    }
}

fn numeric_column(table: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    declared(table, name)?;
    frame::numbers(table, name)
}

fn categorical_column(table: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    declared(table, name)?;
    frame::labels(table, name)
}

fn fit_numeric(name: &str, values: &[Option<f64>]) -> NumericColumn {
    let observed: Vec<f64> = values.iter().flatten().copied().collect();
    // An all-null column imputes to zero and passes through unscaled.
    let fill = if observed.is_empty() {
        0.0
    } else {
        observed.iter().sum::<f64>() / observed.len() as f64
    };

    let mut imputed: Vec<f64> = values.iter().map(|v| v.unwrap_or(fill)).collect();
    imputed.sort_by(|a, b| a.total_cmp(b));

    let center = quantile(&imputed, 0.5);
    let iqr = quantile(&imputed, 0.75) - quantile(&imputed, 0.25);
    let scale = if iqr.abs() < f64::EPSILON { 1.0 } else { iqr };

    NumericColumn {
        name: name.to_string(),
        fill,
        center,
        scale,
    }
}

fn fit_categorical(name: &str, values: &[Option<String>], min_frequency: usize) -> CategoricalColumn {
    let mut observed: BTreeMap<String, usize> = BTreeMap::new();
    for label in values.iter().flatten() {
        *observed.entry(label.clone()).or_default() += 1;
    }
    // Most frequent label; BTreeMap order makes the smallest label win ties.
    let fill = observed
        .iter()
        .fold(None::<(&String, usize)>, |best, (label, &n)| match best {
            Some((_, best_n)) if best_n >= n => best,
            _ => Some((label, n)),
        })
        .map(|(label, _)| label.clone())
        .unwrap_or_else(|| MISSING_CATEGORY.to_string());

    let nulls = values.iter().filter(|v| v.is_none()).count();
    if nulls > 0 {
        *observed.entry(fill.clone()).or_default() += nulls;
    }

    let frequent: Vec<String> = observed
        .iter()
        .filter(|&(_, &n)| n >= min_frequency)
        .map(|(label, _)| label.clone())
        .collect();
    let has_infrequent = observed.len() > frequent.len();

    CategoricalColumn {
        name: name.to_string(),
        fill,
        frequent,
        has_infrequent,
    }
}

/// Linear-interpolated quantile of sorted data.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
