use polars::prelude::DataFrame;
use serde::Serialize;

use crate::config::env_f64;
use crate::frame::{self, has_column};

pub const DEFAULT_THRESHOLD: f64 = 10.0;
const WITHIN_COLUMN: &str = "within_threshold";

/// Columns shown as headline numbers rather than as features.
const HEADLINE_COLUMNS: [&str; 4] = ["Season", "Team", "W", "Pred_NWins"];

pub fn threshold_from_env() -> f64 {
    env_f64("NBA_ACCURACY_THRESHOLD", DEFAULT_THRESHOLD)
}

/// Sorted distinct team names.
pub fn teams(results: &DataFrame) -> Vec<String> {
    let mut out: Vec<String> = frame::labels(results, "Team")
        .map(|teams| teams.into_iter().flatten().collect())
        .unwrap_or_default();
    out.sort();
    out.dedup();
    out
}

pub fn latest_season(results: &DataFrame) -> Option<i64> {
    frame::ints(results, "Season").ok()?.into_iter().flatten().max()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamOutlook {
    pub team: String,
    pub season: i64,
    pub actual_wins: Option<f64>,
    pub predicted_wins: Option<f64>,
    pub features: Vec<(String, String)>,
}

impl TeamOutlook {
    /// Predicted wins truncated to a whole number.
    pub fn predicted_display(&self) -> Option<i64> {
        self.predicted_wins.map(|p| p.trunc() as i64)
    }

    /// Predicted minus actual, truncated toward zero.
    pub fn delta(&self) -> Option<i64> {
        match (self.predicted_wins, self.actual_wins) {
            (Some(p), Some(a)) => Some((p - a).trunc() as i64),
            _ => None,
        }
    }
}

/// The team's row in the latest season of the whole table.
pub fn team_outlook(results: &DataFrame, team: &str) -> Option<TeamOutlook> {
    let season = latest_season(results)?;
    let row = frame::find_row(results, team, season).ok()??;

    let number = |col: &str| {
        frame::numbers(results, col)
            .ok()
            .and_then(|values| values[row])
    };
    let features = frame::column_names(results)
        .into_iter()
        .filter(|c| !HEADLINE_COLUMNS.contains(&c.as_str()))
        .map(|c| {
            let value = frame::labels(results, &c)
                .ok()
                .and_then(|values| values[row].clone())
                .unwrap_or_default();
            (c, value)
        })
        .collect();

    Some(TeamOutlook {
        team: team.to_string(),
        season,
        actual_wins: number("W"),
        predicted_wins: number("Pred_NWins"),
        features,
    })
}

/// `|predicted − actual| ≤ threshold`; a missing side never counts.
pub fn within_threshold(actual: Option<f64>, predicted: Option<f64>, threshold: f64) -> bool {
    match (actual, predicted) {
        (Some(a), Some(p)) => (p - a).abs() <= threshold,
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyRow {
    pub team: String,
    pub actual_wins: Option<f64>,
    pub predicted_wins: Option<f64>,
    pub within_threshold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracyReport {
    pub season: i64,
    pub threshold: f64,
    pub rows: Vec<AccuracyRow>,
}

impl AccuracyReport {
    pub fn hits(&self) -> usize {
        self.rows.iter().filter(|r| r.within_threshold).count()
    }

    /// Share of teams within the threshold, in [0, 1].
    pub fn accuracy(&self) -> f64 {
        if self.rows.is_empty() {
            0.0
        } else {
            self.hits() as f64 / self.rows.len() as f64
        }
    }
}

fn truthy(raw: &str) -> bool {
    match frame::parse_number(raw) {
        Some(n) => n != 0.0,
        None => matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "t" | "yes"),
    }
}

/// Per-team hit/miss for one season. Uses a stored `within_threshold` column
/// when the table has one. `None` when the season has no rows or the table
/// has no `Pred_Wins`.
pub fn season_accuracy(results: &DataFrame, season: i64, threshold: f64) -> Option<AccuracyReport> {
    if !has_column(results, "Pred_Wins") {
        return None;
    }
    let seasons = frame::ints(results, "Season").ok()?;
    let teams = frame::labels(results, "Team").ok()?;
    let actual = frame::numbers(results, "W").ok()?;
    let predicted = frame::numbers(results, "Pred_Wins").ok()?;
    let stored = if has_column(results, WITHIN_COLUMN) {
        Some(frame::labels(results, WITHIN_COLUMN).ok()?)
    } else {
        None
    };

    let rows: Vec<AccuracyRow> = (0..results.height())
        .filter(|&i| seasons[i] == Some(season))
        .map(|i| AccuracyRow {
            team: teams[i].clone().unwrap_or_default(),
            actual_wins: actual[i],
            predicted_wins: predicted[i],
            within_threshold: match &stored {
                Some(flags) => flags[i].as_deref().is_some_and(truthy),
                None => within_threshold(actual[i], predicted[i], threshold),
            },
        })
        .collect();
    if rows.is_empty() {
        return None;
    }
    Some(AccuracyReport {
        season,
        threshold,
        rows,
    })
}
