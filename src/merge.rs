use anyhow::Result;
use polars::prelude::*;
use tracing::{info, warn};

use crate::config::DataPaths;
use crate::frame::{self, has_column};
use crate::loaders::{self, DataError};

pub const KEYS: [&str; 2] = ["Team", "Season"];

/// Front-office columns carried into the master table.
const FRONT_OFFICE_FEATURES: [&str; 6] = [
    "Team",
    "Season",
    "Coach_Count",
    "FirstRoundPicks",
    "SecondRoundPicks",
    "Payroll",
];

/// Stats and records side by side. Rows found in only one source are kept.
pub fn merge_team_data(stats: &DataFrame, records: &DataFrame) -> Result<DataFrame> {
    frame::join(stats, records, &KEYS, JoinType::Full)
}

/// Coaches joined to draft counts (both required), with the distinct coach
/// count per team-season and, when given, payroll.
pub fn merge_front_office(
    coaches: &DataFrame,
    draft: &DataFrame,
    payroll: Option<&DataFrame>,
) -> Result<DataFrame> {
    let front_office = frame::join(coaches, draft, &KEYS, JoinType::Inner)?;
    let front_office = frame::join(&front_office, &coach_counts(coaches)?, &KEYS, JoinType::Left)?;
    match payroll {
        Some(payroll) => frame::join(&front_office, payroll, &KEYS, JoinType::Left),
        None => Ok(front_office),
    }
}

/// Distinct coach names per (Team, Season); more than one means a mid-season
/// change.
pub fn coach_counts(coaches: &DataFrame) -> Result<DataFrame> {
    distinct_per_key(coaches, "Coach", "Coach_Count")
}

/// Distinct players per (Team, Season), as `Roster_Count`.
pub fn player_counts(players: &DataFrame) -> Result<DataFrame> {
    distinct_per_key(players, "Player", "Roster_Count")
}

fn distinct_per_key(df: &DataFrame, column: &str, alias: &str) -> Result<DataFrame> {
    Ok(df
        .clone()
        .lazy()
        .filter(col("Team").is_not_null().and(col("Season").is_not_null()))
        .group_by([col("Team"), col("Season")])
        .agg([col(column)
            .drop_nulls()
            .n_unique()
            .cast(DataType::Int64)
            .alias(alias)])
        .sort(KEYS, SortMultipleOptions::default())
        .collect()?)
}

/// Every raw source the master table draws on.
#[derive(Debug, Clone)]
pub struct SourceTables {
    pub team_stats: DataFrame,
    pub team_records: DataFrame,
    pub coaches: DataFrame,
    pub draft: DataFrame,
    pub payroll: Option<DataFrame>,
    pub sos: Option<DataFrame>,
    pub players: Option<DataFrame>,
}

impl SourceTables {
    /// Load all sources. Payroll, schedule strength and player files are
    /// optional and skipped with a warning when absent.
    pub fn load(paths: &DataPaths) -> Result<Self> {
        Ok(Self {
            team_stats: loaders::load_team_stats(Some(&paths.team_stats))?,
            team_records: loaders::load_team_records(Some(&paths.team_records))?,
            coaches: loaders::load_coaches(Some(&paths.coach))?,
            draft: loaders::load_draft(Some(&paths.draft))?,
            payroll: optional("payroll", loaders::load_payroll(Some(&paths.payroll)))?,
            sos: optional("strength of schedule", loaders::load_sos(Some(&paths.sos)))?,
            players: optional(
                "player stats",
                loaders::load_players(Some(&paths.player_stats_dir)),
            )?,
        })
    }
}

fn optional(label: &str, loaded: Result<DataFrame>) -> Result<Option<DataFrame>> {
    match loaded {
        Ok(df) => Ok(Some(df)),
        Err(err) => match err.downcast_ref::<DataError>() {
            Some(DataError::Missing { .. } | DataError::NoPlayerFiles(_)) => {
                warn!(source = label, "{err}");
                Ok(None)
            }
            _ => Err(err),
        },
    }
}

/// One row per team-season, ordered by season then team: performance, front
/// office, schedule strength and roster size.
pub fn build_master_table(sources: &SourceTables) -> Result<DataFrame> {
    let mut master = merge_team_data(&sources.team_stats, &sources.team_records)?;

    let front_office =
        merge_front_office(&sources.coaches, &sources.draft, sources.payroll.as_ref())?;
    let keep: Vec<&str> = FRONT_OFFICE_FEATURES
        .into_iter()
        .filter(|c| has_column(&front_office, c))
        .collect();
    let front_office = frame::first_per_key(&front_office, &KEYS)?.select(keep)?;
    master = frame::join(&master, &front_office, &KEYS, JoinType::Left)?;

    if let Some(sos) = &sources.sos
        && let Some(long) = loaders::sos_to_long(sos)?
    {
        master = frame::join(&master, &long, &KEYS, JoinType::Left)?;
    }
    if let Some(players) = &sources.players {
        if has_column(players, "Player") {
            master = frame::join(&master, &player_counts(players)?, &KEYS, JoinType::Left)?;
        } else {
            warn!("player tables have no Player column, skipping roster counts");
        }
    }

    let master = master.sort(["Season", "Team"], SortMultipleOptions::default())?;
    info!(
        rows = master.height(),
        columns = master.width(),
        "built master table"
    );
    Ok(master)
}
