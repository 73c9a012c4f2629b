use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use polars::prelude::*;
use tracing::{debug, warn};

use crate::config::DataPaths;
use crate::frame::{self, has_column};
use crate::teams::{
    NBA_TEAMS, canonical_or_original, canonical_team, clean_team_label, is_multi_team_code,
};

/// Compound `W-L` columns found in standings exports.
pub const SPLIT_COLUMNS: [&str; 6] = ["Home", "Road", "E", "W", "Pre-ASG", "Post-ASG"];

pub const FIRST_ROUND_LAST_PICK: f64 = 30.0;

const PLAYER_FILE_SUFFIX: &str = "-player-stats.csv";

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("expected {kind} at: {}\nTip: set NBA_DATA_ROOT or pass an explicit path.", .path.display())]
    Missing { kind: &'static str, path: PathBuf },
    #[error("no '*-player-stats.csv' files found under {}", .0.display())]
    NoPlayerFiles(PathBuf),
    #[error("{file}: missing required column `{column}`")]
    MissingColumn { file: String, column: String },
}

fn resolve(path: Option<&Path>, pick: impl FnOnce(DataPaths) -> PathBuf) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| pick(DataPaths::from_env()))
}

fn ensure_exists(path: &Path, kind: &'static str) -> Result<(), DataError> {
    let present = match kind {
        "folder" => path.is_dir(),
        _ => path.is_file(),
    };
    if present {
        Ok(())
    } else {
        Err(DataError::Missing {
            kind,
            path: path.to_path_buf(),
        })
    }
}

fn read_table(path: &Path) -> Result<DataFrame> {
    ensure_exists(path, "file")?;
    let df = frame::read_csv(path)?;
    debug!(path = %path.display(), rows = df.height(), "loaded csv");
    Ok(df)
}

fn require_column(df: &DataFrame, column: &str, path: &Path) -> Result<(), DataError> {
    if has_column(df, column) {
        Ok(())
    } else {
        Err(DataError::MissingColumn {
            file: path.display().to_string(),
            column: column.to_string(),
        })
    }
}

/// Rewrite a text column value by value; nulls stay null.
fn map_text(
    df: &mut DataFrame,
    from: &str,
    to: &str,
    f: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let mapped: Vec<Option<String>> = frame::labels(df, from)?
        .into_iter()
        .map(|v| v.and_then(|s| f(&s)))
        .collect();
    df.with_column(Series::new(to.into(), mapped))?;
    Ok(())
}

fn clean_team_column(mut df: DataFrame) -> Result<DataFrame> {
    if has_column(&df, "Team") {
        map_text(&mut df, "Team", "Team", |s| Some(clean_team_label(s)))?;
    }
    Ok(df)
}

/// Swap the `Tm` acronym column for a canonical `Team` column. Unmapped codes
/// become null.
fn map_acronym_column(mut df: DataFrame) -> Result<DataFrame> {
    if !has_column(&df, "Tm") {
        return Ok(df);
    }
    map_text(&mut df, "Tm", "Team", |code| {
        canonical_team(code).map(str::to_string)
    })?;
    Ok(df.drop("Tm")?)
}

pub fn load_team_records(path: Option<&Path>) -> Result<DataFrame> {
    let path = resolve(path, |p| p.team_records);
    let df = clean_team_column(read_table(&path)?)?;
    split_record_columns(&df)
}

/// Split each `W-L` column into integer `<col>_W` and `<col>_L` columns and
/// drop the original. Absent columns are skipped. A column holding anything
/// other than `W-L` text is left untouched.
pub fn split_record_columns(df: &DataFrame) -> Result<DataFrame> {
    let mut out = df.clone();
    for name in SPLIT_COLUMNS {
        if !has_column(&out, name) {
            continue;
        }
        let values = frame::labels(&out, name)?;

        let mut wins = Vec::with_capacity(values.len());
        let mut losses = Vec::with_capacity(values.len());
        let mut malformed = None;
        for v in &values {
            let Some(raw) = v else {
                wins.push(None);
                losses.push(None);
                continue;
            };
            match parse_win_loss(raw) {
                Some((w, l)) => {
                    wins.push(Some(w));
                    losses.push(Some(l));
                }
                None => {
                    malformed = Some(raw.clone());
                    break;
                }
            }
        }

        if let Some(sample) = malformed {
            warn!(column = name, sample = %sample, "record column is not W-L, leaving it unsplit");
            continue;
        }
        out = out.drop(name)?;
        out.with_column(Series::new(format!("{name}_W").into(), wins))?;
        out.with_column(Series::new(format!("{name}_L").into(), losses))?;
    }
    Ok(out)
}

pub fn parse_win_loss(raw: &str) -> Option<(i64, i64)> {
    let (w, l) = raw.split_once('-')?;
    Some((w.trim().parse().ok()?, l.trim().parse().ok()?))
}

pub fn load_team_stats(path: Option<&Path>) -> Result<DataFrame> {
    let path = resolve(path, |p| p.team_stats);
    clean_team_column(read_table(&path)?)
}

pub fn load_final_results(path: Option<&Path>) -> Result<DataFrame> {
    let path = resolve(path, |p| p.results);
    read_table(&path)
}

pub fn load_coaches(path: Option<&Path>) -> Result<DataFrame> {
    let path = resolve(path, |p| p.coach);
    map_acronym_column(read_table(&path)?)
}

pub fn load_draft(path: Option<&Path>) -> Result<DataFrame> {
    let path = resolve(path, |p| p.draft);
    let raw = read_table(&path)?;
    require_column(&raw, "Season", &path)?;
    require_column(&raw, "Pk", &path)?;
    let raw = map_acronym_column(raw)?;
    require_column(&raw, "Team", &path)?;
    aggregate_draft(&raw)
}

/// Count first-round (pick <= 30) and second-round picks per team-season,
/// densified over every observed season and all 30 teams.
pub fn aggregate_draft(raw: &DataFrame) -> Result<DataFrame> {
    let mut picks = raw.select(["Season", "Team"])?;
    // Unparseable picks count toward neither round.
    picks.with_column(Series::new("Pick".into(), frame::numbers(raw, "Pk")?))?;
    let picks = picks
        .lazy()
        .filter(col("Season").is_not_null().and(col("Team").is_not_null()));

    let counts = picks
        .clone()
        .group_by([col("Season"), col("Team")])
        .agg([
            col("Pick")
                .lt_eq(lit(FIRST_ROUND_LAST_PICK))
                .sum()
                .cast(DataType::Int64)
                .alias("FirstRoundPicks"),
            col("Pick")
                .gt(lit(FIRST_ROUND_LAST_PICK))
                .sum()
                .cast(DataType::Int64)
                .alias("SecondRoundPicks"),
        ]);

    let seasons: BTreeSet<i64> = frame::ints(&picks.collect()?, "Season")?
        .into_iter()
        .flatten()
        .collect();
    let grid_seasons: Vec<i64> = seasons
        .iter()
        .flat_map(|&s| std::iter::repeat_n(s, NBA_TEAMS.len()))
        .collect();
    let grid_teams: Vec<&str> = seasons.iter().flat_map(|_| NBA_TEAMS).collect();
    let grid = df!("Season" => grid_seasons, "Team" => grid_teams)?;

    let keys = [col("Season"), col("Team")];
    Ok(grid
        .lazy()
        .join(counts, keys.clone(), keys, JoinArgs::new(JoinType::Left))
        .with_columns([
            col("FirstRoundPicks").fill_null(lit(0i64)),
            col("SecondRoundPicks").fill_null(lit(0i64)),
        ])
        .sort(["Season", "Team"], SortMultipleOptions::default())
        .collect()?)
}

pub fn load_payroll(path: Option<&Path>) -> Result<DataFrame> {
    let path = resolve(path, |p| p.payroll);
    let raw = clean_team_column(read_table(&path)?)?;
    require_column(&raw, "Team", &path)?;
    melt_payroll(&raw).with_context(|| format!("reshape payroll {}", path.display()))
}

/// Reshape one-column-per-season payroll into (Team, Season, Payroll) rows.
/// Payroll stays text; modelling parses it leniently.
pub fn melt_payroll(wide: &DataFrame) -> Result<DataFrame> {
    if !has_column(wide, "Team") {
        bail!("payroll table has no Team column");
    }
    let season_cols: Vec<String> = frame::column_names(wide)
        .into_iter()
        .filter(|c| c != "Team")
        .collect();
    for name in &season_cols {
        if name.trim().parse::<i64>().is_err() {
            bail!("payroll column `{name}` is not a season year");
        }
    }

    let seasons: Vec<String> = season_cols.iter().map(|c| c.trim().to_string()).collect();
    let mut text = vec![col("Team")];
    text.extend(
        season_cols
            .iter()
            .zip(&seasons)
            .map(|(raw, season)| col(raw.as_str()).cast(DataType::String).alias(season.as_str())),
    );
    let wide = wide.clone().lazy().select(text).collect()?;

    Ok(wide
        .unpivot(seasons, ["Team"])?
        .lazy()
        .select([
            col("Team"),
            col("variable").cast(DataType::Int64).alias("Season"),
            col("value").alias("Payroll"),
        ])
        .collect()?)
}

pub fn load_players(dir: Option<&Path>) -> Result<DataFrame> {
    let dir = resolve(dir, |p| p.player_stats_dir);
    ensure_exists(&dir, "folder")?;

    let mut files = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("read entry in {}", dir.display()))?
            .path();
        let is_player_file = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(PLAYER_FILE_SUFFIX));
        if is_player_file {
            files.push(path);
        }
    }
    files.sort();
    if files.is_empty() {
        return Err(DataError::NoPlayerFiles(dir).into());
    }

    let mut seasons = Vec::with_capacity(files.len());
    for file in &files {
        let season = season_from_file_name(file)?;
        let df = frame::read_csv(file)?;
        require_column(&df, "Team", file)?;
        seasons.push(df.lazy().with_column(lit(season).alias("Season")));
    }

    let mut players = concat_lf_diagonal(
        seasons,
        UnionArgs {
            to_supertypes: true,
            ..Default::default()
        },
    )?
    .collect()?;

    let keep: BooleanChunked = frame::labels(&players, "Team")?
        .iter()
        .map(|t| !t.as_deref().is_some_and(is_multi_team_code))
        .collect();
    players = players.filter(&keep)?;
    map_text(&mut players, "Team", "Team", |code| Some(canonical_or_original(code)))?;
    Ok(players)
}

/// Season from the leading numeric token of `2024-player-stats.csv`.
pub fn season_from_file_name(path: &Path) -> Result<i64> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("unreadable file name {}", path.display()))?;
    let token = name.split('-').next().unwrap_or_default();
    token
        .parse::<i64>()
        .with_context(|| format!("no leading season year in {name}"))
}

pub fn load_sos(path: Option<&Path>) -> Result<DataFrame> {
    let path = resolve(path, |p| p.sos);
    rename_team_columns(&read_table(&path)?)
}

/// Rename the headers that are known team acronyms. Aliases of one team
/// (BRK/BKN, CHA/CHO) collapse into a single column holding the first
/// non-null value, left to right.
pub fn rename_team_columns(df: &DataFrame) -> Result<DataFrame> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for header in frame::column_names(df) {
        let target = canonical_team(&header)
            .map(str::to_string)
            .unwrap_or_else(|| header.clone());
        match groups.iter_mut().find(|(name, _)| *name == target) {
            Some((_, sources)) => sources.push(header),
            None => groups.push((target, vec![header])),
        }
    }

    let exprs: Vec<Expr> = groups
        .into_iter()
        .map(|(name, sources)| {
            let is_team = NBA_TEAMS.contains(&name.as_str());
            let mut inputs: Vec<Expr> = sources
                .iter()
                .map(|s| {
                    let e = col(s.as_str());
                    if is_team { e.cast(DataType::Float64) } else { e }
                })
                .collect();
            let expr = if inputs.len() == 1 {
                inputs.remove(0)
            } else {
                coalesce(&inputs)
            };
            expr.alias(name.as_str())
        })
        .collect();
    Ok(df.clone().lazy().select(exprs).collect()?)
}

/// Reshape a season-per-row, team-per-column schedule table into
/// (Team, Season, SOS) rows, one per team-season.
pub fn sos_to_long(sos: &DataFrame) -> Result<Option<DataFrame>> {
    if !has_column(sos, "Season") {
        warn!("strength-of-schedule table has no Season column, skipping reshape");
        return Ok(None);
    }
    let teams: Vec<String> = frame::column_names(sos)
        .into_iter()
        .filter(|c| NBA_TEAMS.contains(&c.as_str()))
        .collect();
    if teams.is_empty() {
        warn!("strength-of-schedule table has no team columns");
        return Ok(None);
    }

    let mut wide = vec![col("Season")];
    wide.extend(teams.iter().map(|t| col(t.as_str()).cast(DataType::Float64)));
    let long = sos
        .clone()
        .lazy()
        .select(wide)
        .collect()?
        .unpivot(teams, ["Season"])?
        .lazy()
        .select([
            col("variable").alias("Team"),
            col("Season"),
            col("value").alias("SOS"),
        ])
        .collect()?;
    Ok(Some(frame::first_per_key(&long, &["Team", "Season"])?))
}
