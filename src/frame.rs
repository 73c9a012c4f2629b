//! Glue between the CSV exports and `polars`: loading with consistent key
//! types, lenient numeric views for modelling, and keyed joins.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result, bail};
use polars::prelude::*;

const INFER_SCHEMA_ROWS: usize = 10_000;
const ROW_ORDER: &str = "__row_order";

pub fn read_csv(path: &Path) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .with_context(|| format!("open {}", path.display()))?
        .finish()
        .with_context(|| format!("parse csv {}", path.display()))?;
    normalize_season(df)
}

/// Parse CSV text held in memory.
pub fn parse_csv(raw: &str) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
        .into_reader_with_file_handle(Cursor::new(raw.as_bytes().to_vec()))
        .finish()
        .context("parse csv")?;
    normalize_season(df)
}

/// Seasons join across sources, so they are always Int64.
fn normalize_season(df: DataFrame) -> Result<DataFrame> {
    match df.column("Season") {
        Ok(season) if season.dtype() != &DataType::Int64 => Ok(df
            .lazy()
            .with_column(col("Season").cast(DataType::Int64))
            .collect()?),
        _ => Ok(df),
    }
}

pub fn write_csv(df: &DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    let mut file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut df.clone())
        .with_context(|| format!("write csv {}", path.display()))
}

pub fn to_csv_string(df: &DataFrame) -> Result<String> {
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf)
        .include_header(true)
        .finish(&mut df.clone())
        .context("write csv")?;
    String::from_utf8(buf).context("csv output is not utf-8")
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_index(name).is_some()
}

pub fn column_names(df: &DataFrame) -> Vec<String> {
    df.get_column_names().iter().map(|c| c.to_string()).collect()
}

/// Currency and percent decorations are stripped before parsing.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | '%') && !c.is_whitespace())
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Column as floats. Text cells go through `parse_number`; anything that
/// will not parse is `None`.
pub fn numbers(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df.column(name)?;
    if column.dtype() == &DataType::String {
        return Ok(column
            .str()?
            .into_iter()
            .map(|v| v.and_then(parse_number))
            .collect());
    }
    let cast = column
        .cast(&DataType::Float64)
        .with_context(|| format!("column `{name}` is not numeric"))?;
    Ok(cast
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect())
}

/// Column as whole numbers; fractional values are `None`.
pub fn ints(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    Ok(numbers(df, name)?
        .into_iter()
        .map(|v| v.filter(|x| x.fract() == 0.0).map(|x| x as i64))
        .collect())
}

/// Column rendered as text, nulls kept.
pub fn labels(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df.column(name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// True when every non-null cell reads as a number and at least one does.
pub fn is_numeric_column(df: &DataFrame, name: &str) -> bool {
    let Ok(column) = df.column(name) else {
        return false;
    };
    if column.null_count() == column.len() {
        return false;
    }
    match column.dtype() {
        DataType::String => column.str().is_ok_and(|ca| {
            ca.into_iter()
                .flatten()
                .all(|v| parse_number(v).is_some())
        }),
        _ => column.cast(&DataType::Float64).is_ok(),
    }
}

pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let idx = IdxCa::from_vec("idx".into(), rows.iter().map(|&i| i as IdxSize).collect());
    Ok(df.take(&idx)?)
}

/// Keyed join with coalesced keys. Null keys never match, and a right-side
/// column whose name is already taken gets polars' `_right` suffix. Rows keep
/// the left table's order; right-only rows of a full join come last.
pub fn join(left: &DataFrame, right: &DataFrame, on: &[&str], how: JoinType) -> Result<DataFrame> {
    for key in on {
        if !has_column(left, key) {
            bail!("left table has no join key column `{key}`");
        }
        if !has_column(right, key) {
            bail!("right table has no join key column `{key}`");
        }
    }
    let keys: Vec<Expr> = on.iter().map(|k| col(*k)).collect();
    let args = JoinArgs::new(how).with_coalesce(JoinCoalesce::CoalesceColumns);
    let order = SortMultipleOptions::default()
        .with_nulls_last(true)
        .with_maintain_order(true);
    Ok(left
        .clone()
        .lazy()
        .with_row_index(ROW_ORDER, None)
        .join(right.clone().lazy(), keys.clone(), keys, args)
        .sort([ROW_ORDER], order)
        .select([all().exclude([ROW_ORDER])])
        .collect()?)
}

/// First row for every distinct key, in order of first appearance. Rows with
/// a null key are dropped.
pub fn first_per_key(df: &DataFrame, keys: &[&str]) -> Result<DataFrame> {
    let mut present = lit(true);
    for key in keys {
        present = present.and(col(*key).is_not_null());
    }
    let by: Vec<Expr> = keys.iter().map(|k| col(*k)).collect();
    Ok(df
        .clone()
        .lazy()
        .filter(present)
        .group_by_stable(by)
        .agg([col("*").first()])
        .collect()?)
}

/// Index of the row for one team-season.
pub fn find_row(df: &DataFrame, team: &str, season: i64) -> Result<Option<usize>> {
    let teams = labels(df, "Team")?;
    let seasons = ints(df, "Season")?;
    Ok(teams
        .iter()
        .zip(&seasons)
        .position(|(t, s)| t.as_deref() == Some(team) && *s == Some(season)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seasons_load_as_integers() {
        let df = parse_csv("Team,Season,W\nBoston Celtics,2024.0,64\nUtah Jazz,2024,\n").unwrap();
        assert_eq!(df.column("Season").unwrap().dtype(), &DataType::Int64);
        assert_eq!(ints(&df, "W").unwrap(), vec![Some(64), None]);
    }

    #[test]
    fn lenient_numbers_strip_currency() {
        assert_eq!(parse_number("$1,250,000"), Some(1_250_000.0));
        assert_eq!(parse_number("48.5%"), Some(48.5));
        assert_eq!(parse_number("abc"), None);

        let df = parse_csv("Payroll,Conf\n\"$140,000\",East\n,West\n").unwrap();
        assert_eq!(numbers(&df, "Payroll").unwrap(), vec![Some(140_000.0), None]);
        assert!(is_numeric_column(&df, "Payroll"));
        assert!(!is_numeric_column(&df, "Conf"));
        assert!(!is_numeric_column(&df, "Nope"));
    }

    #[test]
    fn csv_round_trips_through_writer() {
        let raw = "Team,Season,W\nBoston Celtics,2024,64\nUtah Jazz,2024,\n";
        let df = parse_csv(raw).unwrap();
        assert_eq!(to_csv_string(&df).unwrap(), raw);
    }

    #[test]
    fn full_join_keeps_both_sides() {
        let left = df!("Team" => ["A", "B"], "Season" => [2024i64, 2024], "PTS" => [110i64, 101]).unwrap();
        let right = df!("Team" => ["B", "C"], "Season" => [2024i64, 2024], "Home_W" => [20i64, 30]).unwrap();
        let joined = join(&left, &right, &["Team", "Season"], JoinType::Full).unwrap();
        assert_eq!(joined.height(), 3);
        let row_c = find_row(&joined, "C", 2024).unwrap().unwrap();
        assert_eq!(numbers(&joined, "PTS").unwrap()[row_c], None);
        let row_b = find_row(&joined, "B", 2024).unwrap().unwrap();
        assert_eq!(numbers(&joined, "Home_W").unwrap()[row_b], Some(20.0));
    }

    #[test]
    fn null_keys_never_match() {
        let left = df!("Team" => [Some("A"), None], "Season" => [2024i64, 2024]).unwrap();
        let right = df!("Team" => [Some("A"), None], "Season" => [2024i64, 2024], "X" => [1i64, 2]).unwrap();
        let joined = join(&left, &right, &["Team", "Season"], JoinType::Inner).unwrap();
        assert_eq!(joined.height(), 1);
        assert_eq!(ints(&joined, "X").unwrap(), vec![Some(1)]);
    }

    #[test]
    fn left_join_keeps_left_row_order() {
        let left = df!("k" => [3i64, 1, 2]).unwrap();
        let right = df!("k" => [1i64, 2, 3], "v" => ["one", "two", "three"]).unwrap();
        let joined = join(&left, &right, &["k"], JoinType::Left).unwrap();
        assert_eq!(column_names(&joined), vec!["k", "v"]);
        assert_eq!(ints(&joined, "k").unwrap(), vec![Some(3), Some(1), Some(2)]);
    }

    #[test]
    fn missing_join_key_is_an_error() {
        let left = df!("k" => [1i64]).unwrap();
        let right = df!("j" => [1i64]).unwrap();
        assert!(join(&left, &right, &["k"], JoinType::Inner).is_err());
    }

    #[test]
    fn first_per_key_keeps_earliest_row() {
        let df = parse_csv("Team,Season,Coach\nA,2024,x\nA,2024,y\nB,2024,z\n,2024,w\n").unwrap();
        let out = first_per_key(&df, &["Team", "Season"]).unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(labels(&out, "Coach").unwrap()[0].as_deref(), Some("x"));
    }

    #[test]
    fn take_rows_follows_given_order() {
        let df = df!("x" => [10i64, 20, 30]).unwrap();
        let out = take_rows(&df, &[2, 0]).unwrap();
        assert_eq!(ints(&out, "x").unwrap(), vec![Some(30), Some(10)]);
    }
}
