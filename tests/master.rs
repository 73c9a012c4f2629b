use std::path::PathBuf;

use nba_wins::config::DataPaths;
use nba_wins::frame;
use nba_wins::merge::{SourceTables, build_master_table};
use polars::prelude::DataFrame;

fn fixture_paths() -> DataPaths {
    let mut root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    root.push("tests");
    root.push("fixtures");
    root.push("data");
    DataPaths::from_root(root)
}

fn value(table: &DataFrame, team: &str, season: i64, column: &str) -> Option<f64> {
    let row = frame::find_row(table, team, season)
        .expect("key columns")
        .unwrap_or_else(|| panic!("no row for {team} {season}"));
    frame::numbers(table, column).unwrap_or_else(|_| panic!("no column {column}"))[row]
}

#[test]
fn master_table_has_one_row_per_team_season() {
    let sources = SourceTables::load(&fixture_paths()).expect("sources load");
    assert!(sources.payroll.is_some());
    assert!(sources.sos.is_some());
    assert!(sources.players.is_some());

    let master = build_master_table(&sources).expect("master builds");
    assert_eq!(master.height(), 7);
    for column in [
        "W",
        "Home_W",
        "Coach_Count",
        "FirstRoundPicks",
        "SecondRoundPicks",
        "Payroll",
        "SOS",
        "Roster_Count",
    ] {
        assert!(frame::has_column(&master, column), "missing {column}");
    }
    assert!(!frame::has_column(&master, "Coach"));
}

#[test]
fn master_values_line_up_by_team_and_season() {
    let sources = SourceTables::load(&fixture_paths()).expect("sources load");
    let master = build_master_table(&sources).expect("master builds");

    assert_eq!(value(&master, "Los Angeles Lakers", 2024, "Home_W"), Some(25.0));
    assert_eq!(value(&master, "Los Angeles Lakers", 2024, "Coach_Count"), Some(2.0));
    assert_eq!(value(&master, "Los Angeles Lakers", 2023, "Roster_Count"), Some(3.0));
    assert_eq!(value(&master, "Boston Celtics", 2023, "FirstRoundPicks"), Some(1.0));
    assert_eq!(value(&master, "Boston Celtics", 2024, "SOS"), Some(-0.38));
    assert_eq!(value(&master, "Utah Jazz", 2023, "Payroll"), Some(148_920_000.0));
    // Stats-only season survives the full join with empty record columns.
    assert_eq!(value(&master, "Boston Celtics", 2025, "W"), Some(61.0));
    assert_eq!(value(&master, "Boston Celtics", 2025, "Home_W"), None);
    assert_eq!(value(&master, "Boston Celtics", 2025, "Coach_Count"), None);
}

#[test]
fn master_rows_are_ordered_by_season_then_team() {
    let sources = SourceTables::load(&fixture_paths()).expect("sources load");
    let master = build_master_table(&sources).expect("master builds");
    let seasons = frame::ints(&master, "Season").unwrap();
    let teams = frame::labels(&master, "Team").unwrap();
    let keys: Vec<(Option<i64>, Option<String>)> = seasons.into_iter().zip(teams).collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

#[test]
fn optional_sources_are_skipped_when_absent() {
    let mut paths = fixture_paths();
    paths.payroll = paths.root.join("raw/team-stats/missing-payroll.csv");
    paths.sos = paths.root.join("raw/team-stats/missing-sos.csv");
    paths.player_stats_dir = paths.root.join("raw/no-players");

    let sources = SourceTables::load(&paths).expect("required sources still load");
    assert!(sources.payroll.is_none());
    assert!(sources.sos.is_none());
    assert!(sources.players.is_none());

    let master = build_master_table(&sources).expect("master builds");
    assert_eq!(master.height(), 7);
    assert!(!frame::has_column(&master, "Payroll"));
    assert!(!frame::has_column(&master, "SOS"));
    assert!(!frame::has_column(&master, "Roster_Count"));
    assert!(frame::has_column(&master, "Coach_Count"));
}

#[test]
fn required_source_missing_is_an_error() {
    let mut paths = fixture_paths();
    paths.coach = paths.root.join("raw/team-stats/missing-coach.csv");
    assert!(SourceTables::load(&paths).is_err());
}

#[test]
fn master_round_trips_through_csv() {
    let sources = SourceTables::load(&fixture_paths()).expect("sources load");
    let master = build_master_table(&sources).expect("master builds");
    let raw = frame::to_csv_string(&master).expect("write csv");
    let back = frame::parse_csv(&raw).expect("read csv");
    assert_eq!(frame::column_names(&back), frame::column_names(&master));
    assert_eq!(back.height(), master.height());
}
