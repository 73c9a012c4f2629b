use std::collections::HashMap;

use once_cell::sync::Lazy;

pub const NBA_TEAMS: [&str; 30] = [
    "Atlanta Hawks",
    "Boston Celtics",
    "Brooklyn Nets",
    "Charlotte Hornets",
    "Chicago Bulls",
    "Cleveland Cavaliers",
    "Dallas Mavericks",
    "Denver Nuggets",
    "Detroit Pistons",
    "Golden State Warriors",
    "Houston Rockets",
    "Indiana Pacers",
    "Los Angeles Clippers",
    "Los Angeles Lakers",
    "Memphis Grizzlies",
    "Miami Heat",
    "Milwaukee Bucks",
    "Minnesota Timberwolves",
    "New Orleans Pelicans",
    "New York Knicks",
    "Oklahoma City Thunder",
    "Orlando Magic",
    "Philadelphia 76ers",
    "Phoenix Suns",
    "Portland Trail Blazers",
    "Sacramento Kings",
    "San Antonio Spurs",
    "Toronto Raptors",
    "Utah Jazz",
    "Washington Wizards",
];

/// Codes used by per-season player tables for rows that sum a traded player's
/// stints across several teams.
pub const MULTI_TEAM_CODES: [&str; 5] = ["TOT", "2TM", "3TM", "4TM", "5TM"];

const ACRONYMS: [(&str, &str); 32] = [
    ("ATL", "Atlanta Hawks"),
    ("BOS", "Boston Celtics"),
    ("BRK", "Brooklyn Nets"),
    ("BKN", "Brooklyn Nets"),
    ("CHI", "Chicago Bulls"),
    ("CHO", "Charlotte Hornets"),
    ("CHA", "Charlotte Hornets"),
    ("CLE", "Cleveland Cavaliers"),
    ("DAL", "Dallas Mavericks"),
    ("DEN", "Denver Nuggets"),
    ("DET", "Detroit Pistons"),
    ("GSW", "Golden State Warriors"),
    ("HOU", "Houston Rockets"),
    ("IND", "Indiana Pacers"),
    ("LAC", "Los Angeles Clippers"),
    ("LAL", "Los Angeles Lakers"),
    ("MEM", "Memphis Grizzlies"),
    ("MIA", "Miami Heat"),
    ("MIL", "Milwaukee Bucks"),
    ("MIN", "Minnesota Timberwolves"),
    ("NOP", "New Orleans Pelicans"),
    ("NYK", "New York Knicks"),
    ("OKC", "Oklahoma City Thunder"),
    ("ORL", "Orlando Magic"),
    ("PHI", "Philadelphia 76ers"),
    ("PHO", "Phoenix Suns"),
    ("POR", "Portland Trail Blazers"),
    ("SAC", "Sacramento Kings"),
    ("SAS", "San Antonio Spurs"),
    ("TOR", "Toronto Raptors"),
    ("UTA", "Utah Jazz"),
    ("WAS", "Washington Wizards"),
];

pub static TEAM_MAP: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| ACRONYMS.iter().copied().collect());

/// Canonical full name for a three-letter code, if the code is known.
pub fn canonical_team(acronym: &str) -> Option<&'static str> {
    TEAM_MAP.get(acronym.trim()).copied()
}

/// Resolve a code, passing unknown values through unchanged.
pub fn canonical_or_original(raw: &str) -> String {
    canonical_team(raw)
        .map(str::to_string)
        .unwrap_or_else(|| raw.to_string())
}

pub fn is_known_acronym(code: &str) -> bool {
    TEAM_MAP.contains_key(code)
}

pub fn is_nba_team(name: &str) -> bool {
    NBA_TEAMS.contains(&name)
}

pub fn is_multi_team_code(code: &str) -> bool {
    MULTI_TEAM_CODES.contains(&code.trim())
}

/// Team labels in standings exports carry a trailing `*` for playoff teams.
pub fn clean_team_label(raw: &str) -> String {
    raw.trim().trim_end_matches('*').trim_end().to_string()
}
