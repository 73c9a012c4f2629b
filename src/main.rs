use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use polars::prelude::DataFrame;
use tracing::warn;

use nba_wins::config::{self, DataPaths};
use nba_wins::loaders;
use nba_wins::results::{self, TeamOutlook};

const USAGE: &str = "usage: nba_wins [--results PATH] [teams | team <name> | accuracy <season> [--threshold N]]";

fn main() -> Result<()> {
    config::load_dotenv();
    config::init_logging();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let results_path = flag_value(&args, "--results")
        .map(PathBuf::from)
        .unwrap_or_else(|| DataPaths::from_env().results);
    let threshold = match flag_value(&args, "--threshold") {
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("--threshold expects a number, got `{raw}`"))?,
        None => results::threshold_from_env(),
    };
    let positional = positional_args(&args);

    let table = loaders::load_final_results(Some(&results_path))
        .with_context(|| format!("load results {}", results_path.display()))?;

    match positional.first().map(String::as_str) {
        None => print_overview(&table),
        Some("teams") => {
            for team in results::teams(&table) {
                println!("{team}");
            }
        }
        Some("team") => {
            let name = positional[1..].join(" ");
            if name.is_empty() {
                return Err(anyhow!("{USAGE}"));
            }
            match results::team_outlook(&table, &name) {
                Some(outlook) => print_outlook(&outlook),
                None => warn!(team = %name, "no data for team in the latest season"),
            }
        }
        Some("accuracy") => {
            let season = positional
                .get(1)
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| anyhow!("{USAGE}"))?;
            print_accuracy(&table, season, threshold);
        }
        Some(other) => return Err(anyhow!("unknown command `{other}`\n{USAGE}")),
    }
    Ok(())
}

fn print_overview(table: &DataFrame) {
    let Some(season) = results::latest_season(table) else {
        warn!("results table has no seasons");
        return;
    };
    let mut outlooks: Vec<TeamOutlook> = results::teams(table)
        .iter()
        .filter_map(|team| results::team_outlook(table, team))
        .collect();
    outlooks.sort_by(|a, b| {
        b.predicted_wins
            .unwrap_or(f64::MIN)
            .total_cmp(&a.predicted_wins.unwrap_or(f64::MIN))
    });

    println!("Predicted wins, {season}");
    println!("{:<26} {:>6} {:>6} {:>6}", "Team", "W", "Pred", "Delta");
    for o in &outlooks {
        println!(
            "{:<26} {:>6} {:>6} {:>6}",
            o.team,
            fmt_opt(o.actual_wins.map(|w| w as i64)),
            fmt_opt(o.predicted_display()),
            fmt_opt(o.delta()),
        );
    }
}

fn print_outlook(outlook: &TeamOutlook) {
    println!("{} predicted wins ({})", outlook.team, outlook.season);
    println!("  predicted: {}", fmt_opt(outlook.predicted_display()));
    println!("  actual:    {}", fmt_opt(outlook.actual_wins.map(|w| w as i64)));
    println!("  delta:     {}", fmt_opt(outlook.delta()));
    if !outlook.features.is_empty() {
        println!();
        println!("Key features");
        for (name, value) in &outlook.features {
            println!("  {name:<28} {value}");
        }
    }
}

fn print_accuracy(table: &DataFrame, season: i64, threshold: f64) {
    let Some(report) = results::season_accuracy(table, season, threshold) else {
        warn!(season, "no Pred_Wins available for season");
        return;
    };
    println!(
        "{} season accuracy (±{} wins): {:.2}%",
        report.season,
        report.threshold,
        report.accuracy() * 100.0
    );
    println!("{:<26} {:>6} {:>9} {:>8}", "Team", "W", "Pred_Wins", "Within");
    for row in &report.rows {
        println!(
            "{:<26} {:>6} {:>9} {:>8}",
            row.team,
            fmt_opt(row.actual_wins.map(|w| w as i64)),
            row.predicted_wins
                .map(|p| format!("{p:.1}"))
                .unwrap_or_else(|| "-".to_string()),
            row.within_threshold
        );
    }
}

fn fmt_opt(v: Option<i64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&prefix)
            && !v.trim().is_empty()
        {
            return Some(v.to_string());
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.clone());
        }
    }
    None
}

fn positional_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if arg == "--results" || arg == "--threshold" {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        out.push(arg.clone());
    }
    out
}
