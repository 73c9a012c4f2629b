use std::path::PathBuf;

use anyhow::{Context, Result};

use nba_wins::config::{self, DataPaths};
use nba_wins::frame;
use nba_wins::win_model::{WinModelConfig, train_win_model};

fn main() -> Result<()> {
    config::load_dotenv();
    config::init_logging();

    let paths = DataPaths::from_env();
    let master_path = first_positional_arg()
        .map(PathBuf::from)
        .unwrap_or_else(|| paths.master.clone());
    let results_path = parse_path_arg("--results").unwrap_or_else(|| paths.results.clone());
    let report_path =
        parse_path_arg("--report").unwrap_or_else(|| results_path.with_extension("report.json"));

    let master = frame::read_csv(&master_path)
        .with_context(|| format!("read master table {}", master_path.display()))?;
    let model_config = WinModelConfig::from_env();
    let run = train_win_model(&master, &model_config)?;

    frame::write_csv(&run.results, &results_path)?;
    run.report.write_json(&report_path)?;

    let report = &run.report;
    println!("Results written: {}", results_path.display());
    println!("Report written: {}", report_path.display());
    println!(
        "Training rows: {} / predictions: {}",
        report.training_rows, report.prediction_rows
    );
    println!(
        "Stage 1 ElasticNet alpha={} l1_ratio={} cv_mae={:.2} ({}/{} candidates)",
        report.stage1.best_params.alpha,
        report.stage1.best_params.l1_ratio,
        report.stage1.cv_mae,
        report.stage1.scored_candidates,
        report.stage1.candidates
    );
    let knn = &report.stage2.best_params;
    println!(
        "Stage 2 k-NN k={} weights={} metric={} p={} cv_mae={:.2} ({}/{} candidates)",
        knn.n_neighbors,
        knn.weights,
        knn.metric,
        knn.p,
        report.stage2.cv_mae,
        report.stage2.scored_candidates,
        report.stage2.candidates
    );
    if !report.top_features.is_empty() {
        println!("Top features:");
        for (name, weight) in report.feature_weights.iter().take(model_config.top_features) {
            println!("  {name:<28} {weight:.3}");
        }
    }
    Ok(())
}

/// Master table path, given as the first bare argument.
fn first_positional_arg() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--results" || arg == "--report" {
            args.next();
            continue;
        }
        if !arg.starts_with("--") {
            return Some(arg);
        }
    }
    None
}

fn parse_path_arg(flag: &str) -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{flag}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(v) = arg.strip_prefix(&prefix)
            && !v.trim().is_empty()
        {
            return Some(PathBuf::from(v));
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(PathBuf::from(next));
        }
    }
    None
}
