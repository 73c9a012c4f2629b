use nba_wins::frame;
use nba_wins::grid_search::CvConfig;
use nba_wins::results;
use nba_wins::teams::NBA_TEAMS;
use nba_wins::win_model::{WinModelConfig, train_win_model};
use polars::df;
use polars::prelude::DataFrame;

/// Thirty teams over four seasons. Wins track net rating closely, and next
/// season's wins depend on the current net rating.
fn synthetic_master() -> DataFrame {
    let mut seasons = Vec::new();
    let mut teams = Vec::new();
    let mut wins = Vec::new();
    let mut net_rtg = Vec::new();
    let mut payroll = Vec::new();
    let mut conf = Vec::new();
    let mut coach = Vec::new();
    for season in 2021..=2024_i64 {
        for (i, team) in NBA_TEAMS.iter().enumerate() {
            let strength = (i as f64 - 14.5) / 2.0 + (season - 2021) as f64 * 0.1;
            seasons.push(season);
            teams.push(team.to_string());
            wins.push((41.0 + 3.0 * strength).round() as i64);
            net_rtg.push(strength);
            payroll.push((i % 7 != 0).then(|| format!("${},000,000", 120 + i)));
            conf.push(if i < 15 { "East" } else { "West" });
            coach.push(format!("Coach {i}"));
        }
    }
    df!(
        "Season" => seasons,
        "Team" => teams,
        "W" => wins,
        "NetRtg" => net_rtg,
        "Payroll" => payroll,
        "Conf" => conf,
        "Coach" => coach
    )
    .expect("columns have equal length")
}

fn fast_config() -> WinModelConfig {
    let cv = CvConfig {
        folds: 3,
        shuffle: true,
        seed: 42,
    };
    WinModelConfig {
        stage1_cv: cv,
        stage2_cv: cv,
        ..WinModelConfig::default()
    }
}

#[test]
fn pipeline_predicts_every_team_season() {
    let master = synthetic_master();
    let run = train_win_model(&master, &fast_config()).expect("model trains");

    assert_eq!(run.results.height(), master.height());
    assert_eq!(
        &frame::column_names(&run.results)[..5],
        &["Season", "Team", "W", "Pred_NWins", "Pred_Wins"]
    );
    assert_eq!(run.report.training_rows, 90);
    assert_eq!(run.report.stage1.candidates, 12);
    assert_eq!(run.report.stage2.candidates, 48);
    assert!(run.report.stage2.scored_candidates > 0);
    assert_eq!(run.report.recency_col.as_deref(), Some("Season"));
    assert!(!run.report.categorical_features.contains(&"Coach".to_string()));
    assert!(!run.report.numeric_features.contains(&"Season".to_string()));

    let preds: Vec<f64> = frame::numbers(&run.results, "Pred_NWins")
        .expect("prediction column")
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(preds.len(), master.height());
    assert!(preds.iter().all(|p| (0.0..=82.0).contains(p)));
}

#[test]
fn feature_weights_are_normalised() {
    let run = train_win_model(&synthetic_master(), &fast_config()).expect("model trains");
    let weights: Vec<f64> = run.feature_weights.iter().map(|(_, w)| w).collect();
    assert!(!weights.is_empty());
    assert!(weights.iter().all(|w| (0.0..=1.0).contains(w)));
    assert!((weights.iter().cloned().fold(0.0, f64::max) - 1.0).abs() < 1e-12);
    assert!(run.report.top_features.len() <= 10);
    assert!(!run.report.top_features.contains(&"W".to_string()));
}

#[test]
fn lagged_predictions_feed_accuracy() {
    let run = train_win_model(&synthetic_master(), &fast_config()).expect("model trains");

    // First season has no prior prediction.
    let first = results::season_accuracy(&run.results, 2021, 10.0).expect("season rows");
    assert!(first.rows.iter().all(|r| r.predicted_wins.is_none()));
    assert_eq!(first.hits(), 0);

    let later = results::season_accuracy(&run.results, 2024, 10.0).expect("season rows");
    assert_eq!(later.rows.len(), 30);
    assert!(later.rows.iter().all(|r| r.predicted_wins.is_some()));
    assert!(later.accuracy() > 0.5);
}

#[test]
fn recency_can_be_disabled() {
    let config = WinModelConfig {
        recency_col: None,
        use_feature_weights: false,
        ..fast_config()
    };
    let run = train_win_model(&synthetic_master(), &config).expect("model trains");
    assert_eq!(run.report.recency_col, None);
    assert!(!run.report.used_feature_weights);
}

#[test]
fn fit_report_serialises_to_json() {
    let run = train_win_model(&synthetic_master(), &fast_config()).expect("model trains");
    let dir = std::env::temp_dir().join(format!("nba_wins_report_{}", std::process::id()));
    let path = dir.join("report.json");
    run.report.write_json(&path).expect("report written");
    let raw = std::fs::read_to_string(&path).expect("report readable");
    let json: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    assert!(json["generated_at"].is_string());
    assert!(json["stage2"]["best_params"]["n_neighbors"].is_u64());
    assert!(json["stage1"]["cv_mae"].is_number());
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn too_little_history_is_an_error() {
    let master = df!(
        "Season" => [2024i64],
        "Team" => ["Utah Jazz"],
        "W" => [31i64],
        "NetRtg" => [-8.0]
    )
    .expect("single row");
    assert!(train_win_model(&master, &fast_config()).is_err());
}
