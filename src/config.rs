use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_DATA_ROOT: &str = "data";

/// Conventional on-disk layout of the raw inputs and the results file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
    pub team_records: PathBuf,
    pub team_stats: PathBuf,
    pub coach: PathBuf,
    pub draft: PathBuf,
    pub payroll: PathBuf,
    pub sos: PathBuf,
    pub player_stats_dir: PathBuf,
    pub master: PathBuf,
    pub results: PathBuf,
}

impl DataPaths {
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let raw = root.join("raw");
        let team_stats_dir = raw.join("team-stats");
        let master_dir = raw.join("master-stats");
        Self {
            team_records: team_stats_dir.join("team-records.csv"),
            team_stats: team_stats_dir.join("team-stats.csv"),
            coach: team_stats_dir.join("coach.csv"),
            draft: team_stats_dir.join("draft.csv"),
            payroll: team_stats_dir.join("team-payroll.csv"),
            sos: team_stats_dir.join("team-sos.csv"),
            player_stats_dir: raw.join("player-stats"),
            master: master_dir.join("master.csv"),
            results: master_dir.join("results_2025.csv"),
            root,
        }
    }

    /// `NBA_DATA_ROOT` overrides the `data` directory.
    pub fn from_env() -> Self {
        let root = env::var("NBA_DATA_ROOT")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_ROOT.to_string());
        Self::from_root(root)
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::from_root(DEFAULT_DATA_ROOT)
    }
}

pub(crate) fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

pub(crate) fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| {
            let t = v.trim().to_ascii_lowercase();
            !(t.is_empty() || t == "0" || t == "false" || t == "off" || t == "no")
        })
        .unwrap_or(default)
}

/// Install the tracing subscriber used by the binaries. `RUST_LOG` wins over
/// the `info` default.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Load `.env.local` then `.env`; both are optional.
pub fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_root() {
        let paths = DataPaths::from_root("/tmp/nba");
        assert_eq!(
            paths.team_records,
            PathBuf::from("/tmp/nba/raw/team-stats/team-records.csv")
        );
        assert_eq!(
            paths.player_stats_dir,
            PathBuf::from("/tmp/nba/raw/player-stats")
        );
        assert_eq!(
            paths.results,
            PathBuf::from("/tmp/nba/raw/master-stats/results_2025.csv")
        );
    }

    #[test]
    fn unset_env_uses_defaults() {
        assert_eq!(env_usize("NBA_TEST_SURELY_UNSET_USIZE", 7), 7);
        assert!(env_bool("NBA_TEST_SURELY_UNSET_BOOL", true));
        assert_eq!(env_f64("NBA_TEST_SURELY_UNSET_F64", 2.5), 2.5);
    }
}
