use std::path::PathBuf;

use anyhow::{Context, Result};

use nba_wins::config::{self, DataPaths};
use nba_wins::frame;
use nba_wins::merge::{SourceTables, build_master_table};

fn main() -> Result<()> {
    config::load_dotenv();
    config::init_logging();

    let paths = DataPaths::from_env();
    let out_path = parse_path_arg("--out").unwrap_or_else(|| paths.master.clone());

    let sources = SourceTables::load(&paths).context("load raw sources")?;
    let master = build_master_table(&sources)?;
    frame::write_csv(&master, &out_path)?;

    println!("Master table written: {}", out_path.display());
    println!("Rows: {}", master.height());
    println!("Columns: {}", master.width());
    let seasons: Vec<i64> = frame::ints(&master, "Season")?.into_iter().flatten().collect();
    if let (Some(first), Some(last)) = (seasons.iter().min(), seasons.iter().max()) {
        println!("Seasons: {first}-{last}");
    }
    println!(
        "Optional sources: payroll={} sos={} players={}",
        sources.payroll.is_some(),
        sources.sos.is_some(),
        sources.players.is_some()
    );
    Ok(())
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
