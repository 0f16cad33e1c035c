#![forbid(unsafe_code)]

use std::env;
use std::path::PathBuf;

use wayfarer_engines::bandit::{Ucb1Config, UCB1_EXPLORATION_C_ENV};
use wayfarer_storage::journal::default_store_journal_path;
use wayfarer_storage::store::WayfarerStore;
use wayfarer_tools::inspect_cli::{execute_inspect_command, INSPECT_USAGE};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args[0] != "inspect" {
        return Err(INSPECT_USAGE.to_string());
    }
    let subcommand = args
        .get(1)
        .ok_or_else(|| INSPECT_USAGE.to_string())?
        .as_str();
    let agent_id = args.get(2).map(String::as_str);
    let limit = args.get(3).map(String::as_str);

    let ucb1 = match env::var(UCB1_EXPLORATION_C_ENV) {
        Ok(raw) if !raw.trim().is_empty() => Ucb1Config::with_exploration_c_str(&raw)?,
        _ => Ucb1Config::mvp_v1(),
    };
    let path = env::var("WAYFARER_STORE_PATH")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(default_store_journal_path);
    let store = WayfarerStore::replay_from_journal(path.clone())
        .map_err(|e| format!("failed to read store '{}': {e}", path.display()))?;

    let output = execute_inspect_command(&store, ucb1, subcommand, agent_id, limit)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
