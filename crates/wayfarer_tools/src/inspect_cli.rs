#![forbid(unsafe_code)]

use wayfarer_engines::bandit::{ArmScoreInput, BanditRuntime, Ucb1Config};
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::Validate;
use wayfarer_storage::store::WayfarerStore;

pub const INSPECT_USAGE: &str =
    "usage: wayfarer inspect <policy|history|stats|metrics> <agent_id> [limit]";
pub const INSPECT_DEFAULT_METRIC_LIMIT: usize = 20;

/// Read-only views over a replayed store. Output is plain text, one row per line.
pub fn execute_inspect_command(
    store: &WayfarerStore,
    ucb1: Ucb1Config,
    subcommand: &str,
    agent_id: Option<&str>,
    limit: Option<&str>,
) -> Result<String, String> {
    match subcommand {
        "policy" => {
            let agent = require_agent_id(agent_id)?;
            let Some(current) = store.current_policy(&agent) else {
                return Ok(format!("no policy stored for {agent}"));
            };
            let document = serde_json::to_string_pretty(&current.document)
                .map_err(|e| format!("failed to render policy: {e}"))?;
            Ok(format!(
                "version {} sha256 {}\n{document}",
                current.version, current.content_sha256
            ))
        }
        "history" => {
            let agent = require_agent_id(agent_id)?;
            let current_id = store.current_policy(&agent).map(|row| row.policy_id);
            let lines = store
                .policy_rows_for_agent(&agent)
                .into_iter()
                .map(|row| {
                    let marker = if Some(row.policy_id) == current_id { "*" } else { " " };
                    format!(
                        "{marker} v{} id={} at={} arm={} sha256={}",
                        row.version,
                        row.policy_id.0,
                        row.created_at.0,
                        row.document.movement.preferred_arm,
                        row.content_sha256
                    )
                })
                .collect::<Vec<_>>();
            Ok(lines.join("\n"))
        }
        "stats" => {
            let agent = require_agent_id(agent_id)?;
            ucb1.validate()
                .map_err(|e| format!("invalid ucb1 config: {e}"))?;
            let runtime = BanditRuntime::new(ucb1);
            let rows = store
                .arms()
                .into_iter()
                .map(|arm| {
                    let (pulls, mean) = store
                        .arm_stat(&agent, arm.arm_id)
                        .map(|stat| (stat.n, stat.reward_mean))
                        .unwrap_or((0, 0.0));
                    (arm.arm_id, arm.name.as_str(), pulls, mean)
                })
                .collect::<Vec<_>>();
            let total = rows.iter().map(|(_, _, pulls, _)| pulls).sum::<u64>();
            let mut lines = vec!["arm_id name pulls mean ucb".to_string()];
            for (arm_id, name, pulls, mean) in rows {
                let score = runtime.score(
                    &ArmScoreInput {
                        arm_id,
                        pulls,
                        reward_mean: mean,
                    },
                    total,
                );
                let ucb = if score.is_finite() {
                    format!("{score:.4}")
                } else {
                    "inf".to_string()
                };
                lines.push(format!("{} {name} {pulls} {mean:.4} {ucb}", arm_id.0));
            }
            Ok(lines.join("\n"))
        }
        "metrics" => {
            let agent = require_agent_id(agent_id)?;
            let limit = parse_limit(limit)?;
            let rows = store.metrics_for_agent(&agent);
            let skip = rows.len().saturating_sub(limit);
            let mut lines = Vec::new();
            for row in rows.into_iter().skip(skip) {
                lines.push(
                    serde_json::to_string(row)
                        .map_err(|e| format!("failed to render metric: {e}"))?,
                );
            }
            Ok(lines.join("\n"))
        }
        _ => Err(format!(
            "unknown inspect subcommand: {subcommand}. expected one of: policy, history, stats, metrics"
        )),
    }
}

fn require_agent_id(raw: Option<&str>) -> Result<AgentId, String> {
    let raw = raw.ok_or_else(|| format!("missing agent id. {INSPECT_USAGE}"))?;
    AgentId::new(raw).map_err(|e| format!("invalid agent id '{raw}': {e}"))
}

fn parse_limit(raw: Option<&str>) -> Result<usize, String> {
    let Some(raw) = raw else {
        return Ok(INSPECT_DEFAULT_METRIC_LIMIT);
    };
    match raw.trim().parse::<usize>() {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(format!("limit must be a positive integer, got '{raw}'")),
    }
}
