#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use wayfarer_kernel_contracts::advisor::{PerfSnapshot, PerfStat};
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::metric::MetricRecord;
use wayfarer_kernel_contracts::policy::PolicyDocument;

pub const PERF_WINDOW_MS: u64 = 60 * 60 * 1_000;

pub fn perf_snapshot<'a, I>(metrics: I) -> PerfSnapshot
where
    I: IntoIterator<Item = &'a MetricRecord>,
{
    let mut sums: BTreeMap<String, (u64, f64)> = BTreeMap::new();
    for metric in metrics {
        let entry = sums.entry(metric.kind.clone()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += metric.value;
    }
    PerfSnapshot(
        sums.into_iter()
            .map(|(kind, (count, sum))| {
                (
                    kind,
                    PerfStat {
                        count,
                        mean: sum / count as f64,
                    },
                )
            })
            .collect(),
    )
}

/// One-paragraph plain-text digest handed to the advisor next to the raw snapshot.
pub fn recent_summary(
    agent_id: &AgentId,
    snapshot: &PerfSnapshot,
    policy: &PolicyDocument,
    window_ms: u64,
) -> String {
    let window_min = window_ms / 60_000;
    let mut out = format!(
        "agent {} policy v{} prefers arm '{}'.",
        agent_id, policy.version, policy.movement.preferred_arm
    );
    if snapshot.is_empty() {
        out.push_str(&format!(" No metrics recorded in the last {window_min} min."));
        return out;
    }
    out.push_str(&format!(" Last {window_min} min:"));
    for (kind, stat) in &snapshot.0 {
        out.push_str(&format!(" {kind} n={} mean={:.3};", stat.count, stat.mean));
    }
    out
}
