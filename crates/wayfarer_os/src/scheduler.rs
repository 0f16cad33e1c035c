#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::reflection::{ReflectFailure, ReflectOutcome};
use wayfarer_kernel_contracts::{ContractViolation, Validate};

use crate::reflection::{PolicyAdvisor, ReflectionScheduler};

pub const SCHEDULER_DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const SCHEDULER_MIN_INTERVAL: Duration = Duration::from_secs(60);
pub const SCHEDULER_MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const SCHEDULER_MAX_PARALLEL: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSchedulerConfig {
    pub roster: Vec<AgentId>,
    pub interval: Duration,
    pub max_parallel_reflections: usize,
}

impl AgentSchedulerConfig {
    pub fn mvp_v1(roster: Vec<AgentId>) -> Self {
        Self {
            roster,
            interval: SCHEDULER_DEFAULT_INTERVAL,
            max_parallel_reflections: 1,
        }
    }
}

impl Validate for AgentSchedulerConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        let unique = self.roster.iter().collect::<BTreeSet<_>>();
        if unique.len() != self.roster.len() {
            return Err(ContractViolation::InvalidValue {
                field: "agent_scheduler_config.roster",
                reason: "must not repeat an agent id",
            });
        }
        if self.interval.is_zero() {
            return Err(ContractViolation::InvalidValue {
                field: "agent_scheduler_config.interval",
                reason: "must be > 0",
            });
        }
        if !(1..=SCHEDULER_MAX_PARALLEL).contains(&self.max_parallel_reflections) {
            return Err(ContractViolation::InvalidRange {
                field: "agent_scheduler_config.max_parallel_reflections",
                min: 1.0,
                max: SCHEDULER_MAX_PARALLEL as f64,
                got: self.max_parallel_reflections as f64,
            });
        }
        Ok(())
    }
}

/// Per-agent results of one pass over the roster, in completion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub patched: Vec<AgentId>,
    pub rejected: Vec<(AgentId, ReflectFailure)>,
    pub failed: Vec<(AgentId, String)>,
}

impl TickReport {
    pub fn processed(&self) -> usize {
        self.patched.len() + self.rejected.len() + self.failed.len()
    }
}

enum AgentResult {
    Outcome(ReflectOutcome),
    Failed(String),
}

/// Drives reflection for a fixed roster. One tick finishes before the next begins; boundaries
/// that pass while a tick is still running are skipped.
pub struct AgentScheduler<A: PolicyAdvisor> {
    reflection: Arc<ReflectionScheduler<A>>,
    config: AgentSchedulerConfig,
}

impl<A: PolicyAdvisor> AgentScheduler<A> {
    pub fn new(
        reflection: Arc<ReflectionScheduler<A>>,
        config: AgentSchedulerConfig,
    ) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self { reflection, config })
    }

    pub fn config(&self) -> &AgentSchedulerConfig {
        &self.config
    }

    /// Reflects every roster agent once. Failures are logged per agent and never stop the pass.
    pub async fn run_tick(&self, tick: u64) -> TickReport {
        tracing::info!(tick, agents = self.config.roster.len(), "reflection tick started");
        let permits = Arc::new(Semaphore::new(self.config.max_parallel_reflections));
        let mut workers = JoinSet::new();
        for agent_id in &self.config.roster {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let reflection = self.reflection.clone();
            let agent_id = agent_id.clone();
            workers.spawn(async move {
                let _permit = permit;
                let task_agent = agent_id.clone();
                // inner task isolates a panicking reflection from the rest of the pass
                let result = tokio::spawn(async move {
                    reflection.reflect_and_patch(&task_agent).await
                })
                .await;
                let result = match result {
                    Ok(Ok(outcome)) => AgentResult::Outcome(outcome),
                    Ok(Err(err)) => AgentResult::Failed(err.to_string()),
                    Err(join_err) if join_err.is_panic() => {
                        AgentResult::Failed("reflection task panicked".to_string())
                    }
                    Err(join_err) => AgentResult::Failed(join_err.to_string()),
                };
                (agent_id, result)
            });
        }

        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };
        while let Some(joined) = workers.join_next().await {
            let Ok((agent_id, result)) = joined else {
                tracing::error!(tick, "reflection worker lost");
                continue;
            };
            match result {
                AgentResult::Outcome(ReflectOutcome::Patched { updated, .. }) => {
                    tracing::debug!(agent = %agent_id, version = updated.version, "reflection applied");
                    report.patched.push(agent_id);
                }
                AgentResult::Outcome(ReflectOutcome::Rejected(failure)) => {
                    tracing::warn!(agent = %agent_id, failure = failure.as_str(), "reflection not applied");
                    report.rejected.push((agent_id, failure));
                }
                AgentResult::Failed(error) => {
                    tracing::error!(agent = %agent_id, error = %error, "reflection failed");
                    report.failed.push((agent_id, error));
                }
            }
        }
        tracing::info!(
            tick,
            patched = report.patched.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            "reflection tick finished"
        );
        report
    }

    /// Runs a tick immediately, then on every later interval boundary measured from the start,
    /// until `shutdown` turns true or its sender is dropped. A running tick is always finished.
    pub fn spawn(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        reports: Option<tokio::sync::mpsc::UnboundedSender<TickReport>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let started = Instant::now();
            let period = self.config.interval;
            let mut boundary: u64 = 0;
            let mut tick: u64 = 0;
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tick += 1;
                let report = self.run_tick(tick).await;
                if let Some(reports) = &reports {
                    let _ = reports.send(report);
                }

                let next = next_boundary(boundary, started.elapsed(), period);
                if next > boundary + 1 {
                    tracing::warn!(tick, skipped = next - boundary - 1, "tick overran; boundaries skipped");
                }
                boundary = next;
                let deadline = started + boundary_offset(boundary, period);
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!(ticks = tick, "agent scheduler stopped");
        })
    }
}

/// Index of the first boundary after `previous` that has not yet passed at `elapsed`.
fn next_boundary(previous: u64, elapsed: Duration, period: Duration) -> u64 {
    let period_ns = period.as_nanos().max(1);
    let elapsed_ns = elapsed.as_nanos();
    let reached = elapsed_ns.div_ceil(period_ns);
    let reached = u64::try_from(reached).unwrap_or(u64::MAX);
    reached.max(previous + 1)
}

fn boundary_offset(boundary: u64, period: Duration) -> Duration {
    let ns = period.as_nanos().saturating_mul(u128::from(boundary));
    Duration::from_nanos(u64::try_from(ns).unwrap_or(u64::MAX))
}
