#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::arm::{AgentArmStat, ArmId, MovementArm};
use wayfarer_kernel_contracts::metric::{MetricId, MetricInput, MetricRecord};
use wayfarer_kernel_contracts::policy::{
    PolicyDocument, PolicyId, PolicyRecord, PolicyRecordInput,
};
use wayfarer_kernel_contracts::{ContractViolation, UnixTimeMs, Validate};

use crate::journal::{StoreJournal, StoreJournalOp};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("foreign key violation on {table}: {key}")]
    ForeignKeyViolation { table: &'static str, key: String },
    #[error("duplicate key on {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("append-only violation on {table}")]
    AppendOnlyViolation { table: &'static str },
    #[error("contract violation: {0}")]
    ContractViolation(#[from] ContractViolation),
    #[error("journal '{path}': {reason}")]
    Journal { path: String, reason: String },
    #[error("storage unavailable: {reason}")]
    Unavailable { reason: &'static str },
}

pub fn policy_content_sha256(document: &PolicyDocument) -> Result<String, StorageError> {
    let bytes = serde_json::to_vec(document).map_err(|_| StorageError::Unavailable {
        reason: "policy document could not be encoded",
    })?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// In-memory tables for the control loop, optionally backed by a journal.
///
/// Mutations write their journal line first; a failed write leaves every table unchanged.
#[derive(Debug, Default)]
pub struct WayfarerStore {
    arms: BTreeMap<ArmId, MovementArm>,
    arm_ids_by_name: BTreeMap<String, ArmId>,
    arm_stats: BTreeMap<(AgentId, ArmId), AgentArmStat>,
    metrics: Vec<MetricRecord>,
    metric_rows_by_agent: BTreeMap<AgentId, Vec<usize>>,
    policies: Vec<PolicyRecord>,
    current_policy: BTreeMap<AgentId, PolicyId>,
    next_metric_id: u64,
    next_policy_id: u64,
    journal: Option<StoreJournal>,
}

impl WayfarerStore {
    pub fn new_in_memory() -> Self {
        Self {
            next_metric_id: 1,
            next_policy_id: 1,
            ..Self::default()
        }
    }

    /// Replays `path` (creating it when missing) and journals every later mutation to it.
    pub fn open_with_journal(path: PathBuf) -> Result<Self, StorageError> {
        let journal = StoreJournal::new(path);
        journal.ensure_ready()?;
        let mut store = Self::new_in_memory();
        store.replay(&journal)?;
        store.journal = Some(journal);
        Ok(store)
    }

    /// Read-only snapshot of a journal; later mutations stay in memory.
    pub fn replay_from_journal(path: PathBuf) -> Result<Self, StorageError> {
        let journal = StoreJournal::new(path);
        let mut store = Self::new_in_memory();
        store.replay(&journal)?;
        Ok(store)
    }

    pub fn journal(&self) -> Option<&StoreJournal> {
        self.journal.as_ref()
    }

    fn replay(&mut self, journal: &StoreJournal) -> Result<(), StorageError> {
        let ops = journal.read_ops()?;
        let count = ops.len();
        for op in ops {
            self.apply(op);
        }
        tracing::debug!(path = %journal.path().display(), ops = count, "store journal replayed");
        Ok(())
    }

    fn commit(&mut self, op: StoreJournalOp) -> Result<(), StorageError> {
        if let Some(journal) = &self.journal {
            journal.append(&op)?;
        }
        self.apply(op);
        Ok(())
    }

    fn apply(&mut self, op: StoreJournalOp) {
        match op {
            StoreJournalOp::ArmInsert { arm } => {
                self.arm_ids_by_name.insert(arm.name.clone(), arm.arm_id);
                self.arms.insert(arm.arm_id, arm);
            }
            StoreJournalOp::ArmStatUpsert { stat } => {
                self.arm_stats
                    .insert((stat.agent_id.clone(), stat.arm_id), stat);
            }
            StoreJournalOp::MetricAppend { row } => {
                self.next_metric_id = self.next_metric_id.max(row.metric_id.0 + 1);
                self.metric_rows_by_agent
                    .entry(row.agent_id.clone())
                    .or_default()
                    .push(self.metrics.len());
                self.metrics.push(row);
            }
            StoreJournalOp::PolicyAppend { row } => {
                self.next_policy_id = self.next_policy_id.max(row.policy_id.0 + 1);
                self.policies.push(row);
            }
            StoreJournalOp::PolicyCurrentSet {
                agent_id,
                policy_id,
            } => {
                self.current_policy.insert(agent_id, policy_id);
            }
        }
    }

    // ---- arm catalog ----

    /// Returns `false` when the id is already seeded; the stored row wins.
    pub fn insert_arm_if_absent(&mut self, arm: MovementArm) -> Result<bool, StorageError> {
        arm.validate()?;
        if self.arms.contains_key(&arm.arm_id) {
            return Ok(false);
        }
        if let Some(existing) = self.arm_ids_by_name.get(&arm.name) {
            return Err(StorageError::DuplicateKey {
                table: "movement_arms.name",
                key: format!("{} (id {})", arm.name, existing.0),
            });
        }
        self.commit(StoreJournalOp::ArmInsert { arm })?;
        Ok(true)
    }

    pub fn arm(&self, arm_id: ArmId) -> Option<&MovementArm> {
        self.arms.get(&arm_id)
    }

    pub fn arm_by_name(&self, name: &str) -> Option<&MovementArm> {
        self.arm_ids_by_name
            .get(name)
            .and_then(|arm_id| self.arms.get(arm_id))
    }

    /// Ascending id order.
    pub fn arms(&self) -> Vec<&MovementArm> {
        self.arms.values().collect()
    }

    // ---- per-agent arm stats ----

    pub fn arm_stat(&self, agent_id: &AgentId, arm_id: ArmId) -> Option<&AgentArmStat> {
        self.arm_stats.get(&(agent_id.clone(), arm_id))
    }

    pub fn upsert_arm_stat(&mut self, stat: AgentArmStat) -> Result<(), StorageError> {
        stat.validate()?;
        if !self.arms.contains_key(&stat.arm_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "agent_arm_stats.arm_id",
                key: stat.arm_id.0.to_string(),
            });
        }
        if let Some(existing) = self.arm_stat(&stat.agent_id, stat.arm_id) {
            if stat.n < existing.n {
                return Err(StorageError::ContractViolation(
                    ContractViolation::InvalidValue {
                        field: "agent_arm_stat.n",
                        reason: "pull count must never decrease",
                    },
                ));
            }
        }
        self.commit(StoreJournalOp::ArmStatUpsert { stat })
    }

    pub fn arm_stats_for_agent(&self, agent_id: &AgentId) -> Vec<&AgentArmStat> {
        self.arm_stats
            .iter()
            .filter(|((agent, _), _)| agent == agent_id)
            .map(|(_, stat)| stat)
            .collect()
    }

    // ---- metrics ledger ----

    pub fn append_metric(&mut self, input: MetricInput) -> Result<MetricRecord, StorageError> {
        input.validate()?;
        let row = MetricRecord::from_input(MetricId(self.next_metric_id), input);
        self.commit(StoreJournalOp::MetricAppend { row: row.clone() })?;
        Ok(row)
    }

    pub fn metrics(&self) -> &[MetricRecord] {
        &self.metrics
    }

    /// Every row for `agent_id`, in append order.
    pub fn metrics_for_agent(&self, agent_id: &AgentId) -> Vec<&MetricRecord> {
        self.metric_rows_by_agent
            .get(agent_id)
            .map(|rows| rows.iter().filter_map(|idx| self.metrics.get(*idx)).collect())
            .unwrap_or_default()
    }

    /// Rows for `agent_id` with `from <= recorded_at <= to`, in append order.
    pub fn metrics_in_range(
        &self,
        agent_id: &AgentId,
        from: UnixTimeMs,
        to: UnixTimeMs,
    ) -> Vec<&MetricRecord> {
        self.metrics_for_agent(agent_id)
            .into_iter()
            .filter(|row| row.recorded_at >= from && row.recorded_at <= to)
            .collect()
    }

    pub fn attempt_overwrite_metric(&mut self, _metric_id: MetricId) -> Result<(), StorageError> {
        Err(StorageError::AppendOnlyViolation {
            table: "metrics_ledger",
        })
    }

    // ---- policy ledger ----

    pub fn append_policy(&mut self, input: PolicyRecordInput) -> Result<PolicyRecord, StorageError> {
        input.validate()?;
        if let Some(current) = self.current_policy(&input.agent_id) {
            if input.document.version <= current.version {
                return Err(StorageError::ContractViolation(
                    ContractViolation::InvalidValue {
                        field: "policy.version",
                        reason: "must exceed the current version for the agent",
                    },
                ));
            }
        }
        let row = PolicyRecord {
            policy_id: PolicyId(self.next_policy_id),
            agent_id: input.agent_id,
            version: input.document.version,
            content_sha256: policy_content_sha256(&input.document)?,
            document: input.document,
            created_at: input.created_at,
        };
        self.commit(StoreJournalOp::PolicyAppend { row: row.clone() })?;
        Ok(row)
    }

    pub fn set_current_policy(
        &mut self,
        agent_id: &AgentId,
        policy_id: PolicyId,
    ) -> Result<(), StorageError> {
        let belongs = self
            .policy_row(policy_id)
            .map(|row| &row.agent_id == agent_id)
            .unwrap_or(false);
        if !belongs {
            return Err(StorageError::ForeignKeyViolation {
                table: "policy_current.policy_id",
                key: format!("{}:{}", agent_id, policy_id.0),
            });
        }
        self.commit(StoreJournalOp::PolicyCurrentSet {
            agent_id: agent_id.clone(),
            policy_id,
        })
    }

    pub fn policy_row(&self, policy_id: PolicyId) -> Option<&PolicyRecord> {
        // ids are assigned densely from 1 in append order
        let idx = policy_id.0.checked_sub(1)? as usize;
        self.policies
            .get(idx)
            .filter(|row| row.policy_id == policy_id)
            .or_else(|| self.policies.iter().find(|row| row.policy_id == policy_id))
    }

    pub fn current_policy(&self, agent_id: &AgentId) -> Option<&PolicyRecord> {
        self.current_policy
            .get(agent_id)
            .and_then(|policy_id| self.policy_row(*policy_id))
    }

    pub fn policy_rows(&self) -> &[PolicyRecord] {
        &self.policies
    }

    pub fn policy_rows_for_agent(&self, agent_id: &AgentId) -> Vec<&PolicyRecord> {
        self.policies
            .iter()
            .filter(|row| &row.agent_id == agent_id)
            .collect()
    }

    pub fn attempt_overwrite_policy_row(
        &mut self,
        _policy_id: PolicyId,
    ) -> Result<(), StorageError> {
        Err(StorageError::AppendOnlyViolation {
            table: "policy_ledger",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_store_01_digest_is_stable_hex() {
        let doc = PolicyDocument::default_v1();
        let a = policy_content_sha256(&doc).unwrap();
        let b = policy_content_sha256(&doc).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let mut changed = doc.clone();
        changed.chat.style = "chatty".to_string();
        assert_ne!(policy_content_sha256(&changed).unwrap(), a);
    }
}
