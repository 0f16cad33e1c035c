#![forbid(unsafe_code)]

use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::arm::{AgentArmStat, ArmId, MovementArm};
use wayfarer_kernel_contracts::metric::{MetricId, MetricInput, MetricRecord};
use wayfarer_kernel_contracts::policy::{PolicyId, PolicyRecord, PolicyRecordInput};
use wayfarer_kernel_contracts::UnixTimeMs;

use crate::store::{StorageError, WayfarerStore};

/// Typed repository interface for the movement arm catalog.
pub trait ArmCatalogRepo {
    fn insert_arm_row_if_absent(&mut self, arm: MovementArm) -> Result<bool, StorageError>;
    fn arm_row(&self, arm_id: ArmId) -> Option<&MovementArm>;
    fn arm_row_by_name(&self, name: &str) -> Option<&MovementArm>;
    fn arm_rows(&self) -> Vec<&MovementArm>;
}

/// Typed repository interface for per-agent bandit statistics.
pub trait ArmStatRepo {
    fn arm_stat_row(&self, agent_id: &AgentId, arm_id: ArmId) -> Option<&AgentArmStat>;
    fn upsert_arm_stat_row(&mut self, stat: AgentArmStat) -> Result<(), StorageError>;
    fn arm_stat_rows_for_agent(&self, agent_id: &AgentId) -> Vec<&AgentArmStat>;
}

/// Typed repository interface for the append-only metrics ledger.
pub trait MetricLedgerRepo {
    fn append_metric_row(&mut self, input: MetricInput) -> Result<MetricRecord, StorageError>;
    fn metric_rows(&self) -> &[MetricRecord];
    fn metric_rows_for_agent(&self, agent_id: &AgentId) -> Vec<&MetricRecord>;
    fn metric_rows_in_range(
        &self,
        agent_id: &AgentId,
        from: UnixTimeMs,
        to: UnixTimeMs,
    ) -> Vec<&MetricRecord>;
    fn attempt_overwrite_metric_row(&mut self, metric_id: MetricId) -> Result<(), StorageError>;
}

/// Typed repository interface for the append-only policy ledger and its current pointer.
pub trait PolicyLedgerRepo {
    fn append_policy_row(&mut self, input: PolicyRecordInput)
        -> Result<PolicyRecord, StorageError>;
    fn set_current_policy_row(
        &mut self,
        agent_id: &AgentId,
        policy_id: PolicyId,
    ) -> Result<(), StorageError>;
    fn current_policy_row(&self, agent_id: &AgentId) -> Option<&PolicyRecord>;
    fn policy_rows_for_agent(&self, agent_id: &AgentId) -> Vec<&PolicyRecord>;
    fn attempt_overwrite_policy_ledger_row(
        &mut self,
        policy_id: PolicyId,
    ) -> Result<(), StorageError>;
}

impl ArmCatalogRepo for WayfarerStore {
    fn insert_arm_row_if_absent(&mut self, arm: MovementArm) -> Result<bool, StorageError> {
        self.insert_arm_if_absent(arm)
    }

    fn arm_row(&self, arm_id: ArmId) -> Option<&MovementArm> {
        self.arm(arm_id)
    }

    fn arm_row_by_name(&self, name: &str) -> Option<&MovementArm> {
        self.arm_by_name(name)
    }

    fn arm_rows(&self) -> Vec<&MovementArm> {
        self.arms()
    }
}

impl ArmStatRepo for WayfarerStore {
    fn arm_stat_row(&self, agent_id: &AgentId, arm_id: ArmId) -> Option<&AgentArmStat> {
        self.arm_stat(agent_id, arm_id)
    }

    fn upsert_arm_stat_row(&mut self, stat: AgentArmStat) -> Result<(), StorageError> {
        self.upsert_arm_stat(stat)
    }

    fn arm_stat_rows_for_agent(&self, agent_id: &AgentId) -> Vec<&AgentArmStat> {
        self.arm_stats_for_agent(agent_id)
    }
}

impl MetricLedgerRepo for WayfarerStore {
    fn append_metric_row(&mut self, input: MetricInput) -> Result<MetricRecord, StorageError> {
        self.append_metric(input)
    }

    fn metric_rows(&self) -> &[MetricRecord] {
        self.metrics()
    }

    fn metric_rows_for_agent(&self, agent_id: &AgentId) -> Vec<&MetricRecord> {
        self.metrics_for_agent(agent_id)
    }

    fn metric_rows_in_range(
        &self,
        agent_id: &AgentId,
        from: UnixTimeMs,
        to: UnixTimeMs,
    ) -> Vec<&MetricRecord> {
        self.metrics_in_range(agent_id, from, to)
    }

    fn attempt_overwrite_metric_row(&mut self, metric_id: MetricId) -> Result<(), StorageError> {
        self.attempt_overwrite_metric(metric_id)
    }
}

impl PolicyLedgerRepo for WayfarerStore {
    fn append_policy_row(
        &mut self,
        input: PolicyRecordInput,
    ) -> Result<PolicyRecord, StorageError> {
        self.append_policy(input)
    }

    fn set_current_policy_row(
        &mut self,
        agent_id: &AgentId,
        policy_id: PolicyId,
    ) -> Result<(), StorageError> {
        self.set_current_policy(agent_id, policy_id)
    }

    fn current_policy_row(&self, agent_id: &AgentId) -> Option<&PolicyRecord> {
        self.current_policy(agent_id)
    }

    fn policy_rows_for_agent(&self, agent_id: &AgentId) -> Vec<&PolicyRecord> {
        WayfarerStore::policy_rows_for_agent(self, agent_id)
    }

    fn attempt_overwrite_policy_ledger_row(
        &mut self,
        policy_id: PolicyId,
    ) -> Result<(), StorageError> {
        self.attempt_overwrite_policy_row(policy_id)
    }
}
