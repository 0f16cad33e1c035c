#![forbid(unsafe_code)]

use std::sync::Arc;

use wayfarer_engines::policy_patch::{merge_patch, PatchSchemaError};
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::policy::{
    PolicyDocument, PolicyPatch, PolicyRecord, PolicyRecordInput,
};
use wayfarer_kernel_contracts::{ContractViolation, UnixTimeMs};
use wayfarer_storage::store::{StorageError, WayfarerStore};

use crate::bus::{BusEvent, MessageBus, TOPIC_POLICY_UPDATED};
use crate::clock::Clock;
use crate::shared_store::{lock_store, SharedStore};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    InvalidPatch(#[from] PatchSchemaError),
}

/// Sole owner of policy rows and the per-agent current pointer.
#[derive(Clone)]
pub struct PolicyStore {
    store: SharedStore,
    bus: MessageBus,
    clock: Arc<dyn Clock>,
}

/// Current row for `agent_id`, creating and pointing at the default document when absent.
fn current_or_default(
    store: &mut WayfarerStore,
    agent_id: &AgentId,
    now: UnixTimeMs,
) -> Result<PolicyRecord, StorageError> {
    if let Some(current) = store.current_policy(agent_id) {
        return Ok(current.clone());
    }
    let input = PolicyRecordInput::v1(agent_id.clone(), PolicyDocument::default_v1(), now)?;
    let row = store.append_policy(input)?;
    store.set_current_policy(agent_id, row.policy_id)?;
    tracing::info!(agent = %agent_id, version = row.version, "default policy created");
    Ok(row)
}

/// Inserts `document` as the next version and repoints current.
fn commit_next_version(
    store: &mut WayfarerStore,
    agent_id: &AgentId,
    mut document: PolicyDocument,
    now: UnixTimeMs,
) -> Result<PolicyRecord, StorageError> {
    let current_version = store
        .current_policy(agent_id)
        .map_or(0, |current| current.version);
    document.version = document
        .version
        .max(current_version)
        .checked_add(1)
        .ok_or(ContractViolation::InvalidValue {
            field: "policy.version",
            reason: "version space exhausted",
        })?;
    let input = PolicyRecordInput::v1(agent_id.clone(), document, now)?;
    let row = store.append_policy(input)?;
    // a failed repoint leaves `row` orphaned in the ledger; current stays on the old version
    store.set_current_policy(agent_id, row.policy_id)?;
    Ok(row)
}

impl PolicyStore {
    pub fn new(store: SharedStore, bus: MessageBus, clock: Arc<dyn Clock>) -> Self {
        Self { store, bus, clock }
    }

    pub fn get_current_policy(&self, agent_id: &AgentId) -> Result<PolicyRecord, StorageError> {
        let now = self.clock.now();
        let mut store = lock_store(&self.store)?;
        current_or_default(&mut store, agent_id, now)
    }

    /// Stores `document` as a new version and publishes `policy.updated`.
    pub fn set_new_policy(
        &self,
        agent_id: &AgentId,
        document: PolicyDocument,
    ) -> Result<PolicyRecord, PolicyError> {
        let now = self.clock.now();
        let row = {
            let mut store = lock_store(&self.store)?;
            commit_next_version(&mut store, agent_id, document, now)?
        };
        self.announce(&row);
        Ok(row)
    }

    /// Deep-merges `patch` onto the current document, clamps, and stores the result.
    /// A merged document that does not fit the schema is rejected with nothing written.
    pub fn patch_policy(
        &self,
        agent_id: &AgentId,
        patch: &PolicyPatch,
    ) -> Result<PolicyRecord, PolicyError> {
        let now = self.clock.now();
        let row = {
            let mut store = lock_store(&self.store)?;
            let current = current_or_default(&mut store, agent_id, now)?;
            let merged = merge_patch(&current.document, patch)?;
            commit_next_version(&mut store, agent_id, merged, now)?
        };
        self.announce(&row);
        Ok(row)
    }

    pub fn history(&self, agent_id: &AgentId) -> Result<Vec<PolicyRecord>, StorageError> {
        Ok(lock_store(&self.store)?
            .policy_rows_for_agent(agent_id)
            .into_iter()
            .cloned()
            .collect())
    }

    fn announce(&self, row: &PolicyRecord) {
        tracing::info!(agent = %row.agent_id, version = row.version, "policy version stored");
        self.bus
            .publish(TOPIC_POLICY_UPDATED, &BusEvent::PolicyUpdated(row.clone()));
    }
}
