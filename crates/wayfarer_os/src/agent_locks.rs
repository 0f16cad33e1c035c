#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use wayfarer_kernel_contracts::agent::AgentId;

/// One async lock per agent id; holders for different agents never contend.
#[derive(Debug, Default)]
pub struct AgentLocks {
    locks: Mutex<BTreeMap<AgentId, Arc<AsyncMutex<()>>>>,
}

impl AgentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, agent_id: &AgentId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(agent_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Waits until no other holder for `agent_id` remains.
    pub async fn acquire(&self, agent_id: &AgentId) -> OwnedMutexGuard<()> {
        self.lock_for(agent_id).lock_owned().await
    }

    pub fn is_held(&self, agent_id: &AgentId) -> bool {
        self.lock_for(agent_id).try_lock().is_err()
    }
}
