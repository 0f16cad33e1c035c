#![forbid(unsafe_code)]

use std::sync::Arc;

use wayfarer_engines::bandit::{
    apply_reward, mark_selected, ArmScoreInput, BanditRuntime, Ucb1Config,
};
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::arm::{AgentArmStat, MovementArm};
use wayfarer_storage::store::{StorageError, WayfarerStore};

use crate::clock::Clock;
use crate::shared_store::{lock_store, SharedStore};

/// Per-agent UCB1 over the seeded catalog. Every read-modify-write holds the store lock.
#[derive(Clone)]
pub struct BanditSelector {
    store: SharedStore,
    runtime: BanditRuntime,
    clock: Arc<dyn Clock>,
}

fn stat_or_fresh(store: &WayfarerStore, agent_id: &AgentId, arm: &MovementArm) -> AgentArmStat {
    store
        .arm_stat(agent_id, arm.arm_id)
        .cloned()
        .unwrap_or_else(|| AgentArmStat::fresh(agent_id.clone(), arm.arm_id))
}

impl BanditSelector {
    pub fn new(store: SharedStore, config: Ucb1Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            runtime: BanditRuntime::new(config),
            clock,
        }
    }

    /// Picks the next arm for `agent_id` and stamps its `last_selected_at`.
    /// Returns `None` only when the catalog is empty.
    pub fn select_arm(&self, agent_id: &AgentId) -> Result<Option<MovementArm>, StorageError> {
        let mut store = lock_store(&self.store)?;
        let arms = store.arms().into_iter().cloned().collect::<Vec<_>>();
        let mut stats = Vec::with_capacity(arms.len());
        for arm in &arms {
            let stat = stat_or_fresh(&store, agent_id, arm);
            if store.arm_stat(agent_id, arm.arm_id).is_none() {
                store.upsert_arm_stat(stat.clone())?;
            }
            stats.push(stat);
        }
        let inputs = stats.iter().map(ArmScoreInput::from).collect::<Vec<_>>();
        let Some(chosen_id) = self.runtime.select(&inputs) else {
            return Ok(None);
        };
        let Some(chosen) = arms.into_iter().find(|arm| arm.arm_id == chosen_id) else {
            return Ok(None);
        };
        let mut stat = stat_or_fresh(&store, agent_id, &chosen);
        mark_selected(&mut stat, self.clock.now());
        store.upsert_arm_stat(stat)?;
        tracing::debug!(agent = %agent_id, arm = %chosen.name, "bandit arm selected");
        Ok(Some(chosen))
    }

    /// Folds one reward into the named arm. An unknown arm name is logged and ignored.
    pub fn update_reward(
        &self,
        agent_id: &AgentId,
        arm_name: &str,
        reward: f64,
    ) -> Result<Option<AgentArmStat>, StorageError> {
        let mut store = lock_store(&self.store)?;
        let Some(arm) = store.arm_by_name(arm_name).cloned() else {
            tracing::warn!(agent = %agent_id, arm = arm_name, "reward for unknown arm ignored");
            return Ok(None);
        };
        let mut stat = stat_or_fresh(&store, agent_id, &arm);
        apply_reward(&mut stat, reward)?;
        store.upsert_arm_stat(stat.clone())?;
        tracing::debug!(
            agent = %agent_id,
            arm = arm_name,
            reward,
            n = stat.n,
            mean = stat.reward_mean,
            "bandit reward applied"
        );
        Ok(Some(stat))
    }

    /// One row per catalog arm, in id order; arms never touched report zero pulls.
    pub fn stats(&self, agent_id: &AgentId) -> Result<Vec<AgentArmStat>, StorageError> {
        let store = lock_store(&self.store)?;
        Ok(store
            .arms()
            .into_iter()
            .map(|arm| stat_or_fresh(&store, agent_id, arm))
            .collect())
    }

    /// Highest empirical mean, ignoring exploration.
    pub fn best_arm(&self, agent_id: &AgentId) -> Result<Option<MovementArm>, StorageError> {
        let stats = self.stats(agent_id)?;
        let inputs = stats.iter().map(ArmScoreInput::from).collect::<Vec<_>>();
        let Some(best) = self.runtime.best_mean(&inputs) else {
            return Ok(None);
        };
        Ok(lock_store(&self.store)?.arm(best).cloned())
    }
}
