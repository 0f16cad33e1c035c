#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::json;
use wayfarer_engines::reward::compute_reward;
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::arm::MovementArm;
use wayfarer_kernel_contracts::metric::{
    METRIC_KIND_MOVEMENT_DAMAGE, METRIC_KIND_MOVEMENT_DURATION_MS, METRIC_KIND_MOVEMENT_REWARD,
};
use wayfarer_kernel_contracts::policy::PolicyRecord;
use wayfarer_kernel_contracts::session::MovementSession;
use wayfarer_kernel_contracts::UnixTimeMs;
use wayfarer_storage::store::StorageError;

use crate::arm_registry::ArmRegistry;
use crate::bandit::BanditSelector;
use crate::bus::{BusEvent, MessageBus, TOPIC_POLICY_UPDATED};
use crate::clock::Clock;
use crate::metrics::MetricsRecorder;
use crate::subscription::Subscription;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    Success,
    Partial,
    NoPath,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorSignal {
    GoalReached,
    PathUpdate { status: PathStatus },
    DamageTaken { amount: f64 },
}

pub type SignalHandler = Box<dyn Fn(ActuatorSignal) + Send + Sync + 'static>;

/// The pathfinding side of the world connection.
pub trait MovementActuator: Send + Sync + 'static {
    /// Makes `arm`'s knobs the active path-cost configuration.
    fn apply_arm(&self, arm: &MovementArm);

    fn subscribe(&self, handler: SignalHandler) -> Subscription;
}

#[derive(Debug, Clone)]
struct OpenSession {
    arm: MovementArm,
    started_at: UnixTimeMs,
    damage_taken: f64,
}

/// A closed episode and the reward it earned.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSession {
    pub arm_name: String,
    pub session: MovementSession,
    pub reward: f64,
}

/// Runs one agent's movement episodes: pick an arm, apply it, score the outcome, repeat.
pub struct MovementController {
    agent_id: AgentId,
    bandit: BanditSelector,
    metrics: MetricsRecorder,
    registry: ArmRegistry,
    actuator: Arc<dyn MovementActuator>,
    clock: Arc<dyn Clock>,
    session: Mutex<Option<OpenSession>>,
    policy_arm: Mutex<Option<String>>,
}

impl MovementController {
    pub fn new(
        agent_id: AgentId,
        bandit: BanditSelector,
        metrics: MetricsRecorder,
        registry: ArmRegistry,
        actuator: Arc<dyn MovementActuator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            agent_id,
            bandit,
            metrics,
            registry,
            actuator,
            clock,
            session: Mutex::new(None),
            policy_arm: Mutex::new(None),
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    fn session_slot(&self) -> MutexGuard<'_, Option<OpenSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn active_arm(&self) -> Option<MovementArm> {
        self.session_slot().as_ref().map(|open| open.arm.clone())
    }

    fn open(&self, arm: MovementArm) {
        self.actuator.apply_arm(&arm);
        *self.session_slot() = Some(OpenSession {
            arm,
            started_at: self.clock.now(),
            damage_taken: 0.0,
        });
    }

    /// Lets the bandit choose the next arm and opens a fresh episode with it.
    pub fn start_episode(&self) -> Result<Option<MovementArm>, StorageError> {
        let Some(arm) = self.bandit.select_arm(&self.agent_id)? else {
            tracing::warn!(agent = %self.agent_id, "no movement arms seeded");
            return Ok(None);
        };
        self.open(arm.clone());
        Ok(Some(arm))
    }

    /// Feeds one actuator signal. Returns the scored episode when the signal closed one.
    pub fn handle_signal(
        &self,
        signal: ActuatorSignal,
    ) -> Result<Option<ScoredSession>, StorageError> {
        match signal {
            ActuatorSignal::DamageTaken { amount } => {
                if amount.is_finite() && amount > 0.0 {
                    if let Some(open) = self.session_slot().as_mut() {
                        open.damage_taken = (open.damage_taken + amount).min(f64::MAX);
                    }
                }
                Ok(None)
            }
            ActuatorSignal::GoalReached => self.finish(true, false),
            ActuatorSignal::PathUpdate {
                status: PathStatus::NoPath | PathStatus::Timeout,
            } => self.finish(false, true),
            ActuatorSignal::PathUpdate { .. } => Ok(None),
        }
    }

    /// Closes the open episode, then always opens the next one, even when scoring failed.
    fn finish(&self, success: bool, timeout: bool) -> Result<Option<ScoredSession>, StorageError> {
        let Some(open) = self.session_slot().take() else {
            return Ok(None);
        };
        let scored = self.score(&open, success, timeout);
        if let Err(err) = &scored {
            tracing::warn!(agent = %self.agent_id, arm = %open.arm.name, error = %err, "movement session not scored");
        }
        match self.start_episode() {
            Ok(Some(_)) => {}
            Ok(None) => self.open(open.arm.clone()),
            Err(err) => {
                tracing::warn!(agent = %self.agent_id, arm = %open.arm.name, error = %err, "arm selection failed; reusing previous arm");
                self.open(open.arm.clone());
                return Err(scored.err().unwrap_or(err));
            }
        }
        scored.map(Some)
    }

    fn score(
        &self,
        open: &OpenSession,
        success: bool,
        timeout: bool,
    ) -> Result<ScoredSession, StorageError> {
        let now = self.clock.now();
        let session = MovementSession::v1(
            open.arm.arm_id,
            open.started_at,
            success,
            timeout,
            now.elapsed_since(open.started_at),
            open.damage_taken,
        )?;
        let reward = compute_reward(&session);
        self.bandit
            .update_reward(&self.agent_id, &open.arm.name, reward)?;

        let context = json!({
            "arm": open.arm.name,
            "armId": open.arm.arm_id.0,
            "success": success,
            "timeout": timeout,
        });
        self.metrics
            .record(&self.agent_id, METRIC_KIND_MOVEMENT_REWARD, reward, context.clone())?;
        self.metrics.record(
            &self.agent_id,
            METRIC_KIND_MOVEMENT_DURATION_MS,
            session.duration_ms as f64,
            context.clone(),
        )?;
        self.metrics.record(
            &self.agent_id,
            METRIC_KIND_MOVEMENT_DAMAGE,
            session.damage_taken,
            context,
        )?;
        tracing::debug!(agent = %self.agent_id, arm = %open.arm.name, reward, "movement session scored");
        Ok(ScoredSession {
            arm_name: open.arm.name.clone(),
            session,
            reward,
        })
    }

    /// Switches to the policy's preferred arm when the preference changed. A different arm
    /// restarts the open episode unscored; the arm already running keeps its episode.
    pub fn apply_policy(&self, policy: &PolicyRecord) -> Result<Option<MovementArm>, StorageError> {
        if policy.agent_id != self.agent_id {
            return Ok(None);
        }
        let preferred = &policy.document.movement.preferred_arm;
        let Some(arm) = self.registry.arm_by_name(preferred)? else {
            tracing::warn!(
                agent = %self.agent_id,
                arm = %preferred,
                version = policy.version,
                "policy prefers an unknown arm; keeping current arm"
            );
            return Ok(None);
        };
        let previous = self
            .policy_arm
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(arm.name.clone());
        if previous.as_deref() == Some(arm.name.as_str()) {
            tracing::debug!(agent = %self.agent_id, arm = %arm.name, version = policy.version, "preferred arm unchanged");
            return Ok(None);
        }
        if self.active_arm().is_some_and(|active| active.name == arm.name) {
            self.actuator.apply_arm(&arm);
            tracing::debug!(agent = %self.agent_id, arm = %arm.name, version = policy.version, "preferred arm already active");
            return Ok(Some(arm));
        }
        tracing::info!(agent = %self.agent_id, arm = %arm.name, version = policy.version, "preferred arm applied");
        self.open(arm.clone());
        Ok(Some(arm))
    }
}

/// Owns every subscription one agent holds for its connection lifetime.
pub struct MovementAttachment {
    controller: Arc<MovementController>,
    subscriptions: Vec<Subscription>,
}

impl MovementAttachment {
    pub fn attach(controller: Arc<MovementController>, bus: &MessageBus) -> Self {
        let signal_target = Arc::downgrade(&controller);
        let signals = controller.actuator.subscribe(Box::new(move |signal| {
            let Some(controller) = signal_target.upgrade() else {
                return;
            };
            if let Err(err) = controller.handle_signal(signal) {
                tracing::warn!(agent = %controller.agent_id, error = %err, "movement signal dropped");
            }
        }));

        let policy_target = Arc::downgrade(&controller);
        let policies = bus.subscribe(TOPIC_POLICY_UPDATED, move |event| {
            let BusEvent::PolicyUpdated(row) = event else {
                return;
            };
            let Some(controller) = policy_target.upgrade() else {
                return;
            };
            if let Err(err) = controller.apply_policy(row) {
                tracing::warn!(agent = %controller.agent_id, error = %err, "policy update not applied");
            }
        });

        Self {
            controller,
            subscriptions: vec![signals, policies],
        }
    }

    pub fn controller(&self) -> &Arc<MovementController> {
        &self.controller
    }

    pub fn detach(&mut self) {
        for subscription in &mut self.subscriptions {
            subscription.unsubscribe();
        }
    }
}
