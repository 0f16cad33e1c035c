#![forbid(unsafe_code)]

use wayfarer_kernel_contracts::arm::{AgentArmStat, ArmId};
use wayfarer_kernel_contracts::{ContractViolation, UnixTimeMs, Validate};

pub const UCB1_DEFAULT_EXPLORATION_C: f64 = 1.4;
pub const UCB1_EXPLORATION_C_ENV: &str = "WAYFARER_UCB_C";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ucb1Config {
    pub exploration_c: f64,
}

impl Ucb1Config {
    pub fn mvp_v1() -> Self {
        Self {
            exploration_c: UCB1_DEFAULT_EXPLORATION_C,
        }
    }

    /// Parses an exploration constant override. Errors name [`UCB1_EXPLORATION_C_ENV`].
    pub fn with_exploration_c_str(raw: &str) -> Result<Self, String> {
        let exploration_c = raw
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("{UCB1_EXPLORATION_C_ENV} must be a number"))?;
        let config = Self { exploration_c };
        config
            .validate()
            .map_err(|err| format!("{UCB1_EXPLORATION_C_ENV} is invalid: {err}"))?;
        Ok(config)
    }
}

impl Validate for Ucb1Config {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !self.exploration_c.is_finite() || self.exploration_c <= 0.0 {
            return Err(ContractViolation::InvalidValue {
                field: "ucb1_config.exploration_c",
                reason: "must be finite and > 0",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmScoreInput {
    pub arm_id: ArmId,
    pub pulls: u64,
    pub reward_mean: f64,
}

impl From<&AgentArmStat> for ArmScoreInput {
    fn from(stat: &AgentArmStat) -> Self {
        Self {
            arm_id: stat.arm_id,
            pulls: stat.n,
            reward_mean: stat.reward_mean,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BanditRuntime {
    config: Ucb1Config,
}

impl BanditRuntime {
    pub fn new(config: Ucb1Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> Ucb1Config {
        self.config
    }

    /// UCB1 score; an unpulled arm is unbounded.
    pub fn score(&self, arm: &ArmScoreInput, total_pulls: u64) -> f64 {
        if arm.pulls == 0 {
            return f64::INFINITY;
        }
        let exploration = ((total_pulls as f64 + 1.0).ln() / arm.pulls as f64).sqrt();
        arm.reward_mean + self.config.exploration_c * exploration
    }

    /// Highest score wins; equal scores resolve to the lowest arm id.
    pub fn select(&self, arms: &[ArmScoreInput]) -> Option<ArmId> {
        let total_pulls = arms.iter().map(|arm| arm.pulls).sum::<u64>();
        let mut ordered = arms.to_vec();
        ordered.sort_by_key(|arm| arm.arm_id);

        let mut best: Option<(ArmId, f64)> = None;
        for arm in &ordered {
            let score = self.score(arm, total_pulls);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((arm.arm_id, score)),
            }
        }
        best.map(|(arm_id, _)| arm_id)
    }

    /// Exploit-only view: highest empirical mean among pulled arms.
    pub fn best_mean(&self, arms: &[ArmScoreInput]) -> Option<ArmId> {
        let mut ordered = arms
            .iter()
            .filter(|arm| arm.pulls > 0)
            .copied()
            .collect::<Vec<_>>();
        ordered.sort_by_key(|arm| arm.arm_id);
        let mut best: Option<ArmScoreInput> = None;
        for arm in ordered {
            match best {
                Some(current) if arm.reward_mean <= current.reward_mean => {}
                _ => best = Some(arm),
            }
        }
        best.map(|arm| arm.arm_id)
    }
}

pub fn apply_reward(stat: &mut AgentArmStat, reward: f64) -> Result<(), ContractViolation> {
    if !reward.is_finite() {
        return Err(ContractViolation::NotFinite {
            field: "bandit.reward",
        });
    }
    stat.n = stat.n.saturating_add(1);
    stat.reward_sum += reward;
    stat.reward_mean = stat.reward_sum / stat.n as f64;
    Ok(())
}

pub fn mark_selected(stat: &mut AgentArmStat, now: UnixTimeMs) {
    stat.last_selected_at = Some(now);
}
