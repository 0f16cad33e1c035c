#![forbid(unsafe_code)]

use wayfarer_kernel_contracts::session::MovementSession;

pub const REWARD_SUCCESS_BONUS: f64 = 1.0;
pub const REWARD_TIMEOUT_PENALTY: f64 = 1.0;
pub const REWARD_DURATION_SCALE_MS: f64 = 30_000.0;
pub const REWARD_DAMAGE_SCALE: f64 = 5.0;
pub const REWARD_MAX_DURATION_PENALTY: f64 = 0.5;
pub const REWARD_MAX_DAMAGE_PENALTY: f64 = 0.5;

/// Scores one closed movement session. Success and timeout are applied
/// independently; a session carrying both flags gets both terms.
pub fn compute_reward(session: &MovementSession) -> f64 {
    let mut reward = 0.0;
    if session.success {
        reward += REWARD_SUCCESS_BONUS;
    }
    if session.timeout {
        reward -= REWARD_TIMEOUT_PENALTY;
    }
    let duration_penalty = session.duration_ms as f64 / REWARD_DURATION_SCALE_MS;
    reward -= duration_penalty.min(REWARD_MAX_DURATION_PENALTY);
    let damage_penalty = session.damage_taken / REWARD_DAMAGE_SCALE;
    reward -= damage_penalty.min(REWARD_MAX_DAMAGE_PENALTY);
    reward
}
