#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::arm::ArmId;
use crate::common::validate_finite;
use crate::{ContractViolation, UnixTimeMs, Validate};

/// Outcome of one bounded attempt at reaching a movement goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementSession {
    pub arm_id: ArmId,
    pub started_at: UnixTimeMs,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub timeout: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub damage_taken: f64,
}

impl MovementSession {
    pub fn v1(
        arm_id: ArmId,
        started_at: UnixTimeMs,
        success: bool,
        timeout: bool,
        duration_ms: u64,
        damage_taken: f64,
    ) -> Result<Self, ContractViolation> {
        let session = Self {
            arm_id,
            started_at,
            success,
            timeout,
            duration_ms,
            damage_taken,
        };
        session.validate()?;
        Ok(session)
    }
}

impl Validate for MovementSession {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_finite("movement_session.damage_taken", self.damage_taken)?;
        if self.damage_taken < 0.0 {
            return Err(ContractViolation::InvalidRange {
                field: "movement_session.damage_taken",
                min: 0.0,
                max: f64::MAX,
                got: self.damage_taken,
            });
        }
        Ok(())
    }
}
