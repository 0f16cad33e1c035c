#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::common::validate_finite;
use crate::{validate_token, ContractViolation, SchemaVersion, UnixTimeMs, Validate};

pub const ARM_CATALOG_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);
pub const ARM_NAME_MAX_LEN: usize = 48;
pub const ARM_CATALOG_MAX_ARMS: usize = 64;
pub const ARM_MAX_KNOBS: usize = 32;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ArmId(pub u32);

/// One tunable knob on a path-cost configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KnobValue {
    Flag(bool),
    Number(f64),
}

pub type ArmParameters = BTreeMap<String, KnobValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementArm {
    #[serde(rename = "id")]
    pub arm_id: ArmId,
    pub name: String,
    pub parameters: ArmParameters,
}

impl MovementArm {
    pub fn v1(
        arm_id: ArmId,
        name: String,
        parameters: ArmParameters,
    ) -> Result<Self, ContractViolation> {
        let arm = Self {
            arm_id,
            name,
            parameters,
        };
        arm.validate()?;
        Ok(arm)
    }
}

impl Validate for MovementArm {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.arm_id.0 == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "movement_arm.id",
                reason: "must be > 0",
            });
        }
        validate_token("movement_arm.name", &self.name, ARM_NAME_MAX_LEN)?;
        if self.parameters.len() > ARM_MAX_KNOBS {
            return Err(ContractViolation::InvalidValue {
                field: "movement_arm.parameters",
                reason: "must be <= 32 knobs",
            });
        }
        for (knob, value) in &self.parameters {
            validate_token("movement_arm.parameters.key", knob, ARM_NAME_MAX_LEN)?;
            if let KnobValue::Number(n) = value {
                validate_finite("movement_arm.parameters.value", *n)?;
            }
        }
        Ok(())
    }
}

/// Versioned, read-mostly catalog of movement strategies loaded at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmCatalog {
    pub catalog_version: u32,
    pub arms: Vec<MovementArm>,
}

impl ArmCatalog {
    pub fn v1(catalog_version: u32, arms: Vec<MovementArm>) -> Result<Self, ContractViolation> {
        let catalog = Self {
            catalog_version,
            arms,
        };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ContractViolation> {
        let catalog: ArmCatalog =
            serde_json::from_str(raw).map_err(|_| ContractViolation::InvalidValue {
                field: "arm_catalog",
                reason: "must be a JSON object with catalog_version and arms",
            })?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// The four seeded strategies, ids in ascending order of risk appetite.
    pub fn default_v1() -> Self {
        let arm = |id: u32, name: &str, knobs: &[(&str, KnobValue)]| MovementArm {
            arm_id: ArmId(id),
            name: name.to_string(),
            parameters: knobs
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<ArmParameters>(),
        };
        use KnobValue::{Flag, Number};
        Self {
            catalog_version: 1,
            arms: vec![
                arm(
                    1,
                    "conservative",
                    &[
                        ("allowParkour", Flag(false)),
                        ("allowSprinting", Flag(false)),
                        ("canDig", Flag(false)),
                        ("allow1by1towers", Flag(false)),
                        ("maxDropDown", Number(2.0)),
                        ("liquidCost", Number(5.0)),
                    ],
                ),
                arm(
                    2,
                    "balanced",
                    &[
                        ("allowParkour", Flag(false)),
                        ("allowSprinting", Flag(true)),
                        ("canDig", Flag(true)),
                        ("allow1by1towers", Flag(true)),
                        ("maxDropDown", Number(3.0)),
                        ("liquidCost", Number(3.0)),
                    ],
                ),
                arm(
                    3,
                    "aggressive",
                    &[
                        ("allowParkour", Flag(true)),
                        ("allowSprinting", Flag(true)),
                        ("canDig", Flag(true)),
                        ("allow1by1towers", Flag(true)),
                        ("maxDropDown", Number(4.0)),
                        ("liquidCost", Number(1.0)),
                    ],
                ),
                arm(
                    4,
                    "scout",
                    &[
                        ("allowParkour", Flag(true)),
                        ("allowSprinting", Flag(true)),
                        ("canDig", Flag(false)),
                        ("allow1by1towers", Flag(false)),
                        ("maxDropDown", Number(3.0)),
                        ("liquidCost", Number(2.0)),
                    ],
                ),
            ],
        }
    }

    pub fn arm_by_name(&self, name: &str) -> Option<&MovementArm> {
        self.arms.iter().find(|arm| arm.name == name)
    }
}

impl Validate for ArmCatalog {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.catalog_version == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "arm_catalog.catalog_version",
                reason: "must be > 0",
            });
        }
        if self.arms.is_empty() || self.arms.len() > ARM_CATALOG_MAX_ARMS {
            return Err(ContractViolation::InvalidValue {
                field: "arm_catalog.arms",
                reason: "must contain 1..=64 arms",
            });
        }
        let mut ids = BTreeSet::new();
        let mut names = BTreeSet::new();
        for arm in &self.arms {
            arm.validate()?;
            if !ids.insert(arm.arm_id) {
                return Err(ContractViolation::InvalidValue {
                    field: "arm_catalog.arms.id",
                    reason: "must be unique",
                });
            }
            if !names.insert(arm.name.as_str()) {
                return Err(ContractViolation::InvalidValue {
                    field: "arm_catalog.arms.name",
                    reason: "must be unique",
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentArmStat {
    pub agent_id: AgentId,
    pub arm_id: ArmId,
    pub n: u64,
    pub reward_sum: f64,
    pub reward_mean: f64,
    pub last_selected_at: Option<UnixTimeMs>,
}

impl AgentArmStat {
    pub fn fresh(agent_id: AgentId, arm_id: ArmId) -> Self {
        Self {
            agent_id,
            arm_id,
            n: 0,
            reward_sum: 0.0,
            reward_mean: 0.0,
            last_selected_at: None,
        }
    }
}

impl Validate for AgentArmStat {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.agent_id.validate()?;
        validate_finite("agent_arm_stat.reward_sum", self.reward_sum)?;
        validate_finite("agent_arm_stat.reward_mean", self.reward_mean)?;
        if self.n == 0 && self.reward_sum != 0.0 {
            return Err(ContractViolation::InvalidValue {
                field: "agent_arm_stat.reward_sum",
                reason: "must be 0 when n == 0",
            });
        }
        if self.n > 0 {
            let expected = self.reward_sum / self.n as f64;
            if (expected - self.reward_mean).abs() > 1e-9 {
                return Err(ContractViolation::InvalidValue {
                    field: "agent_arm_stat.reward_mean",
                    reason: "must equal reward_sum / n",
                });
            }
        }
        Ok(())
    }
}
