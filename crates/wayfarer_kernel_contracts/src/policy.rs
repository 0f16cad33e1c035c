#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::AgentId;
use crate::common::validate_finite;
use crate::{validate_token, ContractViolation, UnixTimeMs, Validate};

pub const POLICY_PATCH_ALLOWED_KEYS: [&str; 4] = ["movement", "skillWeights", "chat", "risk"];

pub const SKILL_WEIGHT_MIN: f64 = 0.0;
pub const SKILL_WEIGHT_MAX: f64 = 2.0;
pub const SMALLTALK_RATE_MIN: f64 = 0.0;
pub const SMALLTALK_RATE_MAX: f64 = 0.2;

pub const DEFAULT_PREFERRED_ARM: &str = "balanced";
pub const DEFAULT_CHAT_STYLE: &str = "brief";
pub const DEFAULT_SMALLTALK_RATE: f64 = 0.02;
pub const DEFAULT_SKILLS: [&str; 6] = ["gather", "mine", "craft", "build", "explore", "combat"];
pub const DEFAULT_RISK_FLAGS: [&str; 3] = ["avoidLava", "avoidDrops", "avoidHostileMobs"];

const POLICY_TOKEN_MAX_LEN: usize = 48;
const POLICY_MAX_MAP_ENTRIES: usize = 64;

fn default_version() -> u32 {
    1
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PolicyId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementPolicy {
    pub preferred_arm: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPolicy {
    pub style: String,
    pub smalltalk_rate: f64,
}

/// Agent-scoped behavioral policy. Wire form uses camelCase keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    pub movement: MovementPolicy,
    pub skill_weights: BTreeMap<String, f64>,
    pub risk: BTreeMap<String, bool>,
    pub chat: ChatPolicy,
}

impl PolicyDocument {
    pub fn default_v1() -> Self {
        Self {
            version: 1,
            movement: MovementPolicy {
                preferred_arm: DEFAULT_PREFERRED_ARM.to_string(),
            },
            skill_weights: DEFAULT_SKILLS
                .iter()
                .map(|skill| (skill.to_string(), 1.0))
                .collect(),
            risk: DEFAULT_RISK_FLAGS
                .iter()
                .map(|flag| (flag.to_string(), true))
                .collect(),
            chat: ChatPolicy {
                style: DEFAULT_CHAT_STYLE.to_string(),
                smalltalk_rate: DEFAULT_SMALLTALK_RATE,
            },
        }
    }
}

impl Validate for PolicyDocument {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.version == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "policy.version",
                reason: "must be >= 1",
            });
        }
        validate_token(
            "policy.movement.preferredArm",
            &self.movement.preferred_arm,
            POLICY_TOKEN_MAX_LEN,
        )?;
        if self.skill_weights.len() > POLICY_MAX_MAP_ENTRIES {
            return Err(ContractViolation::InvalidValue {
                field: "policy.skillWeights",
                reason: "must be <= 64 entries",
            });
        }
        for (skill, weight) in &self.skill_weights {
            validate_token("policy.skillWeights.key", skill, POLICY_TOKEN_MAX_LEN)?;
            validate_finite("policy.skillWeights.value", *weight)?;
            if !(SKILL_WEIGHT_MIN..=SKILL_WEIGHT_MAX).contains(weight) {
                return Err(ContractViolation::InvalidRange {
                    field: "policy.skillWeights.value",
                    min: SKILL_WEIGHT_MIN,
                    max: SKILL_WEIGHT_MAX,
                    got: *weight,
                });
            }
        }
        if self.risk.len() > POLICY_MAX_MAP_ENTRIES {
            return Err(ContractViolation::InvalidValue {
                field: "policy.risk",
                reason: "must be <= 64 entries",
            });
        }
        for flag in self.risk.keys() {
            validate_token("policy.risk.key", flag, POLICY_TOKEN_MAX_LEN)?;
        }
        validate_token("policy.chat.style", &self.chat.style, POLICY_TOKEN_MAX_LEN)?;
        validate_finite("policy.chat.smalltalkRate", self.chat.smalltalk_rate)?;
        if !(SMALLTALK_RATE_MIN..=SMALLTALK_RATE_MAX).contains(&self.chat.smalltalk_rate) {
            return Err(ContractViolation::InvalidRange {
                field: "policy.chat.smalltalkRate",
                min: SMALLTALK_RATE_MIN,
                max: SMALLTALK_RATE_MAX,
                got: self.chat.smalltalk_rate,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecordInput {
    pub agent_id: AgentId,
    pub document: PolicyDocument,
    pub created_at: UnixTimeMs,
}

impl PolicyRecordInput {
    pub fn v1(
        agent_id: AgentId,
        document: PolicyDocument,
        created_at: UnixTimeMs,
    ) -> Result<Self, ContractViolation> {
        let input = Self {
            agent_id,
            document,
            created_at,
        };
        input.validate()?;
        Ok(input)
    }
}

impl Validate for PolicyRecordInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.agent_id.validate()?;
        self.document.validate()
    }
}

/// Append-only policy ledger row. `version` mirrors `document.version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub policy_id: PolicyId,
    pub agent_id: AgentId,
    pub version: u32,
    pub document: PolicyDocument,
    pub content_sha256: String,
    pub created_at: UnixTimeMs,
}

/// Partial policy document whose top-level keys are restricted to
/// [`POLICY_PATCH_ALLOWED_KEYS`]. Values inside those keys are still untrusted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyPatch(Map<String, Value>);

#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedPatch {
    pub patch: PolicyPatch,
    pub dropped_keys: Vec<String>,
}

impl PolicyPatch {
    pub fn from_untrusted(raw: Map<String, Value>) -> SanitizedPatch {
        let mut kept = Map::new();
        let mut dropped_keys = Vec::new();
        for (key, value) in raw {
            if POLICY_PATCH_ALLOWED_KEYS.contains(&key.as_str()) {
                kept.insert(key, value);
            } else {
                dropped_keys.push(key);
            }
        }
        SanitizedPatch {
            patch: PolicyPatch(kept),
            dropped_keys,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}
