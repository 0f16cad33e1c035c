#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentId;
use crate::common::validate_finite;
use crate::{validate_token, ContractViolation, UnixTimeMs, Validate};

pub const METRIC_KIND_MAX_LEN: usize = 64;

pub const METRIC_KIND_MOVEMENT_REWARD: &str = "movement.reward";
pub const METRIC_KIND_MOVEMENT_DURATION_MS: &str = "movement.duration_ms";
pub const METRIC_KIND_MOVEMENT_DAMAGE: &str = "movement.damage_taken";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MetricId(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricInput {
    pub agent_id: AgentId,
    pub recorded_at: UnixTimeMs,
    pub kind: String,
    pub value: f64,
    pub context: Value,
}

impl MetricInput {
    pub fn v1(
        agent_id: AgentId,
        recorded_at: UnixTimeMs,
        kind: String,
        value: f64,
        context: Value,
    ) -> Result<Self, ContractViolation> {
        let input = Self {
            agent_id,
            recorded_at,
            kind,
            value,
            context,
        };
        input.validate()?;
        Ok(input)
    }
}

impl Validate for MetricInput {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.agent_id.validate()?;
        validate_token("metric.kind", &self.kind, METRIC_KIND_MAX_LEN)?;
        validate_finite("metric.value", self.value)?;
        if !(self.context.is_object() || self.context.is_null()) {
            return Err(ContractViolation::InvalidValue {
                field: "metric.context",
                reason: "must be a JSON object or null",
            });
        }
        Ok(())
    }
}

/// Append-only metric ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub metric_id: MetricId,
    pub agent_id: AgentId,
    pub recorded_at: UnixTimeMs,
    pub kind: String,
    pub value: f64,
    pub context: Value,
}

impl MetricRecord {
    pub fn from_input(metric_id: MetricId, input: MetricInput) -> Self {
        Self {
            metric_id,
            agent_id: input.agent_id,
            recorded_at: input.recorded_at,
            kind: input.kind,
            value: input.value,
            context: input.context,
        }
    }
}
