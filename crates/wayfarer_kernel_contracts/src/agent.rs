#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{validate_token, ContractViolation, Validate};

pub const AGENT_ID_MAX_LEN: usize = 64;

/// Stable identity of one autonomous agent (one bot connection).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let id = Self(id.into());
        id.validate()?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for AgentId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("agent_id", &self.0, AGENT_ID_MAX_LEN)
    }
}

impl TryFrom<String> for AgentId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AgentId::new(value)
    }
}

impl From<AgentId> for String {
    fn from(value: AgentId) -> Self {
        value.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
