#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agent::AgentId;
use crate::policy::PolicyDocument;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerfStat {
    pub count: u64,
    pub mean: f64,
}

/// Per metric kind count and mean over a trailing window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerfSnapshot(pub BTreeMap<String, PerfStat>);

impl PerfSnapshot {
    pub fn get(&self, kind: &str) -> Option<&PerfStat> {
        self.0.get(kind)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Request body handed to the advisory text-generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvisorRequest {
    pub system_instruction: String,
    pub agent_id: AgentId,
    pub recent_summary: String,
    pub current_policy: PolicyDocument,
    pub perf_snapshot: PerfSnapshot,
}
