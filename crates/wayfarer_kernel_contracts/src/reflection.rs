#![forbid(unsafe_code)]

use serde_json::{json, Value};

use crate::policy::{PolicyPatch, PolicyRecord};

/// Non-fatal reasons a reflection leaves the stored policy untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReflectFailure {
    AdvisorDisabled,
    InvalidResponse,
    InvalidPatch,
    AdvisorTimeout,
    AdvisorError,
}

impl ReflectFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            ReflectFailure::AdvisorDisabled => "advisor_disabled",
            ReflectFailure::InvalidResponse => "invalid_response",
            ReflectFailure::InvalidPatch => "invalid_patch",
            ReflectFailure::AdvisorTimeout => "advisor_timeout",
            ReflectFailure::AdvisorError => "advisor_error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReflectOutcome {
    Patched {
        updated: PolicyRecord,
        patch: PolicyPatch,
        dropped_keys: Vec<String>,
    },
    Rejected(ReflectFailure),
}

impl ReflectOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ReflectOutcome::Patched { .. })
    }

    pub fn failure(&self) -> Option<ReflectFailure> {
        match self {
            ReflectOutcome::Patched { .. } => None,
            ReflectOutcome::Rejected(failure) => Some(*failure),
        }
    }

    /// `{ok:true, updated, patch}` or `{ok:false, error}`.
    pub fn to_wire_value(&self) -> Value {
        match self {
            ReflectOutcome::Patched { updated, patch, .. } => json!({
                "ok": true,
                "updated": updated.document,
                "patch": patch.to_value(),
            }),
            ReflectOutcome::Rejected(failure) => json!({
                "ok": false,
                "error": failure.as_str(),
            }),
        }
    }
}
