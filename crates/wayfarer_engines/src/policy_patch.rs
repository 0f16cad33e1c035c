#![forbid(unsafe_code)]

use serde_json::{Map, Value};
use wayfarer_kernel_contracts::policy::{
    PolicyDocument, PolicyPatch, SKILL_WEIGHT_MAX, SKILL_WEIGHT_MIN, SMALLTALK_RATE_MAX,
    SMALLTALK_RATE_MIN,
};
use wayfarer_kernel_contracts::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchSchemaError {
    #[error("merged policy does not fit the policy schema: {0}")]
    Shape(String),
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

/// Objects merge key by key; everything else in `patch` replaces the base value.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => merge_maps(base_map, patch_map),
        (base, patch) => *base = patch.clone(),
    }
}

fn merge_maps(base: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, patch_value) in patch {
        let both_objects =
            patch_value.is_object() && base.get(key).map(Value::is_object).unwrap_or(false);
        match base.get_mut(key) {
            Some(existing) if both_objects => deep_merge(existing, patch_value),
            _ => {
                base.insert(key.clone(), patch_value.clone());
            }
        }
    }
}

fn coerce_and_clamp(value: &Value, min: f64, max: f64) -> Value {
    let n = value.as_f64().filter(|n| n.is_finite()).unwrap_or(0.0);
    Value::from(n.clamp(min, max))
}

/// Clamps skill weights and the smalltalk rate in a policy-shaped JSON value.
/// Non-numeric entries become 0 before clamping.
pub fn clamp_policy_value(doc: &mut Value) {
    if let Some(weights) = doc.get_mut("skillWeights").and_then(Value::as_object_mut) {
        for weight in weights.values_mut() {
            *weight = coerce_and_clamp(weight, SKILL_WEIGHT_MIN, SKILL_WEIGHT_MAX);
        }
    }
    if let Some(chat) = doc.get_mut("chat").and_then(Value::as_object_mut) {
        if let Some(rate) = chat.get_mut("smalltalkRate") {
            *rate = coerce_and_clamp(rate, SMALLTALK_RATE_MIN, SMALLTALK_RATE_MAX);
        }
    }
}

/// Merge, clamp, and re-type. `version` is carried over from `current`.
pub fn merge_patch(
    current: &PolicyDocument,
    patch: &PolicyPatch,
) -> Result<PolicyDocument, PatchSchemaError> {
    let mut value =
        serde_json::to_value(current).map_err(|err| PatchSchemaError::Shape(err.to_string()))?;
    deep_merge(&mut value, &patch.to_value());
    clamp_policy_value(&mut value);
    let mut merged: PolicyDocument =
        serde_json::from_value(value).map_err(|err| PatchSchemaError::Shape(err.to_string()))?;
    merged.version = current.version;
    merged.validate()?;
    Ok(merged)
}
