#![forbid(unsafe_code)]

use std::sync::Arc;

use serde_json::Value;
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::metric::{MetricInput, MetricRecord};
use wayfarer_storage::store::StorageError;

use crate::bus::{BusEvent, MessageBus, TOPIC_METRICS};
use crate::clock::Clock;
use crate::shared_store::{lock_store, SharedStore};

/// Sole writer of the metrics ledger.
#[derive(Clone)]
pub struct MetricsRecorder {
    store: SharedStore,
    bus: MessageBus,
    clock: Arc<dyn Clock>,
}

impl MetricsRecorder {
    pub fn new(store: SharedStore, bus: MessageBus, clock: Arc<dyn Clock>) -> Self {
        Self { store, bus, clock }
    }

    /// Appends one observation stamped with the current time, then publishes it on `metrics`.
    pub fn record(
        &self,
        agent_id: &AgentId,
        kind: &str,
        value: f64,
        context: Value,
    ) -> Result<MetricRecord, StorageError> {
        let input = MetricInput::v1(
            agent_id.clone(),
            self.clock.now(),
            kind.to_string(),
            value,
            context,
        )?;
        let row = lock_store(&self.store)?.append_metric(input)?;
        self.bus
            .publish(TOPIC_METRICS, &BusEvent::Metric(row.clone()));
        Ok(row)
    }

    /// Rows for `agent_id` recorded in the trailing `window_ms`.
    pub fn recent(
        &self,
        agent_id: &AgentId,
        window_ms: u64,
    ) -> Result<Vec<MetricRecord>, StorageError> {
        let now = self.clock.now();
        let store = lock_store(&self.store)?;
        Ok(store
            .metrics_in_range(agent_id, now.saturating_sub_ms(window_ms), now)
            .into_iter()
            .cloned()
            .collect())
    }
}
