#![forbid(unsafe_code)]

use serde_json::json;
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::metric::{MetricId, MetricInput, METRIC_KIND_MOVEMENT_REWARD};
use wayfarer_kernel_contracts::UnixTimeMs;
use wayfarer_storage::repo::MetricLedgerRepo;
use wayfarer_storage::store::{StorageError, WayfarerStore};

fn reward(agent: &str, t: u64, value: f64) -> MetricInput {
    MetricInput::v1(
        AgentId::new(agent).unwrap(),
        UnixTimeMs(t),
        METRIC_KIND_MOVEMENT_REWARD.to_string(),
        value,
        json!({ "armId": 2 }),
    )
    .unwrap()
}

#[test]
fn at_metric_db_01_ids_are_assigned_in_append_order() {
    let mut s = WayfarerStore::new_in_memory();
    let a = s.append_metric_row(reward("bot_a", 10, 0.4)).unwrap();
    let b = s.append_metric_row(reward("bot_a", 11, -1.1)).unwrap();
    assert_eq!(a.metric_id, MetricId(1));
    assert_eq!(b.metric_id, MetricId(2));
    assert_eq!(s.metric_rows().len(), 2);
    assert_eq!(s.metric_rows()[1].value, -1.1);
    assert_eq!(s.metric_rows()[0].context["armId"], 2);
}

#[test]
fn at_metric_db_02_range_is_inclusive_and_agent_scoped() {
    let mut s = WayfarerStore::new_in_memory();
    s.append_metric_row(reward("bot_a", 100, 0.1)).unwrap();
    s.append_metric_row(reward("bot_a", 200, 0.2)).unwrap();
    s.append_metric_row(reward("bot_b", 150, 0.3)).unwrap();
    s.append_metric_row(reward("bot_a", 300, 0.4)).unwrap();

    let agent = AgentId::new("bot_a").unwrap();
    let rows = s.metric_rows_in_range(&agent, UnixTimeMs(100), UnixTimeMs(200));
    let values: Vec<f64> = rows.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![0.1, 0.2]);
    assert!(s
        .metric_rows_in_range(&agent, UnixTimeMs(301), UnixTimeMs(400))
        .is_empty());
}

#[test]
fn at_metric_db_03_overwrite_is_refused() {
    let mut s = WayfarerStore::new_in_memory();
    let row = s.append_metric_row(reward("bot_a", 10, 0.4)).unwrap();
    assert!(matches!(
        s.attempt_overwrite_metric_row(row.metric_id),
        Err(StorageError::AppendOnlyViolation { .. })
    ));
    assert_eq!(s.metric_rows()[0].value, 0.4);
}

#[test]
fn at_metric_db_04_invalid_input_is_rejected_without_append() {
    let mut s = WayfarerStore::new_in_memory();
    let mut bad = reward("bot_a", 10, 0.4);
    bad.value = f64::NAN;
    assert!(matches!(
        s.append_metric_row(bad),
        Err(StorageError::ContractViolation(_))
    ));
    let mut bad_ctx = reward("bot_a", 10, 0.4);
    bad_ctx.context = json!([1, 2]);
    assert!(s.append_metric_row(bad_ctx).is_err());
    assert!(s.metric_rows().is_empty());
}

#[test]
fn at_metric_db_05_agent_index_follows_interleaved_appends() {
    let mut s = WayfarerStore::new_in_memory();
    for t in 0..30u64 {
        let agent = if t % 3 == 0 { "bot_b" } else { "bot_a" };
        s.append_metric_row(reward(agent, t, t as f64)).unwrap();
    }
    let mut bad = reward("bot_c", 31, 0.0);
    bad.value = f64::INFINITY;
    assert!(s.append_metric_row(bad).is_err());

    let bot_b = AgentId::new("bot_b").unwrap();
    let ids: Vec<u64> = s
        .metric_rows_for_agent(&bot_b)
        .iter()
        .map(|r| r.metric_id.0)
        .collect();
    assert_eq!(ids, (0..10).map(|i| i * 3 + 1).collect::<Vec<u64>>());
    assert_eq!(s.metric_rows_for_agent(&AgentId::new("bot_a").unwrap()).len(), 20);
    assert!(s.metric_rows_for_agent(&AgentId::new("bot_c").unwrap()).is_empty());

    let window = s.metric_rows_in_range(&bot_b, UnixTimeMs(10), UnixTimeMs(20));
    let values: Vec<f64> = window.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![12.0, 15.0, 18.0]);
}
