#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::arm::{AgentArmStat, ArmCatalog, ArmId};
use wayfarer_kernel_contracts::metric::{MetricInput, METRIC_KIND_MOVEMENT_REWARD};
use wayfarer_kernel_contracts::policy::{PolicyDocument, PolicyRecordInput};
use wayfarer_kernel_contracts::UnixTimeMs;
use wayfarer_storage::store::{StorageError, WayfarerStore};

fn temp_journal(name: &str) -> (PathBuf, PathBuf) {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(1);
    let base = std::env::temp_dir().join(format!("wayfarer-journal-test-{name}-{suffix}"));
    let path = base.join("store.jsonl");
    (base, path)
}

fn bot() -> AgentId {
    AgentId::new("bot_a").unwrap()
}

#[test]
fn at_journal_db_01_reopen_rebuilds_every_table() {
    let (base, path) = temp_journal("reopen");
    {
        let mut s = WayfarerStore::open_with_journal(path.clone()).unwrap();
        for arm in ArmCatalog::default_v1().arms {
            s.insert_arm_if_absent(arm).unwrap();
        }
        let mut stat = AgentArmStat::fresh(bot(), ArmId(3));
        stat.n = 1;
        stat.reward_sum = 0.8;
        stat.reward_mean = 0.8;
        s.upsert_arm_stat(stat).unwrap();
        s.append_metric(
            MetricInput::v1(
                bot(),
                UnixTimeMs(5),
                METRIC_KIND_MOVEMENT_REWARD.to_string(),
                0.8,
                json!({}),
            )
            .unwrap(),
        )
        .unwrap();
        let row = s
            .append_policy(
                PolicyRecordInput::v1(bot(), PolicyDocument::default_v1(), UnixTimeMs(6))
                    .unwrap(),
            )
            .unwrap();
        s.set_current_policy(&bot(), row.policy_id).unwrap();
    }

    let mut s = WayfarerStore::open_with_journal(path.clone()).unwrap();
    assert_eq!(s.arms().len(), 4);
    assert_eq!(s.arm_stat(&bot(), ArmId(3)).unwrap().reward_mean, 0.8);
    assert_eq!(s.metrics().len(), 1);
    assert_eq!(s.current_policy(&bot()).unwrap().version, 1);

    // ids continue after the replayed rows
    let next = s
        .append_metric(
            MetricInput::v1(
                bot(),
                UnixTimeMs(7),
                METRIC_KIND_MOVEMENT_REWARD.to_string(),
                -1.1,
                json!(null),
            )
            .unwrap(),
        )
        .unwrap();
    assert_eq!(next.metric_id.0, 2);

    let snapshot = WayfarerStore::replay_from_journal(path).unwrap();
    assert_eq!(snapshot.metrics().len(), 2);
    assert_eq!(snapshot.metrics_for_agent(&bot()).len(), 2);
    assert!(snapshot.journal().is_none());
    let _ = fs::remove_dir_all(base);
}

#[test]
fn at_journal_db_02_failed_write_leaves_tables_untouched() {
    let (base, path) = temp_journal("failed-write");
    let mut s = WayfarerStore::open_with_journal(path).unwrap();
    fs::remove_dir_all(&base).unwrap();

    let out = s.append_metric(
        MetricInput::v1(
            bot(),
            UnixTimeMs(5),
            METRIC_KIND_MOVEMENT_REWARD.to_string(),
            0.1,
            json!({}),
        )
        .unwrap(),
    );
    assert!(matches!(out, Err(StorageError::Journal { .. })));
    assert!(s.metrics().is_empty());
}

#[test]
fn at_journal_db_03_corrupt_line_is_reported_with_line_number() {
    let (base, path) = temp_journal("corrupt");
    fs::create_dir_all(&base).unwrap();
    fs::write(&path, "{\"schema_version\":1,\"op\":{\"kind\":\"nope\"}}\n").unwrap();

    match WayfarerStore::open_with_journal(path) {
        Err(StorageError::Journal { reason, .. }) => assert!(reason.contains("line 1")),
        other => panic!("expected journal error, got {other:?}"),
    }
    let _ = fs::remove_dir_all(base);
}
