#![forbid(unsafe_code)]

use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::arm::{AgentArmStat, ArmCatalog, ArmId, ArmParameters, MovementArm};
use wayfarer_kernel_contracts::UnixTimeMs;
use wayfarer_storage::repo::{ArmCatalogRepo, ArmStatRepo};
use wayfarer_storage::store::{StorageError, WayfarerStore};

fn agent(id: &str) -> AgentId {
    AgentId::new(id).unwrap()
}

fn seeded() -> WayfarerStore {
    let mut s = WayfarerStore::new_in_memory();
    for arm in ArmCatalog::default_v1().arms {
        assert!(s.insert_arm_row_if_absent(arm).unwrap());
    }
    s
}

#[test]
fn at_arm_db_01_seed_is_idempotent_and_ordered() {
    let mut s = seeded();
    for arm in ArmCatalog::default_v1().arms {
        assert!(!s.insert_arm_row_if_absent(arm).unwrap());
    }
    let ids: Vec<u32> = s.arm_rows().iter().map(|a| a.arm_id.0).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(s.arm_row_by_name("aggressive").unwrap().arm_id, ArmId(3));
    assert!(s.arm_row(ArmId(99)).is_none());
}

#[test]
fn at_arm_db_02_existing_row_wins_on_reseed() {
    let mut s = seeded();
    let renamed = MovementArm::v1(ArmId(1), "careful".to_string(), ArmParameters::new()).unwrap();
    assert!(!s.insert_arm_row_if_absent(renamed).unwrap());
    assert_eq!(s.arm_row(ArmId(1)).unwrap().name, "conservative");
}

#[test]
fn at_arm_db_03_duplicate_name_under_new_id_is_rejected() {
    let mut s = seeded();
    let dup = MovementArm::v1(ArmId(9), "scout".to_string(), ArmParameters::new()).unwrap();
    assert!(matches!(
        s.insert_arm_row_if_absent(dup),
        Err(StorageError::DuplicateKey { .. })
    ));
    assert_eq!(s.arm_rows().len(), 4);
}

#[test]
fn at_arm_db_04_stat_requires_known_arm() {
    let mut s = seeded();
    let stat = AgentArmStat::fresh(agent("bot_a"), ArmId(42));
    assert!(matches!(
        s.upsert_arm_stat_row(stat),
        Err(StorageError::ForeignKeyViolation { .. })
    ));
}

#[test]
fn at_arm_db_05_stats_are_isolated_per_agent() {
    let mut s = seeded();
    let mut a = AgentArmStat::fresh(agent("bot_a"), ArmId(2));
    a.n = 2;
    a.reward_sum = 1.0;
    a.reward_mean = 0.5;
    a.last_selected_at = Some(UnixTimeMs(10));
    s.upsert_arm_stat_row(a.clone()).unwrap();
    s.upsert_arm_stat_row(AgentArmStat::fresh(agent("bot_b"), ArmId(2)))
        .unwrap();

    assert_eq!(s.arm_stat_row(&agent("bot_a"), ArmId(2)), Some(&a));
    assert_eq!(s.arm_stat_row(&agent("bot_b"), ArmId(2)).unwrap().n, 0);
    assert_eq!(s.arm_stat_rows_for_agent(&agent("bot_a")).len(), 1);
    assert!(s.arm_stat_row(&agent("bot_a"), ArmId(1)).is_none());
}

#[test]
fn at_arm_db_06_pull_count_never_decreases() {
    let mut s = seeded();
    let mut stat = AgentArmStat::fresh(agent("bot_a"), ArmId(1));
    stat.n = 3;
    stat.reward_sum = 1.5;
    stat.reward_mean = 0.5;
    s.upsert_arm_stat_row(stat).unwrap();

    let rolled_back = AgentArmStat::fresh(agent("bot_a"), ArmId(1));
    assert!(matches!(
        s.upsert_arm_stat_row(rolled_back),
        Err(StorageError::ContractViolation(_))
    ));
    assert_eq!(s.arm_stat_row(&agent("bot_a"), ArmId(1)).unwrap().n, 3);
}
