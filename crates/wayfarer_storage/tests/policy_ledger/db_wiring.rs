#![forbid(unsafe_code)]

use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::policy::{PolicyDocument, PolicyId, PolicyRecordInput};
use wayfarer_kernel_contracts::UnixTimeMs;
use wayfarer_storage::repo::PolicyLedgerRepo;
use wayfarer_storage::store::{policy_content_sha256, StorageError, WayfarerStore};

fn agent(id: &str) -> AgentId {
    AgentId::new(id).unwrap()
}

fn doc(version: u32, preferred: &str) -> PolicyDocument {
    let mut d = PolicyDocument::default_v1();
    d.version = version;
    d.movement.preferred_arm = preferred.to_string();
    d
}

fn input(agent_id: &str, version: u32, preferred: &str, t: u64) -> PolicyRecordInput {
    PolicyRecordInput::v1(agent(agent_id), doc(version, preferred), UnixTimeMs(t)).unwrap()
}

#[test]
fn at_policy_db_01_append_then_point_current() {
    let mut s = WayfarerStore::new_in_memory();
    let bot = agent("bot_a");
    assert!(s.current_policy_row(&bot).is_none());

    let v1 = s.append_policy_row(input("bot_a", 1, "balanced", 10)).unwrap();
    s.set_current_policy_row(&bot, v1.policy_id).unwrap();
    let v2 = s.append_policy_row(input("bot_a", 2, "aggressive", 20)).unwrap();
    // appended but not yet current
    assert_eq!(s.current_policy_row(&bot).unwrap().version, 1);
    s.set_current_policy_row(&bot, v2.policy_id).unwrap();

    let current = s.current_policy_row(&bot).unwrap();
    assert_eq!(current.version, 2);
    assert_eq!(current.document.movement.preferred_arm, "aggressive");
    assert_eq!(
        current.content_sha256,
        policy_content_sha256(&current.document).unwrap()
    );
    assert_eq!(s.policy_rows_for_agent(&bot).len(), 2);
}

#[test]
fn at_policy_db_02_version_must_exceed_current() {
    let mut s = WayfarerStore::new_in_memory();
    let bot = agent("bot_a");
    let v3 = s.append_policy_row(input("bot_a", 3, "balanced", 10)).unwrap();
    s.set_current_policy_row(&bot, v3.policy_id).unwrap();

    for stale in [1, 3] {
        assert!(matches!(
            s.append_policy_row(input("bot_a", stale, "scout", 11)),
            Err(StorageError::ContractViolation(_))
        ));
    }
    assert_eq!(s.policy_rows_for_agent(&bot).len(), 1);
}

#[test]
fn at_policy_db_03_current_pointer_requires_owned_row() {
    let mut s = WayfarerStore::new_in_memory();
    let a_row = s.append_policy_row(input("bot_a", 1, "balanced", 10)).unwrap();

    assert!(matches!(
        s.set_current_policy_row(&agent("bot_b"), a_row.policy_id),
        Err(StorageError::ForeignKeyViolation { .. })
    ));
    assert!(matches!(
        s.set_current_policy_row(&agent("bot_a"), PolicyId(77)),
        Err(StorageError::ForeignKeyViolation { .. })
    ));
    assert!(s.current_policy_row(&agent("bot_b")).is_none());
}

#[test]
fn at_policy_db_04_agents_are_isolated() {
    let mut s = WayfarerStore::new_in_memory();
    let a = s.append_policy_row(input("bot_a", 1, "scout", 10)).unwrap();
    let b = s.append_policy_row(input("bot_b", 1, "conservative", 10)).unwrap();
    s.set_current_policy_row(&agent("bot_a"), a.policy_id).unwrap();
    s.set_current_policy_row(&agent("bot_b"), b.policy_id).unwrap();

    assert_eq!(
        s.current_policy_row(&agent("bot_a"))
            .unwrap()
            .document
            .movement
            .preferred_arm,
        "scout"
    );
    assert_eq!(
        s.current_policy_row(&agent("bot_b"))
            .unwrap()
            .document
            .movement
            .preferred_arm,
        "conservative"
    );
}

#[test]
fn at_policy_db_05_ledger_rows_are_immutable() {
    let mut s = WayfarerStore::new_in_memory();
    let row = s.append_policy_row(input("bot_a", 1, "balanced", 10)).unwrap();
    assert!(matches!(
        s.attempt_overwrite_policy_ledger_row(row.policy_id),
        Err(StorageError::AppendOnlyViolation { .. })
    ));
}
