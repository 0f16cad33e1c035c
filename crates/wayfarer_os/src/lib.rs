#![forbid(unsafe_code)]

pub mod agent_locks;
pub mod arm_registry;
pub mod bandit;
pub mod bus;
pub mod clock;
pub mod metrics;
pub mod movement;
pub mod policy_store;
pub mod reflection;
pub mod scheduler;
pub mod shared_store;
pub mod subscription;
