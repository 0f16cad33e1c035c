#![forbid(unsafe_code)]

pub mod advisor;
pub mod bandit;
pub mod perf;
pub mod policy_patch;
pub mod reward;
