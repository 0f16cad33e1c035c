#![forbid(unsafe_code)]

pub mod advisor;
pub mod agent;
pub mod arm;
pub mod common;
pub mod metric;
pub mod policy;
pub mod reflection;
pub mod session;

pub use common::{validate_token, ContractViolation, SchemaVersion, UnixTimeMs, Validate};
