#![forbid(unsafe_code)]

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wayfarer_kernel_contracts::agent::AgentId;
use wayfarer_kernel_contracts::arm::{AgentArmStat, MovementArm};
use wayfarer_kernel_contracts::metric::MetricRecord;
use wayfarer_kernel_contracts::policy::{PolicyId, PolicyRecord};

use crate::store::StorageError;

pub const STORE_JOURNAL_SCHEMA_VERSION: u32 = 1;
pub const STORE_JOURNAL_DEFAULT_RELATIVE_PATH: &str = ".wayfarer/store.jsonl";

/// `$HOME/.wayfarer/store.jsonl`, or the same path relative to the working directory.
pub fn default_store_journal_path() -> PathBuf {
    store_journal_path_under_home(std::env::var("HOME").ok().as_deref())
}

pub fn store_journal_path_under_home(home: Option<&str>) -> PathBuf {
    match home.map(str::trim).filter(|home| !home.is_empty()) {
        Some(home) => PathBuf::from(home).join(STORE_JOURNAL_DEFAULT_RELATIVE_PATH),
        None => PathBuf::from(STORE_JOURNAL_DEFAULT_RELATIVE_PATH),
    }
}

/// One durable statement. Replaying every op in file order rebuilds the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreJournalOp {
    ArmInsert {
        arm: MovementArm,
    },
    ArmStatUpsert {
        stat: AgentArmStat,
    },
    MetricAppend {
        row: MetricRecord,
    },
    PolicyAppend {
        row: PolicyRecord,
    },
    PolicyCurrentSet {
        agent_id: AgentId,
        policy_id: PolicyId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoreJournalEntry {
    schema_version: u32,
    op: StoreJournalOp,
}

/// Append-only JSON-lines journal; each line is synced before the call returns.
#[derive(Debug, Clone)]
pub struct StoreJournal {
    path: PathBuf,
}

impl StoreJournal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ensure_ready(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|err| {
                    self.error(format!("failed to create journal directory: {err}"))
                })?;
            }
        }
        if !self.path.exists() {
            File::create(&self.path)
                .map_err(|err| self.error(format!("failed to create journal: {err}")))?;
        }
        Ok(())
    }

    pub fn append(&self, op: &StoreJournalOp) -> Result<(), StorageError> {
        let entry = StoreJournalEntry {
            schema_version: STORE_JOURNAL_SCHEMA_VERSION,
            op: op.clone(),
        };
        let json = serde_json::to_string(&entry)
            .map_err(|err| self.error(format!("failed to encode journal entry: {err}")))?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|err| self.error(format!("failed opening journal for append: {err}")))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_data())
            .map_err(|err| self.error(format!("failed writing journal: {err}")))?;
        Ok(())
    }

    pub fn read_ops(&self) -> Result<Vec<StoreJournalOp>, StorageError> {
        let file = File::open(&self.path)
            .map_err(|err| self.error(format!("failed to open journal: {err}")))?;
        let mut ops = Vec::new();
        for (line_no, line_result) in BufReader::new(file).lines().enumerate() {
            let line = line_result.map_err(|err| {
                self.error(format!("failed reading journal at line {}: {err}", line_no + 1))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: StoreJournalEntry = serde_json::from_str(&line).map_err(|err| {
                self.error(format!("failed parsing journal at line {}: {err}", line_no + 1))
            })?;
            if entry.schema_version != STORE_JOURNAL_SCHEMA_VERSION {
                return Err(self.error(format!(
                    "unsupported journal schema_version={} at line {}",
                    entry.schema_version,
                    line_no + 1
                )));
            }
            ops.push(entry.op);
        }
        Ok(ops)
    }

    fn error(&self, reason: String) -> StorageError {
        StorageError::Journal {
            path: self.path.display().to_string(),
            reason,
        }
    }
}
