#![forbid(unsafe_code)]

use wayfarer_kernel_contracts::arm::{ArmCatalog, ArmId, MovementArm};
use wayfarer_kernel_contracts::Validate;
use wayfarer_storage::store::StorageError;

use crate::shared_store::{lock_store, SharedStore};

/// Read-only view of the seeded arm catalog.
#[derive(Clone)]
pub struct ArmRegistry {
    store: SharedStore,
}

impl ArmRegistry {
    /// Inserts every catalog arm that is not stored yet. Stored rows are never rewritten.
    pub fn seed(store: SharedStore, catalog: &ArmCatalog) -> Result<Self, StorageError> {
        catalog.validate()?;
        let mut inserted = 0usize;
        {
            let mut guard = lock_store(&store)?;
            for arm in &catalog.arms {
                if guard.insert_arm_if_absent(arm.clone())? {
                    inserted += 1;
                }
            }
        }
        tracing::info!(
            catalog_version = catalog.catalog_version,
            arms = catalog.arms.len(),
            inserted,
            "arm catalog seeded"
        );
        Ok(Self { store })
    }

    pub fn arms(&self) -> Result<Vec<MovementArm>, StorageError> {
        Ok(lock_store(&self.store)?
            .arms()
            .into_iter()
            .cloned()
            .collect())
    }

    pub fn arm(&self, arm_id: ArmId) -> Result<Option<MovementArm>, StorageError> {
        Ok(lock_store(&self.store)?.arm(arm_id).cloned())
    }

    pub fn arm_by_name(&self, name: &str) -> Result<Option<MovementArm>, StorageError> {
        Ok(lock_store(&self.store)?.arm_by_name(name).cloned())
    }
}
