#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use wayfarer_storage::store::{StorageError, WayfarerStore};

/// One store handle shared by every component; each guard is one critical section.
pub type SharedStore = Arc<Mutex<WayfarerStore>>;

pub fn shared_store(store: WayfarerStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

pub fn lock_store(store: &SharedStore) -> Result<MutexGuard<'_, WayfarerStore>, StorageError> {
    store.lock().map_err(|_| StorageError::Unavailable {
        reason: "store lock poisoned",
    })
}
