//! Task id allocation.

use std::collections::HashSet;

use tasker_store::{StoreError, TaskStore};
use tracing::debug;

use crate::NamingConfig;

/// First `prefix + n + suffix` with `n >= offset` that is not in `existing`.
pub fn next_free_id(existing: &HashSet<String>, naming: &NamingConfig) -> String {
    let mut counter = naming.offset;
    loop {
        let candidate = format!("{}{}{}", naming.prefix, counter, naming.suffix);
        if !existing.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Allocate an id that is absent from the store's current listing.
///
/// Not atomic: two allocations against the same snapshot can return the same id.
/// Callers rely on `create` reporting `AlreadyExists` to detect that.
pub async fn allocate_id(
    store: &dyn TaskStore,
    naming: &NamingConfig,
) -> Result<String, StoreError> {
    let existing: HashSet<String> = store.list().await?.into_iter().collect();
    let id = next_free_id(&existing, naming);
    debug!(id = %id, taken = existing.len(), "allocated task id");
    Ok(id)
}
