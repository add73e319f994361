//! Loads the in-memory caches from the stores.

use crate::error::SyncResult;
use crate::store::Store;
use dualsync_core::{FkValidationCache, LookupCache, ReferenceKey, SyncDescriptor};
use tracing::{debug, warn};

/// Loads every referenced key set from the cloud store.
///
/// Takes the cache by value and returns it, so the caller threads one
/// explicit cache through a run.
pub async fn load_fk_cache<S: Store>(
    cloud: &S,
    cache: FkValidationCache,
) -> SyncResult<FkValidationCache> {
    let references = cache.references();
    load_references(cloud, cache, references).await
}

/// Reloads the key sets that live in `table`.
///
/// Called after a reference table is written, before any table that
/// references it is validated.
pub async fn reload_fk_cache<S: Store>(
    cloud: &S,
    cache: FkValidationCache,
    table: &str,
) -> SyncResult<FkValidationCache> {
    let references = cache.references_to(table);
    if references.is_empty() {
        return Ok(cache);
    }
    load_references(cloud, cache, references).await
}

async fn load_references<S: Store>(
    cloud: &S,
    mut cache: FkValidationCache,
    references: Vec<ReferenceKey>,
) -> SyncResult<FkValidationCache> {
    for reference in references {
        let values = match cloud.columns(&reference.table).await? {
            Some(columns) if columns.iter().any(|c| c.name == reference.column) => {
                cloud
                    .distinct_values(&reference.table, &reference.column)
                    .await?
            }
            _ => {
                warn!(
                    table = %reference.table,
                    column = %reference.column,
                    "referenced column missing in cloud store; every dependent row will be rejected"
                );
                Vec::new()
            }
        };
        debug!(table = %reference.table, column = %reference.column, keys = values.len(), "loaded key set");
        cache.set_keys(reference, values);
    }
    Ok(cache)
}

/// Materialises every lookup of `descriptor` from the origin store.
pub async fn build_lookup_cache<S: Store>(
    origin: &S,
    descriptor: &SyncDescriptor,
) -> SyncResult<LookupCache> {
    let mut cache = LookupCache::new();
    for rule in &descriptor.lookups {
        let pairs = origin
            .lookup_pairs(&rule.from_table, &rule.match_column, &rule.select_column)
            .await?;
        debug!(
            table = %descriptor.name,
            column = %rule.target_column,
            from = %rule.from_table,
            entries = pairs.len(),
            "materialised lookup"
        );
        cache.insert(rule.clone(), pairs);
    }
    Ok(cache)
}
