//! Watermark persistence.
//!
//! One metadata table per direction, both kept in the cloud store. Tables
//! and rows are provisioned on first use, so a missing table or row always
//! reads as a fresh epoch watermark.

use crate::config::EngineConfig;
use crate::error::SyncResult;
use crate::store::{Store, StoreTransaction};
use chrono::NaiveDateTime;
use dualsync_core::{Direction, Watermark};
use tracing::{debug, warn};

/// Watermark store for one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataStore {
    direction: Direction,
    table: String,
}

impl MetadataStore {
    /// Creates a metadata store backed by `table`.
    pub fn new(direction: Direction, table: impl Into<String>) -> Self {
        Self {
            direction,
            table: table.into(),
        }
    }

    /// The configured store for `direction`.
    pub fn for_direction(direction: Direction, config: &EngineConfig) -> Self {
        match direction {
            Direction::Forward => Self::new(direction, config.forward_metadata_table.as_str()),
            Direction::Reverse => Self::new(direction, config.reverse_metadata_table.as_str()),
        }
    }

    /// Direction served.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Backing table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the table if absent and seeds an epoch row per name.
    pub async fn bootstrap<S: Store>(&self, store: &S, names: &[String]) -> SyncResult<()> {
        store.ensure_metadata_table(&self.table).await?;
        store.seed_watermarks(&self.table, names).await?;
        debug!(direction = %self.direction, table = %self.table, tables = names.len(), "metadata ready");
        Ok(())
    }

    /// Current watermark for `name`, bootstrapping when absent.
    pub async fn load<S: Store>(&self, store: &S, name: &str) -> SyncResult<Watermark> {
        match store.read_watermark(&self.table, name).await? {
            Some(watermark) => Ok(watermark),
            None => {
                debug!(direction = %self.direction, table = name, "no watermark, starting at epoch");
                Ok(Watermark::bootstrap(name))
            }
        }
    }

    /// Every stored watermark.
    pub async fn list<S: Store>(&self, store: &S) -> SyncResult<Vec<Watermark>> {
        store.read_watermarks(&self.table).await
    }

    /// Persists a successful sync outside any transaction.
    pub async fn record_success<S: Store>(
        &self,
        store: &S,
        mut watermark: Watermark,
        observed: Option<NaiveDateTime>,
        records: i64,
        now: NaiveDateTime,
    ) -> SyncResult<Watermark> {
        watermark.advance(observed, records, now);
        self.persist(store, &watermark).await?;
        Ok(watermark)
    }

    /// Persists a successful sync as part of `txn`.
    pub async fn record_success_in<T: StoreTransaction>(
        &self,
        txn: &mut T,
        mut watermark: Watermark,
        observed: Option<NaiveDateTime>,
        records: i64,
        now: NaiveDateTime,
    ) -> SyncResult<Watermark> {
        watermark.advance(observed, records, now);
        txn.write_watermark(&self.table, &watermark).await?;
        Ok(watermark)
    }

    /// Records a failed sync; the cursor is untouched.
    ///
    /// Best effort: a failure to write is logged, not returned, since the
    /// caller is already reporting the original error.
    pub async fn record_failure<S: Store>(
        &self,
        store: &S,
        name: &str,
        message: &str,
        now: NaiveDateTime,
    ) {
        let result = async {
            let mut watermark = self.load(store, name).await?;
            watermark.fail(message, now);
            self.persist(store, &watermark).await
        }
        .await;
        if let Err(e) = result {
            warn!(direction = %self.direction, table = name, error = %e, "cannot record failure status");
        }
    }

    async fn persist<S: Store>(&self, store: &S, watermark: &Watermark) -> SyncResult<()> {
        store.ensure_metadata_table(&self.table).await?;
        store.write_watermark(&self.table, watermark).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::Duration;
    use dualsync_core::{epoch, SyncStatus};

    #[tokio::test]
    async fn bootstraps_and_reads() {
        let cloud = MemoryStore::new("cloud");
        let meta = MetadataStore::new(Direction::Reverse, "reverse_sync_metadata");

        // Missing table reads as epoch.
        let wm = meta.load(&cloud, "visits").await.unwrap();
        assert_eq!(wm.last_sync_timestamp, epoch());

        meta.bootstrap(&cloud, &["visits".to_string(), "photos".to_string()])
            .await
            .unwrap();
        let all = meta.list(&cloud).await.unwrap();
        assert_eq!(
            all.iter().map(|w| w.table_name.as_str()).collect::<Vec<_>>(),
            vec!["photos", "visits"]
        );
    }

    #[tokio::test]
    async fn failure_keeps_cursor() {
        let cloud = MemoryStore::new("cloud");
        let meta = MetadataStore::new(Direction::Forward, "sync_metadata");
        let t1 = epoch() + Duration::days(1);

        let wm = meta.load(&cloud, "orders").await.unwrap();
        meta.record_success(&cloud, wm, Some(t1), 4, t1).await.unwrap();
        meta.record_failure(&cloud, "orders", "boom", t1 + Duration::hours(1))
            .await;

        let wm = meta.load(&cloud, "orders").await.unwrap();
        assert_eq!(wm.last_sync_timestamp, t1);
        assert_eq!(wm.status, SyncStatus::Error);
        assert_eq!(wm.error_message.as_deref(), Some("boom"));
    }
}
