//! Commit strategies: how staged rows reach the target table.

use crate::error::SyncResult;
use crate::store::{StagingTable, StoreTransaction};
use dualsync_core::{Classification, PkReliability, SyncDescriptor};
use std::fmt;
use std::future::Future;
use tracing::debug;

/// Which strategy a table uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    /// Upsert by primary key.
    Upsert,
    /// Delete origin-authored rows, then insert everything staged.
    Replace,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Upsert => f.write_str("upsert"),
            StrategyKind::Replace => f.write_str("replace"),
        }
    }
}

/// Everything a strategy needs to apply one staged batch.
#[derive(Debug, Clone, Copy)]
pub struct CommitPlan<'a> {
    /// The loaded staging table.
    pub staging: &'a StagingTable,
    /// Columns carried by the staged rows, in target order.
    pub columns: &'a [String],
    /// Target primary key.
    pub primary_key: &'a [String],
    /// Origin marker column, if the target has one.
    pub marker_column: Option<&'a str>,
}

/// Row counts produced by applying a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Rows inserted or updated.
    pub written: u64,
    /// Rows deleted.
    pub deleted: u64,
}

/// Applies a staged batch to its target inside an open transaction.
pub trait CommitStrategy: Send + Sync {
    /// Strategy identity, for reports.
    fn kind(&self) -> StrategyKind;

    /// Applies the batch.
    fn apply<T: StoreTransaction>(
        &self,
        txn: &mut T,
        plan: CommitPlan<'_>,
    ) -> impl Future<Output = SyncResult<ApplyOutcome>> + Send;
}

/// `INSERT … ON CONFLICT (pk) DO UPDATE`, limited to origin-owned rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertStrategy;

impl CommitStrategy for UpsertStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Upsert
    }

    async fn apply<T: StoreTransaction>(
        &self,
        txn: &mut T,
        plan: CommitPlan<'_>,
    ) -> SyncResult<ApplyOutcome> {
        let written = txn
            .upsert_from_staging(plan.staging, plan.columns, plan.primary_key, plan.marker_column)
            .await?;
        debug!(table = %plan.staging.target, written, "upserted staged rows");
        Ok(ApplyOutcome {
            written,
            deleted: 0,
        })
    }
}

/// Delete origin-owned rows, then insert the whole staged batch.
///
/// Surrogate keys of origin-authored rows are reassigned on every run.
/// Rows authored on the cloud side survive because the delete skips them.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplaceStrategy;

impl CommitStrategy for ReplaceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Replace
    }

    async fn apply<T: StoreTransaction>(
        &self,
        txn: &mut T,
        plan: CommitPlan<'_>,
    ) -> SyncResult<ApplyOutcome> {
        let deleted = txn
            .delete_origin_rows(&plan.staging.target, plan.marker_column)
            .await?;
        let written = txn.insert_from_staging(plan.staging).await?;
        debug!(table = %plan.staging.target, deleted, written, "replaced origin rows");
        Ok(ApplyOutcome { written, deleted })
    }
}

/// The strategy selected for a descriptor.
#[derive(Debug, Clone, Copy)]
pub enum Strategy {
    /// See [`UpsertStrategy`].
    Upsert(UpsertStrategy),
    /// See [`ReplaceStrategy`].
    Replace(ReplaceStrategy),
}

impl Strategy {
    /// Reference tables and unstable-key tables are replaced; stable
    /// transactional tables are upserted.
    pub fn for_descriptor(descriptor: &SyncDescriptor) -> Self {
        match (descriptor.classification, descriptor.pk_reliability) {
            (Classification::Transactional, PkReliability::Stable) => {
                Strategy::Upsert(UpsertStrategy)
            }
            _ => Strategy::Replace(ReplaceStrategy),
        }
    }
}

impl CommitStrategy for Strategy {
    fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Upsert(s) => s.kind(),
            Strategy::Replace(s) => s.kind(),
        }
    }

    async fn apply<T: StoreTransaction>(
        &self,
        txn: &mut T,
        plan: CommitPlan<'_>,
    ) -> SyncResult<ApplyOutcome> {
        match self {
            Strategy::Upsert(s) => s.apply(txn, plan).await,
            Strategy::Replace(s) => s.apply(txn, plan).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, TableDef};
    use crate::store::Store;
    use dualsync_core::record;

    #[test]
    fn selection() {
        let kind = |d: &SyncDescriptor| Strategy::for_descriptor(d).kind();
        assert_eq!(kind(&SyncDescriptor::transactional("orders")), StrategyKind::Upsert);
        assert_eq!(
            kind(&SyncDescriptor::transactional("lines").unstable_pk()),
            StrategyKind::Replace
        );
        assert_eq!(kind(&SyncDescriptor::reference("units")), StrategyKind::Replace);
    }

    #[tokio::test]
    async fn replace_without_marker_clears_table() {
        let store = MemoryStore::new("cloud");
        store.create_table(
            TableDef::new("units")
                .required("code", "text")
                .column("label", "text")
                .primary_key(["code"]),
        );
        store.insert_row("units", record! { "code" => "kg", "label" => "old" }).unwrap();
        store.insert_row("units", record! { "code" => "gone", "label" => "x" }).unwrap();

        let mut txn = store.begin().await.unwrap();
        let staging = txn.create_staging("units").await.unwrap();
        txn.stage_rows(&staging, &[record! { "code" => "kg", "label" => "kilogram" }], 100)
            .await
            .unwrap();
        let columns = vec!["code".to_string(), "label".to_string()];
        let key = vec!["code".to_string()];
        let outcome = Strategy::for_descriptor(&SyncDescriptor::reference("units"))
            .apply(
                &mut txn,
                CommitPlan {
                    staging: &staging,
                    columns: &columns,
                    primary_key: &key,
                    marker_column: None,
                },
            )
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(outcome, ApplyOutcome { written: 1, deleted: 2 });
        assert_eq!(store.row_count("units"), 1);
        assert!(store.find("units", "label", "kilogram").is_some());
    }
}
