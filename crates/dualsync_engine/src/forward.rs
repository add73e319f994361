//! Forward sync: origin to cloud.
//!
//! One table at a time runs `Extract → Transform → Validate → Stage →
//! Commit → AdvanceWatermark`. Staging, applying and the watermark write
//! share a single cloud transaction, so a failed table leaves both the
//! target and its watermark exactly as they were.

use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::loader::build_lookup_cache;
use crate::metadata::MetadataStore;
use crate::report::{
    AtStage, Extraction, FullReason, StageResult, SyncMode, TableFailure, TableReport, TableStage,
};
use crate::store::{FetchRequest, Store, StoreTransaction};
use crate::strategy::{ApplyOutcome, CommitPlan, CommitStrategy, Strategy, StrategyKind};
use chrono::{NaiveDateTime, Utc};
use dualsync_core::{
    find_column, max_timestamp, Classification, ColumnInfo, Direction, FkValidationCache,
    PkReliability, Record, SyncDescriptor, Transformer, Watermark,
};
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Drives forward syncs of single tables.
#[derive(Debug)]
pub struct ForwardSync<'a, O, C> {
    origin: &'a O,
    cloud: &'a C,
    config: &'a EngineConfig,
    metadata: &'a MetadataStore,
}

struct PreparedBatch<'a> {
    target: &'a str,
    rows: Vec<Record>,
    columns: Vec<String>,
    primary_key: Vec<String>,
    marker_column: Option<&'a str>,
    observed: Option<NaiveDateTime>,
}

impl<'a, O: Store, C: Store> ForwardSync<'a, O, C> {
    /// Creates a forward driver over the two stores.
    pub fn new(
        origin: &'a O,
        cloud: &'a C,
        config: &'a EngineConfig,
        metadata: &'a MetadataStore,
    ) -> Self {
        Self {
            origin,
            cloud,
            config,
            metadata,
        }
    }

    /// Syncs one table.
    ///
    /// On failure the error status is written to the table's watermark row
    /// (unless the cloud store is unreachable) and the failure is returned.
    pub async fn sync_table(
        &self,
        descriptor: &SyncDescriptor,
        mode: SyncMode,
        fk: &FkValidationCache,
    ) -> Result<TableReport, TableFailure> {
        let started = Instant::now();
        let span = info_span!("forward", table = %descriptor.name);
        match self.run(descriptor, mode, fk).instrument(span).await {
            Ok(mut report) => {
                report.duration = started.elapsed();
                info!(
                    table = %descriptor.name,
                    strategy = ?report.strategy,
                    extracted = report.extracted,
                    written = report.written,
                    deleted = report.deleted,
                    rejected = report.rejected_count(),
                    "forward sync complete"
                );
                Ok(report)
            }
            Err((stage, err)) => {
                error!(table = %descriptor.name, %stage, error = %err, "forward sync failed");
                if !err.is_fatal() {
                    self.metadata
                        .record_failure(self.cloud, &descriptor.name, &err.to_string(), now())
                        .await;
                }
                Err(TableFailure {
                    table: descriptor.name.clone(),
                    direction: Direction::Forward,
                    stage,
                    error: err,
                })
            }
        }
    }

    async fn run(
        &self,
        descriptor: &SyncDescriptor,
        mode: SyncMode,
        fk: &FkValidationCache,
    ) -> StageResult<TableReport> {
        let now = now();
        let source = descriptor.source_table.as_str();
        let target = descriptor.target();

        // Extract
        let origin_columns = require_columns(self.origin, source).await.at(TableStage::Extract)?;
        let target_columns = require_columns(self.cloud, target).await.at(TableStage::Extract)?;
        let ts_column = descriptor
            .timestamp_column
            .as_deref()
            .unwrap_or(&self.config.timestamp_column);
        let has_ts = find_column(&origin_columns, ts_column).is_some();

        let watermark = self
            .metadata
            .load(self.cloud, &descriptor.name)
            .await
            .at(TableStage::Extract)?;
        let extraction = choose_extraction(descriptor, mode, has_ts, watermark.last_sync_timestamp);

        let mut request = FetchRequest::all(source);
        match extraction {
            Extraction::Incremental { since } => request = request.since(ts_column, since),
            Extraction::Full(FullReason::NoTimestampColumn) => warn!(
                table = %descriptor.name,
                column = ts_column,
                "no timestamp column in source; extracting in full"
            ),
            Extraction::Full(reason) => debug!(table = %descriptor.name, ?reason, "full extraction"),
        }
        let rows = self.origin.fetch(&request).await.at(TableStage::Extract)?;
        let observed = if has_ts {
            max_timestamp(&rows, ts_column)
        } else {
            None
        };

        let strategy = Strategy::for_descriptor(descriptor);
        let mut report = TableReport::new(
            descriptor.name.as_str(),
            Direction::Forward,
            extraction,
            watermark.last_sync_timestamp,
        );
        report.strategy = Some(strategy.kind());
        report.extracted = rows.len();

        // Transform
        let lookups = build_lookup_cache(self.origin, descriptor)
            .await
            .at(TableStage::Transform)?;
        let marker_column =
            find_column(&target_columns, &self.config.marker_column).map(|c| c.name.as_str());
        let mut transformer =
            Transformer::new(descriptor, &lookups, now).project_onto(&target_columns);
        if let Some(marker) = marker_column {
            transformer = transformer.stamp_marker(marker);
        }
        let outcome = transformer.transform(rows);
        if !outcome.dropped_columns.is_empty() {
            debug!(table = %descriptor.name, columns = ?outcome.dropped_columns, "source columns not in target");
        }
        if outcome.lookup_misses > 0 {
            warn!(table = %descriptor.name, misses = outcome.lookup_misses, "lookups without a match");
        }
        report.lookup_misses = outcome.lookup_misses;
        report.dropped_columns = outcome.dropped_columns.into_iter().collect();

        // Validate
        let filtered = fk.filter(&descriptor.name, outcome.records);
        for rejected in &filtered.invalid {
            warn!(table = %descriptor.name, reasons = ?rejected.reasons, "row rejected by reference check");
        }
        report.rejected = filtered.invalid;
        let rows = filtered.valid;

        if rows.is_empty() && strategy.kind() == StrategyKind::Upsert {
            let watermark = self
                .metadata
                .record_success(self.cloud, watermark, observed, 0, now)
                .await
                .at(TableStage::AdvanceWatermark)?;
            report.watermark = watermark.last_sync_timestamp;
            debug!(table = %descriptor.name, "nothing to write");
            return Ok(report);
        }

        // Stage, commit, advance watermark
        let primary_key = if descriptor.primary_key.is_empty() {
            self.cloud.primary_key(target).await.at(TableStage::Stage)?
        } else {
            descriptor.primary_key.clone()
        };
        if primary_key.is_empty() && strategy.kind() == StrategyKind::Upsert {
            return Err((
                TableStage::Stage,
                SyncError::MissingPrimaryKey(target.to_string()),
            ));
        }
        let batch = PreparedBatch {
            target,
            columns: staged_columns(&target_columns, &rows),
            rows,
            primary_key,
            marker_column,
            observed,
        };
        if strategy.kind() == StrategyKind::Upsert
            && !batch.primary_key.iter().all(|k| batch.columns.contains(k))
        {
            // Keys the rows never carry would all come from column defaults.
            return Err((
                TableStage::Stage,
                SyncError::MissingPrimaryKey(target.to_string()),
            ));
        }

        let mut txn = self.cloud.begin().await.at(TableStage::Stage)?;
        match self.apply_batch(&mut txn, strategy, &batch, watermark, now).await {
            Ok((applied, watermark)) => {
                txn.commit().await.at(TableStage::Commit)?;
                report.written = applied.written;
                report.deleted = applied.deleted;
                if strategy.kind() == StrategyKind::Upsert {
                    report.skipped = batch.rows.len().saturating_sub(applied.written as usize);
                }
                report.watermark = watermark.last_sync_timestamp;
                Ok(report)
            }
            Err(failure) => {
                if let Err(e) = txn.rollback().await {
                    warn!(table = %descriptor.name, error = %e, "rollback failed");
                }
                Err(failure)
            }
        }
    }

    async fn apply_batch<T: StoreTransaction>(
        &self,
        txn: &mut T,
        strategy: Strategy,
        batch: &PreparedBatch<'_>,
        watermark: Watermark,
        now: NaiveDateTime,
    ) -> StageResult<(ApplyOutcome, Watermark)> {
        txn.defer_constraints().await.at(TableStage::Stage)?;
        let staging = txn.create_staging(batch.target).await.at(TableStage::Stage)?;
        let staged = txn
            .stage_rows(&staging, &batch.rows, self.config.stage_batch_size)
            .await
            .at(TableStage::Stage)?;
        debug!(staging = %staging.name, staged, "staging table loaded");

        let plan = CommitPlan {
            staging: &staging,
            columns: &batch.columns,
            primary_key: &batch.primary_key,
            marker_column: batch.marker_column,
        };
        let applied = strategy.apply(txn, plan).await.at(TableStage::Commit)?;

        let records = i64::try_from(applied.written).unwrap_or(i64::MAX);
        let watermark = self
            .metadata
            .record_success_in(txn, watermark, batch.observed, records, now)
            .await
            .at(TableStage::AdvanceWatermark)?;
        Ok((applied, watermark))
    }
}

/// Picks full or incremental extraction for one table.
pub fn choose_extraction(
    descriptor: &SyncDescriptor,
    mode: SyncMode,
    has_timestamp: bool,
    since: NaiveDateTime,
) -> Extraction {
    if descriptor.classification == Classification::Reference {
        Extraction::Full(FullReason::Reference)
    } else if descriptor.pk_reliability == PkReliability::Unstable {
        Extraction::Full(FullReason::UnstablePrimaryKey)
    } else if mode == SyncMode::Full {
        Extraction::Full(FullReason::Requested)
    } else if !has_timestamp {
        Extraction::Full(FullReason::NoTimestampColumn)
    } else {
        Extraction::Incremental { since }
    }
}

/// Columns of `table`, or [`SyncError::MissingTable`].
pub(crate) async fn require_columns<S: Store>(store: &S, table: &str) -> Result<Vec<ColumnInfo>, SyncError> {
    store
        .columns(table)
        .await?
        .ok_or_else(|| SyncError::MissingTable {
            table: table.to_string(),
            store: store.name().to_string(),
        })
}

/// Target columns that at least one row carries, in target order.
fn staged_columns(target: &[ColumnInfo], rows: &[Record]) -> Vec<String> {
    target
        .iter()
        .filter(|c| rows.iter().any(|r| r.contains(&c.name)))
        .map(|c| c.name.clone())
        .collect()
}

pub(crate) fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualsync_core::epoch;

    #[test]
    fn extraction_choice() {
        let t = epoch();
        let stable = SyncDescriptor::transactional("orders");
        assert_eq!(
            choose_extraction(&stable, SyncMode::Incremental, true, t),
            Extraction::Incremental { since: t }
        );
        assert_eq!(
            choose_extraction(&stable, SyncMode::Incremental, false, t),
            Extraction::Full(FullReason::NoTimestampColumn)
        );
        assert_eq!(
            choose_extraction(&stable, SyncMode::Full, true, t),
            Extraction::Full(FullReason::Requested)
        );
        assert_eq!(
            choose_extraction(&stable.clone().unstable_pk(), SyncMode::Incremental, true, t),
            Extraction::Full(FullReason::UnstablePrimaryKey)
        );
        assert_eq!(
            choose_extraction(&SyncDescriptor::reference("units"), SyncMode::Incremental, true, t),
            Extraction::Full(FullReason::Reference)
        );
    }

    #[test]
    fn staged_columns_follow_target_order() {
        let target = vec![
            ColumnInfo::new("id", "integer"),
            ColumnInfo::new("name", "text"),
            ColumnInfo::new("created_at", "timestamp without time zone"),
        ];
        let rows = vec![
            dualsync_core::record! { "name" => "a" },
            dualsync_core::record! { "id" => 1 },
        ];
        assert_eq!(staged_columns(&target, &rows), vec!["id", "name"]);
    }
}
