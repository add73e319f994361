//! Reverse sync: cloud to origin, insert only.
//!
//! Rows authored on the cloud side are projected onto the origin schema and
//! inserted one by one when their key is not already present. Existing
//! origin rows are never updated or deleted.

use crate::config::EngineConfig;
use crate::forward::{now, require_columns};
use crate::metadata::MetadataStore;
use crate::report::{
    AtStage, Extraction, FullReason, StageResult, TableFailure, TableReport, TableStage,
};
use crate::store::{FetchRequest, Store};
use dualsync_core::{
    find_column, max_timestamp, ColumnInfo, Direction, OriginMarker, RejectedRow,
    ReverseDescriptor, ReverseProjector,
};
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Drives reverse syncs of single tables.
#[derive(Debug)]
pub struct ReverseSync<'a, O, C> {
    origin: &'a O,
    cloud: &'a C,
    config: &'a EngineConfig,
    metadata: &'a MetadataStore,
}

impl<'a, O: Store, C: Store> ReverseSync<'a, O, C> {
    /// Creates a reverse driver over the two stores.
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

    /// Syncs one reverse table.
    pub async fn sync_table(&self, descriptor: &ReverseDescriptor) -> Result<TableReport, TableFailure> {
        let started = Instant::now();
        let span = info_span!("reverse", table = %descriptor.name);
        match self.run(descriptor).instrument(span).await {
            Ok(mut report) => {
                report.duration = started.elapsed();
                info!(
                    table = %descriptor.name,
                    extracted = report.extracted,
                    inserted = report.written,
                    skipped = report.skipped,
                    rejected = report.rejected_count(),
                    "reverse sync complete"
                );
                Ok(report)
            }
            Err((stage, err)) => {
                error!(table = %descriptor.name, %stage, error = %err, "reverse sync failed");
                if !err.is_fatal() {
                    self.metadata
                        .record_failure(self.cloud, &descriptor.name, &err.to_string(), now())
                        .await;
                }
                Err(TableFailure {
                    table: descriptor.name.clone(),
                    direction: Direction::Reverse,
                    stage,
                    error: err,
                })
            }
        }
    }

    async fn run(&self, descriptor: &ReverseDescriptor) -> StageResult<TableReport> {
        let now = now();
        let cloud_table = descriptor.cloud_table.as_str();
        let origin_table = descriptor.origin_table();

        let cloud_columns = require_columns(self.cloud, cloud_table).await.at(TableStage::Extract)?;
        let origin_columns = require_columns(self.origin, origin_table).await.at(TableStage::Extract)?;
        let ts_column = descriptor
            .timestamp_column
            .as_deref()
            .unwrap_or(&self.config.timestamp_column);
        let has_ts = find_column(&cloud_columns, ts_column).is_some();

        let watermark = self
            .metadata
            .load(self.cloud, &descriptor.name)
            .await
            .at(TableStage::Extract)?;

        let mut request = FetchRequest::all(cloud_table);
        if find_column(&cloud_columns, &self.config.marker_column).is_some() {
            request = request.marked(self.config.marker_column.as_str(), OriginMarker::Cloud);
        }
        let extraction = if has_ts {
            request = request.since(ts_column, watermark.last_sync_timestamp);
            Extraction::Incremental {
                since: watermark.last_sync_timestamp,
            }
        } else {
            warn!(
                table = %descriptor.name,
                column = ts_column,
                "no timestamp column in cloud table; reading every row on each run"
            );
            Extraction::Full(FullReason::NoTimestampColumn)
        };
        let rows = self.cloud.fetch(&request).await.at(TableStage::Extract)?;
        let observed = if has_ts {
            max_timestamp(&rows, ts_column)
        } else {
            None
        };

        let mut report = TableReport::new(
            descriptor.name.as_str(),
            Direction::Reverse,
            extraction,
            watermark.last_sync_timestamp,
        );
        report.extracted = rows.len();
        report.dropped_columns =
            unmatched_columns(&cloud_columns, &origin_columns, &self.config.marker_column, descriptor);

        let projector =
            ReverseProjector::new(descriptor, &origin_columns, &self.config.marker_column);
        for row in rows {
            let projected = match projector.project(&row) {
                Ok(projected) => projected,
                Err(e) => {
                    warn!(table = %descriptor.name, error = %e, "row rejected by coercion");
                    report.rejected.push(RejectedRow {
                        record: row,
                        reasons: vec![e.to_string()],
                    });
                    continue;
                }
            };
            let Some(key) = projected.key_values(&descriptor.primary_key) else {
                warn!(table = %descriptor.name, "row rejected: key column missing or null");
                report.rejected.push(RejectedRow {
                    record: row,
                    reasons: vec![format!(
                        "key ({}) missing or null",
                        descriptor.primary_key.join(", ")
                    )],
                });
                continue;
            };

            if self.origin.exists(origin_table, &key).await.at(TableStage::Validate)? {
                report.skipped += 1;
                continue;
            }
            self.origin
                .insert(origin_table, &projected)
                .await
                .at(TableStage::Commit)?;
            report.written += 1;
        }
        debug!(
            table = %descriptor.name,
            inserted = report.written,
            skipped = report.skipped,
            "origin inserts done"
        );

        let records = i64::try_from(report.written).unwrap_or(i64::MAX);
        let watermark = self
            .metadata
            .record_success(self.cloud, watermark, observed, records, now)
            .await
            .at(TableStage::AdvanceWatermark)?;
        report.watermark = watermark.last_sync_timestamp;
        Ok(report)
    }
}

/// Cloud columns with no origin counterpart, excluding bookkeeping ones.
fn unmatched_columns(
    cloud: &[ColumnInfo],
    origin: &[ColumnInfo],
    marker_column: &str,
    descriptor: &ReverseDescriptor,
) -> Vec<String> {
    cloud
        .iter()
        .filter(|c| c.name != marker_column && !descriptor.drop_columns.contains(&c.name))
        .filter(|c| find_column(origin, &c.name).is_none())
        .map(|c| c.name.clone())
        .collect()
}
