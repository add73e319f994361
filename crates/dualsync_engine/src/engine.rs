//! Replication engine: run orchestration, lifecycle and statistics.

use crate::config::EngineConfig;
use crate::error::{SyncError, SyncResult};
use crate::forward::ForwardSync;
use crate::loader::{load_fk_cache, reload_fk_cache};
use crate::metadata::MetadataStore;
use crate::report::{RunReport, SyncMode, TableFailure, TableReport};
use crate::reverse::ReverseSync;
use crate::store::Store;
use dualsync_core::{Direction, SyncRegistry, Watermark};
use parking_lot::RwLock;
use std::time::Instant;
use tracing::{info, warn};

/// Lifecycle state of a [`ReplicationEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Created; metadata not yet provisioned.
    Created,
    /// Initialized and idle.
    Ready,
    /// A forward run is in progress.
    ForwardSyncing,
    /// A reverse run is in progress.
    ReverseSyncing,
    /// Pools closed.
    Closed,
}

impl EngineState {
    /// Returns true if a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, EngineState::ForwardSyncing | EngineState::ReverseSyncing)
    }

    /// Returns true if a new run may start.
    pub fn can_start_run(&self) -> bool {
        matches!(self, EngineState::Ready)
    }
}

/// Cumulative statistics across runs.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Completed runs, either direction, including single-table runs.
    pub runs: u64,
    /// Tables that synced.
    pub tables_synced: u64,
    /// Tables that failed.
    pub tables_failed: u64,
    /// Rows inserted or updated at the destination.
    pub rows_written: u64,
    /// Rows rejected by validation or coercion.
    pub rows_rejected: u64,
    /// Rows skipped because they were already present or not owned.
    pub rows_skipped: u64,
    /// Time the last run finished.
    pub last_run: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Replicates between an origin store and a cloud store.
///
/// Forward runs copy origin rows to the cloud; reverse runs copy
/// cloud-authored rows back to the origin. Runs are sequential: a second
/// run started while one is active fails with
/// [`SyncError::InvalidStateTransition`].
pub struct ReplicationEngine<O: Store, C: Store> {
    config: EngineConfig,
    registry: SyncRegistry,
    origin: O,
    cloud: C,
    forward_metadata: MetadataStore,
    reverse_metadata: MetadataStore,
    state: RwLock<EngineState>,
    stats: RwLock<EngineStats>,
}

impl<O: Store, C: Store> ReplicationEngine<O, C> {
    /// Creates an engine. Call [`initialize`](Self::initialize) before syncing.
    pub fn new(config: EngineConfig, registry: SyncRegistry, origin: O, cloud: C) -> Self {
        Self {
            forward_metadata: MetadataStore::for_direction(Direction::Forward, &config),
            reverse_metadata: MetadataStore::for_direction(Direction::Reverse, &config),
            config,
            registry,
            origin,
            cloud,
            state: RwLock::new(EngineState::Created),
            stats: RwLock::new(EngineStats::default()),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Table registry.
    pub fn registry(&self) -> &SyncRegistry {
        &self.registry
    }

    /// Origin store.
    pub fn origin(&self) -> &O {
        &self.origin
    }

    /// Cloud store.
    pub fn cloud(&self) -> &C {
        &self.cloud
    }

    /// Gets the current state.
    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    /// Checks both stores and provisions the metadata tables.
    ///
    /// Seeds an epoch watermark for every registered table. Safe to call
    /// again on a ready engine.
    pub async fn initialize(&self) -> SyncResult<()> {
        match self.state() {
            EngineState::Created | EngineState::Ready => {}
            other => {
                return Err(SyncError::InvalidStateTransition {
                    from: format!("{other:?}"),
                    to: "Ready".into(),
                })
            }
        }
        self.origin.ping().await?;
        self.cloud.ping().await?;
        self.forward_metadata
            .bootstrap(&self.cloud, &self.registry.forward_names())
            .await?;
        self.reverse_metadata
            .bootstrap(&self.cloud, &self.registry.reverse_names())
            .await?;
        *self.state.write() = EngineState::Ready;
        info!(
            forward = self.registry.descriptors().len(),
            reverse = self.registry.reverse_descriptors().len(),
            "replication engine initialized"
        );
        Ok(())
    }

    /// Forward-syncs every registered table, reference tables first.
    ///
    /// Table failures are collected in the report; with `halt_on_error`
    /// the run stops at the first one. A fatal error aborts the run.
    pub async fn sync_all(&self, mode: SyncMode) -> SyncResult<RunReport> {
        self.begin_run(EngineState::ForwardSyncing)?;
        let result = self.forward_run(mode).await;
        self.finish_run(run_outcome(&result));
        result
    }

    /// Forward-syncs one table by name.
    pub async fn sync_table(&self, name: &str, mode: SyncMode) -> SyncResult<TableReport> {
        let descriptor = self
            .registry
            .get(name)
            .ok_or_else(|| SyncError::UnknownTable(name.to_string()))?;
        self.begin_run(EngineState::ForwardSyncing)?;
        let result = match load_fk_cache(&self.cloud, self.registry.fk_cache()).await {
            Ok(fk) => self
                .forward()
                .sync_table(descriptor, mode, &fk)
                .await
                .map_err(|f| f.error),
            Err(e) => Err(e),
        };
        self.finish_run(table_outcome(&result));
        result
    }

    /// Reverse-syncs every reverse table, in registration order.
    pub async fn reverse_sync_all(&self) -> SyncResult<RunReport> {
        self.begin_run(EngineState::ReverseSyncing)?;
        let result = self.reverse_run().await;
        self.finish_run(run_outcome(&result));
        result
    }

    /// Reverse-syncs one table by name.
    pub async fn reverse_sync_table(&self, name: &str) -> SyncResult<TableReport> {
        let descriptor = self
            .registry
            .reverse(name)
            .ok_or_else(|| SyncError::UnknownTable(name.to_string()))?;
        self.begin_run(EngineState::ReverseSyncing)?;
        let result = self
            .reverse()
            .sync_table(descriptor)
            .await
            .map_err(|f| f.error);
        self.finish_run(table_outcome(&result));
        result
    }

    /// Stored watermarks for one direction.
    pub async fn watermarks(&self, direction: Direction) -> SyncResult<Vec<Watermark>> {
        match direction {
            Direction::Forward => self.forward_metadata.list(&self.cloud).await,
            Direction::Reverse => self.reverse_metadata.list(&self.cloud).await,
        }
    }

    /// Closes both pools. The engine cannot be used afterwards.
    pub async fn cleanup(&self) {
        self.origin.close().await;
        self.cloud.close().await;
        *self.state.write() = EngineState::Closed;
        info!("replication engine closed");
    }

    fn forward(&self) -> ForwardSync<'_, O, C> {
        ForwardSync::new(&self.origin, &self.cloud, &self.config, &self.forward_metadata)
    }

    fn reverse(&self) -> ReverseSync<'_, O, C> {
        ReverseSync::new(&self.origin, &self.cloud, &self.config, &self.reverse_metadata)
    }

    async fn forward_run(&self, mode: SyncMode) -> SyncResult<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::new(Direction::Forward, Some(mode));
        let mut fk = load_fk_cache(&self.cloud, self.registry.fk_cache()).await?;
        let forward = self.forward();

        for descriptor in self.registry.ordered() {
            match forward.sync_table(descriptor, mode, &fk).await {
                Ok(table) => {
                    report.tables.push(table);
                    if fk.depends_on(descriptor.target()) {
                        fk = reload_fk_cache(&self.cloud, fk, descriptor.target()).await?;
                    }
                }
                Err(failure) => {
                    if self.record_failure(&mut report, failure)? {
                        break;
                    }
                }
            }
        }

        report.duration = started.elapsed();
        info!(
            mode = ?mode,
            synced = report.tables.len(),
            failed = report.failures.len(),
            written = report.written(),
            rejected = report.rejected(),
            "forward run complete"
        );
        Ok(report)
    }

    async fn reverse_run(&self) -> SyncResult<RunReport> {
        let started = Instant::now();
        let mut report = RunReport::new(Direction::Reverse, None);
        let reverse = self.reverse();

        for descriptor in self.registry.reverse_descriptors() {
            match reverse.sync_table(descriptor).await {
                Ok(table) => report.tables.push(table),
                Err(failure) => {
                    if self.record_failure(&mut report, failure)? {
                        break;
                    }
                }
            }
        }

        report.duration = started.elapsed();
        info!(
            synced = report.tables.len(),
            failed = report.failures.len(),
            inserted = report.written(),
            "reverse run complete"
        );
        Ok(report)
    }

    /// Adds a failure to the report. Returns true if the run must stop;
    /// fatal errors are returned instead.
    fn record_failure(&self, report: &mut RunReport, failure: TableFailure) -> SyncResult<bool> {
        if failure.error.is_fatal() {
            return Err(failure.error);
        }
        report.failures.push(failure);
        if self.config.halt_on_error {
            warn!(direction = %report.direction, "halting run after table failure");
            report.halted = true;
            return Ok(true);
        }
        Ok(false)
    }

    fn begin_run(&self, next: EngineState) -> SyncResult<()> {
        let mut state = self.state.write();
        match *state {
            EngineState::Ready => {
                *state = next;
                Ok(())
            }
            EngineState::Created => Err(SyncError::NotInitialized),
            other => Err(SyncError::InvalidStateTransition {
                from: format!("{other:?}"),
                to: format!("{next:?}"),
            }),
        }
    }

    fn finish_run(&self, outcome: RunOutcome<'_>) {
        {
            let mut state = self.state.write();
            if state.is_active() {
                *state = EngineState::Ready;
            }
        }

        let mut stats = self.stats.write();
        stats.runs += 1;
        stats.last_run = Some(Instant::now());
        stats.tables_synced += outcome.tables.len() as u64;
        stats.tables_failed += outcome.failed;
        for table in outcome.tables {
            stats.rows_written += table.written;
            stats.rows_rejected += table.rejected_count() as u64;
            stats.rows_skipped += table.skipped as u64;
        }
        stats.last_error = outcome.error;
    }
}

/// What a finished run contributes to [`EngineStats`].
struct RunOutcome<'a> {
    tables: &'a [TableReport],
    failed: u64,
    error: Option<String>,
}

fn run_outcome(result: &SyncResult<RunReport>) -> RunOutcome<'_> {
    match result {
        Ok(report) => RunOutcome {
            tables: &report.tables,
            failed: report.failures.len() as u64,
            error: report.failures.last().map(ToString::to_string),
        },
        Err(e) => RunOutcome {
            tables: &[],
            failed: 0,
            error: Some(e.to_string()),
        },
    }
}

fn table_outcome(result: &SyncResult<TableReport>) -> RunOutcome<'_> {
    match result {
        Ok(table) => RunOutcome {
            tables: std::slice::from_ref(table),
            failed: 0,
            error: None,
        },
        Err(e) => RunOutcome {
            tables: &[],
            failed: 1,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(EngineState::Ready.can_start_run());
        assert!(!EngineState::Created.can_start_run());
        assert!(!EngineState::ForwardSyncing.can_start_run());
        assert!(EngineState::ReverseSyncing.is_active());
        assert!(!EngineState::Closed.is_active());
    }
}
