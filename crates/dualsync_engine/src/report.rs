//! Per-table and per-run outcomes.

use crate::error::SyncError;
use crate::strategy::StrategyKind;
use chrono::NaiveDateTime;
use dualsync_core::{Direction, RejectedRow};
use std::fmt;
use std::time::Duration;

/// Requested extraction mode for a forward run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncMode {
    /// Extract every table in full.
    Full,
    /// Extract changed rows where the table allows it.
    #[default]
    Incremental,
}

/// Why a table was extracted in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FullReason {
    /// Reference tables are always fully replaced.
    Reference,
    /// Unstable keys are reconciled destructively.
    UnstablePrimaryKey,
    /// The run asked for [`SyncMode::Full`].
    Requested,
    /// The source has no mutation timestamp column.
    NoTimestampColumn,
}

/// How a table's rows were selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// Every row.
    Full(FullReason),
    /// Rows changed strictly after `since`.
    Incremental {
        /// Watermark at extraction time.
        since: NaiveDateTime,
    },
}

impl Extraction {
    /// True for a full extraction.
    pub fn is_full(&self) -> bool {
        matches!(self, Extraction::Full(_))
    }
}

/// Phase of the per-table state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableStage {
    /// Reading source rows.
    Extract,
    /// Applying column rules.
    Transform,
    /// Checking references, or projecting and checking existence in reverse.
    Validate,
    /// Loading the staging table.
    Stage,
    /// Applying staged rows and committing.
    Commit,
    /// Persisting the watermark.
    AdvanceWatermark,
}

impl fmt::Display for TableStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableStage::Extract => "extract",
            TableStage::Transform => "transform",
            TableStage::Validate => "validate",
            TableStage::Stage => "stage",
            TableStage::Commit => "commit",
            TableStage::AdvanceWatermark => "advance-watermark",
        };
        f.write_str(s)
    }
}

pub(crate) type StageResult<T> = Result<T, (TableStage, SyncError)>;

/// Tags an error with the phase it happened in.
pub(crate) trait AtStage<T> {
    fn at(self, stage: TableStage) -> StageResult<T>;
}

impl<T, E: Into<SyncError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: TableStage) -> StageResult<T> {
        self.map_err(|e| (stage, e.into()))
    }
}

/// Outcome of one successful table sync.
#[derive(Debug, Clone)]
pub struct TableReport {
    /// Logical table name.
    pub table: String,
    /// Direction.
    pub direction: Direction,
    /// How rows were selected.
    pub extraction: Extraction,
    /// Commit strategy (forward only).
    pub strategy: Option<StrategyKind>,
    /// Rows read from the source.
    pub extracted: usize,
    /// Rows inserted or updated in the destination.
    pub written: u64,
    /// Rows deleted from the destination.
    pub deleted: u64,
    /// Rows not applied: already present at the origin (reverse), or
    /// owned by the cloud side or collapsed by key (forward upsert).
    pub skipped: usize,
    /// Rows excluded by validation or coercion.
    pub rejected: Vec<RejectedRow>,
    /// Lookups that found no match.
    pub lookup_misses: usize,
    /// Source columns the destination does not have.
    pub dropped_columns: Vec<String>,
    /// Watermark after the sync.
    pub watermark: NaiveDateTime,
    /// Wall time spent.
    pub duration: Duration,
}

impl TableReport {
    pub(crate) fn new(
        table: impl Into<String>,
        direction: Direction,
        extraction: Extraction,
        watermark: NaiveDateTime,
    ) -> Self {
        Self {
            table: table.into(),
            direction,
            extraction,
            strategy: None,
            extracted: 0,
            written: 0,
            deleted: 0,
            skipped: 0,
            rejected: Vec::new(),
            lookup_misses: 0,
            dropped_columns: Vec::new(),
            watermark,
            duration: Duration::ZERO,
        }
    }

    /// Number of rejected rows.
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

/// A table sync that failed; the destination is unchanged.
#[derive(Debug)]
pub struct TableFailure {
    /// Logical table name.
    pub table: String,
    /// Direction.
    pub direction: Direction,
    /// Phase that failed.
    pub stage: TableStage,
    /// The error.
    pub error: SyncError,
}

impl fmt::Display for TableFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sync of '{}' failed at {}: {}",
            self.direction, self.table, self.stage, self.error
        )
    }
}

/// Outcome of a run over several tables.
#[derive(Debug)]
pub struct RunReport {
    /// Direction.
    pub direction: Direction,
    /// Requested mode (forward only).
    pub mode: Option<SyncMode>,
    /// Tables that synced, in processing order.
    pub tables: Vec<TableReport>,
    /// Tables that failed, in processing order.
    pub failures: Vec<TableFailure>,
    /// True if the run stopped early because of `halt_on_error`.
    pub halted: bool,
    /// Wall time spent.
    pub duration: Duration,
}

impl RunReport {
    pub(crate) fn new(direction: Direction, mode: Option<SyncMode>) -> Self {
        Self {
            direction,
            mode,
            tables: Vec::new(),
            failures: Vec::new(),
            halted: false,
            duration: Duration::ZERO,
        }
    }

    /// True if every table synced.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.halted
    }

    /// Report for one table.
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Failure for one table.
    pub fn failure(&self, name: &str) -> Option<&TableFailure> {
        self.failures.iter().find(|f| f.table == name)
    }

    /// Total rows written.
    pub fn written(&self) -> u64 {
        self.tables.iter().map(|t| t.written).sum()
    }

    /// Total rows rejected.
    pub fn rejected(&self) -> usize {
        self.tables.iter().map(TableReport::rejected_count).sum()
    }
}
