//! Configuration for the replication engine.

use serde::Deserialize;

/// Engine-wide replication settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Column holding the origin marker in cloud tables.
    pub marker_column: String,
    /// Mutation timestamp column used when a descriptor names none.
    pub timestamp_column: String,
    /// Forward watermark table in the cloud store.
    pub forward_metadata_table: String,
    /// Reverse watermark table in the cloud store.
    pub reverse_metadata_table: String,
    /// Stop a run at the first failed table instead of continuing.
    pub halt_on_error: bool,
    /// Rows per bulk insert into a staging table.
    pub stage_batch_size: usize,
}

impl EngineConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            marker_column: "origin_marker".into(),
            timestamp_column: "updated_at".into(),
            forward_metadata_table: "sync_metadata".into(),
            reverse_metadata_table: "reverse_sync_metadata".into(),
            halt_on_error: false,
            stage_batch_size: 1000,
        }
    }

    /// Sets the origin marker column.
    #[must_use]
    pub fn with_marker_column(mut self, column: impl Into<String>) -> Self {
        self.marker_column = column.into();
        self
    }

    /// Sets the default mutation timestamp column.
    #[must_use]
    pub fn with_timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = column.into();
        self
    }

    /// Sets both metadata table names.
    #[must_use]
    pub fn with_metadata_tables(
        mut self,
        forward: impl Into<String>,
        reverse: impl Into<String>,
    ) -> Self {
        self.forward_metadata_table = forward.into();
        self.reverse_metadata_table = reverse.into();
        self
    }

    /// Halts a run at the first failed table.
    #[must_use]
    pub fn with_halt_on_error(mut self, halt: bool) -> Self {
        self.halt_on_error = halt;
        self
    }

    /// Sets the staging batch size (at least 1).
    #[must_use]
    pub fn with_stage_batch_size(mut self, size: usize) -> Self {
        self.stage_batch_size = size.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
