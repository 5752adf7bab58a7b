//! Data carriers shared across the diagnostic and export engines.

use serde::{Deserialize, Serialize};

/// The working spatial reference for every query in the pipeline
/// (SIRGAS 2000 geographic).
pub const WORKING_SRID: i32 = 4674;

/// A geometry-bearing table discovered through the `geometry_columns`
/// registry.
///
/// The geometry column name is always the one reported by the registry;
/// no code path assumes a fixed column name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeometryTable {
    /// Schema the table lives in.
    pub schema: String,
    /// Table name.
    pub name: String,
    /// Name of the designated geometry column.
    pub geometry_column: String,
}

impl GeometryTable {
    /// Creates a table reference from catalog-discovered identifiers.
    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        geometry_column: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            geometry_column: geometry_column.into(),
        }
    }
}

/// Per-table outcome of one diagnostic batch.
///
/// A table that failed is reported with `feature_count = 0` and the error
/// text preserved; it is never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    /// Table name as supplied by the caller.
    pub table: String,
    /// Number of features intersecting the AOI (0 on error).
    pub feature_count: i64,
    /// Error text if this table's query failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DiagnosticRecord {
    /// Record for a table whose count query succeeded.
    pub fn counted(table: impl Into<String>, feature_count: i64) -> Self {
        Self {
            table: table.into(),
            feature_count,
            error: None,
        }
    }

    /// Record for a table whose query failed; the count is reported as 0
    /// and the reason is preserved.
    pub fn failed(table: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            feature_count: 0,
            error: Some(error.into()),
        }
    }
}

/// Batch-level totals computed over every attempted table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticSummary {
    /// Tables the batch attempted, including failures.
    pub tables_attempted: usize,
    /// Tables with at least one intersecting feature.
    pub tables_with_matches: usize,
}

/// Result of one full diagnostic pass over a set of candidate tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticBatch {
    /// One record per table, in caller-supplied order (filtered by the
    /// include-zero policy).
    pub records: Vec<DiagnosticRecord>,
    /// Totals over all attempted tables, independent of filtering.
    pub summary: DiagnosticSummary,
}

/// Attribute preview for one table with intersecting features.
///
/// Rows are raw `row_to_json` objects with the geometry column removed;
/// `columns` lists the non-geometry column names in ordinal order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleResult {
    /// Table name.
    pub table: String,
    /// Total number of intersecting features (not the sample size).
    pub feature_count: i64,
    /// Non-geometry column names, ordinal order.
    pub columns: Vec<String>,
    /// Up to the requested number of attribute rows.
    pub rows: Vec<serde_json::Value>,
}

/// Why a selected table produced no layer in the output container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerSkipReason {
    /// The intersects query returned no rows.
    NoFeatures,
    /// Every returned feature was invalid or empty.
    AllInvalid,
    /// The query or the container write failed; the text is preserved.
    Failed(String),
}

/// Per-layer outcome of one export run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerOutcome {
    /// Layer name (equal to the source table name, or the literal "AOI").
    pub layer: String,
    /// Features written into the container.
    pub features_written: usize,
    /// Features dropped by the validity/emptiness filter.
    pub features_dropped: usize,
    /// Whether a ZM→Z conversion was applied to this layer.
    pub measure_stripped: bool,
    /// Present when no layer was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<LayerSkipReason>,
}

impl LayerOutcome {
    /// True when a physical layer was written for this entry.
    pub fn written(&self) -> bool {
        self.skipped.is_none()
    }
}

/// Result of one export run over a set of selected tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportReport {
    /// Output container path.
    pub output: std::path::PathBuf,
    /// One outcome per attempted layer, in processing order.
    pub layers: Vec<LayerOutcome>,
}

impl ExportReport {
    /// Number of layers physically written.
    pub fn layers_written(&self) -> usize {
        self.layers.iter().filter(|l| l.written()).count()
    }
}
