//! Intersection Diagnostic Engine.
//!
//! For each candidate table, evaluates a validity-guarded
//! `ST_Intersects` predicate against the session AOI and records the
//! matching feature count. A single table's failure is recorded on its own
//! diagnostic record and never aborts the batch.
//!
//! Tables are processed strictly in caller-supplied order, one blocking
//! round-trip at a time, so output order is deterministic given
//! deterministic input order.

use crate::catalog::quote_ident;
use crate::error::PostIntersectError;
use crate::models::{
    DiagnosticBatch, DiagnosticRecord, DiagnosticSummary, GeometryTable, SampleResult,
    WORKING_SRID,
};
use crate::session::SessionContext;
use crate::Result;
use serde_json::Value as JsonValue;

/// Options for one diagnostic batch.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticOptions {
    /// When false, error-free zero-count tables are omitted from the
    /// returned records. Errored tables always appear.
    pub include_zero: bool,
}

impl Default for DiagnosticOptions {
    fn default() -> Self {
        Self { include_zero: true }
    }
}

/// The validity-guarded spatial predicate evaluated per table.
///
/// The geometry column identifier comes from catalog discovery and is
/// quoted before interpolation; the AOI WKT is always the `$1` bound
/// parameter.
fn intersects_predicate(geometry_column: &str) -> String {
    let geom = quote_ident(geometry_column);
    format!(
        "{geom} IS NOT NULL \
         AND ST_IsValid({geom}) \
         AND ST_SRID({geom}) = {srid} \
         AND ST_Intersects({geom}, ST_GeomFromText($1, {srid}))",
        geom = geom,
        srid = WORKING_SRID,
    )
}

fn count_query(table: &GeometryTable) -> String {
    format!(
        "SELECT COUNT(*) FROM {}.{} WHERE {}",
        quote_ident(&table.schema),
        quote_ident(&table.name),
        intersects_predicate(&table.geometry_column),
    )
}

fn sample_query(table: &GeometryTable) -> String {
    format!(
        "SELECT row_to_json(t.*) FROM {}.{} t WHERE {} LIMIT $2",
        quote_ident(&table.schema),
        quote_ident(&table.name),
        intersects_predicate(&table.geometry_column),
    )
}

/// Runs one diagnostic batch over the candidate tables.
///
/// Produces one [`DiagnosticRecord`] per attempted table (subject to the
/// include-zero policy) plus a summary over all attempted tables. Per-table
/// query failures are recorded as zero counts with the error text and the
/// batch continues.
pub async fn run_diagnostic(
    session: &SessionContext,
    tables: &[GeometryTable],
    options: DiagnosticOptions,
) -> Result<DiagnosticBatch> {
    let aoi_wkt = session.aoi().wkt();
    let mut attempted = Vec::with_capacity(tables.len());

    for table in tables {
        let sql = count_query(table);
        match sqlx::query_scalar::<_, i64>(&sql)
            .bind(aoi_wkt)
            .fetch_one(session.pool())
            .await
        {
            Ok(count) => {
                tracing::debug!("{} -> {} intersecting features", table.name, count);
                attempted.push(DiagnosticRecord::counted(&table.name, count));
            }
            Err(e) => {
                let error = PostIntersectError::query_failed(&table.name, e);
                tracing::error!("Intersection failed for layer {}: {}", table.name, error);
                attempted.push(DiagnosticRecord::failed(&table.name, error.to_string()));
            }
        }
    }

    let summary = summarize(&attempted);
    tracing::info!(
        "{} of {} layers intersect the AOI",
        summary.tables_with_matches,
        summary.tables_attempted
    );

    Ok(DiagnosticBatch {
        records: apply_include_zero(attempted, options.include_zero),
        summary,
    })
}

/// Fetches attribute previews for the tables a diagnostic batch found
/// intersecting features in.
///
/// For each record with `feature_count > 0`, up to `limit` full rows are
/// retrieved (as `row_to_json` objects with the geometry column removed)
/// together with the non-geometry column names. A table whose sample
/// query fails is skipped with a warning; its count record already exists.
pub async fn sample_intersections(
    session: &SessionContext,
    tables: &[GeometryTable],
    records: &[DiagnosticRecord],
    limit: u32,
) -> Result<Vec<SampleResult>> {
    let aoi_wkt = session.aoi().wkt();
    let mut samples = Vec::new();

    for table in tables {
        let Some(record) = records.iter().find(|r| r.table == table.name) else {
            continue;
        };
        if record.feature_count == 0 || record.error.is_some() {
            continue;
        }

        let columns = match crate::catalog::list_attribute_columns(session.pool(), table).await {
            Ok(columns) => columns,
            Err(e) => {
                tracing::warn!("Skipping sample for {}: {}", table.name, e);
                continue;
            }
        };

        let sql = sample_query(table);
        let rows: Vec<JsonValue> = match sqlx::query_scalar(&sql)
            .bind(aoi_wkt)
            .bind(i64::from(limit))
            .fetch_all(session.pool())
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(
                    "Skipping sample for {}: {}",
                    table.name,
                    PostIntersectError::query_failed(&table.name, e)
                );
                continue;
            }
        };

        let rows = rows
            .into_iter()
            .map(|mut row| {
                if let Some(object) = row.as_object_mut() {
                    object.remove(&table.geometry_column);
                }
                row
            })
            .collect();

        samples.push(SampleResult {
            table: table.name.clone(),
            feature_count: record.feature_count,
            columns,
            rows,
        });
    }

    Ok(samples)
}

fn summarize(attempted: &[DiagnosticRecord]) -> DiagnosticSummary {
    DiagnosticSummary {
        tables_attempted: attempted.len(),
        tables_with_matches: attempted.iter().filter(|r| r.feature_count > 0).count(),
    }
}

/// Applies the include-zero policy: error-free zero-count records are
/// omitted when `include_zero` is false; errored records always survive so
/// every failure stays visible.
fn apply_include_zero(records: Vec<DiagnosticRecord>, include_zero: bool) -> Vec<DiagnosticRecord> {
    if include_zero {
        return records;
    }
    records
        .into_iter()
        .filter(|r| r.feature_count > 0 || r.error.is_some())
        .collect()
}
