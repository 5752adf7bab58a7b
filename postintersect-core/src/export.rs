//! Layer Export Engine.
//!
//! Re-executes the intersects predicate for each selected table, discards
//! invalid and empty geometries, normalizes ZM coordinates to Z, and
//! writes each surviving result as a named layer into one GeoPackage.
//! Export of one layer never aborts the others: every per-table condition
//! is caught at the table boundary and recorded on that layer's outcome.

use crate::catalog::{list_attribute_columns, quote_ident};
use crate::error::PostIntersectError;
use crate::geometry;
use crate::gpkg::{GeoPackageWriter, LayerFeature};
use crate::models::{ExportReport, GeometryTable, LayerOutcome, LayerSkipReason, WORKING_SRID};
use crate::session::SessionContext;
use crate::Result;
use serde_json::Value as JsonValue;
use std::path::Path;

/// Options for one export run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    /// Write the session AOI as the first layer, literally named "AOI".
    pub include_aoi: bool,
}

/// Layer name reserved for the AOI geometry.
const AOI_LAYER: &str = "AOI";

fn export_query(table: &GeometryTable) -> String {
    let geom = quote_ident(&table.geometry_column);
    format!(
        "SELECT ST_AsText(t.{geom}), ST_IsValid(t.{geom}), ST_IsEmpty(t.{geom}), row_to_json(t.*) \
         FROM {}.{} t \
         WHERE ST_Intersects(t.{geom}, ST_GeomFromText($1, {srid}))",
        quote_ident(&table.schema),
        quote_ident(&table.name),
        geom = geom,
        srid = WORKING_SRID,
    )
}

/// Exports the selected tables (and optionally the AOI itself) into a
/// multi-layer GeoPackage at `output`.
///
/// Layer names equal source table names. A table with no intersecting,
/// valid, non-empty features produces no layer (never an empty one); its
/// outcome records why. Only container-level conditions (creating the
/// output file) are fatal.
pub async fn export_layers(
    session: &SessionContext,
    tables: &[GeometryTable],
    output: impl AsRef<Path>,
    options: ExportOptions,
) -> Result<ExportReport> {
    let output = output.as_ref();
    let mut writer = GeoPackageWriter::create(output).await?;
    let mut outcomes = Vec::new();

    if options.include_aoi {
        outcomes.push(export_aoi_layer(session, &mut writer).await);
    }

    for table in tables {
        outcomes.push(export_table_layer(session, &mut writer, table).await);
    }

    if let Err(e) = writer.finish().await {
        // Layers already written stay valid; closing is best-effort.
        tracing::warn!("Failed to close container cleanly: {}", e);
    }

    let report = ExportReport {
        output: output.to_path_buf(),
        layers: outcomes,
    };
    tracing::info!(
        "Exported {} of {} layers to {}",
        report.layers_written(),
        report.layers.len(),
        output.display()
    );
    Ok(report)
}

/// Writes the session AOI as its own layer, with independent failure
/// isolation: a failure here never prevents table layers from being
/// exported.
async fn export_aoi_layer(session: &SessionContext, writer: &mut GeoPackageWriter) -> LayerOutcome {
    let result = geometry::parse_wkt(session.aoi().wkt());
    let geometry = match result {
        Ok(geometry) => geometry,
        Err(e) => {
            tracing::error!("Failed to export layer '{}': {}", AOI_LAYER, e);
            return failed_outcome(AOI_LAYER, e.to_string());
        }
    };

    let features = vec![LayerFeature {
        geometry,
        attributes: JsonValue::Object(serde_json::Map::new()),
    }];

    match writer.write_layer(AOI_LAYER, &[], &features).await {
        Ok(_) => {
            tracing::info!("Layer '{}' exported to the GeoPackage", AOI_LAYER);
            LayerOutcome {
                layer: AOI_LAYER.to_string(),
                features_written: 1,
                features_dropped: 0,
                measure_stripped: false,
                skipped: None,
            }
        }
        Err(e) => {
            tracing::error!("Failed to export layer '{}': {}", AOI_LAYER, e);
            failed_outcome(AOI_LAYER, e.to_string())
        }
    }
}

/// Queries, sanitizes, and writes one table's intersecting features.
/// Every error is caught here and recorded on the returned outcome.
async fn export_table_layer(
    session: &SessionContext,
    writer: &mut GeoPackageWriter,
    table: &GeometryTable,
) -> LayerOutcome {
    match try_export_table(session, writer, table).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("Failed to export '{}': {}", table.name, e);
            failed_outcome(&table.name, e.to_string())
        }
    }
}

async fn try_export_table(
    session: &SessionContext,
    writer: &mut GeoPackageWriter,
    table: &GeometryTable,
) -> Result<LayerOutcome> {
    type ExportRow = (Option<String>, Option<bool>, Option<bool>, JsonValue);

    let sql = export_query(table);
    let rows: Vec<ExportRow> = sqlx::query_as(&sql)
        .bind(session.aoi().wkt())
        .fetch_all(session.pool())
        .await
        .map_err(|e| PostIntersectError::query_failed(&table.name, e))?;

    if rows.is_empty() {
        tracing::warn!("Table '{}' has no features to export", table.name);
        return Ok(skipped_outcome(&table.name, LayerSkipReason::NoFeatures));
    }

    let total = rows.len();
    let mut features = Vec::with_capacity(total);
    for (wkt_text, is_valid, is_empty, mut attributes) in rows {
        let (Some(text), Some(true), Some(false)) = (wkt_text, is_valid, is_empty) else {
            continue;
        };
        let geometry = match geometry::parse_wkt(&text) {
            Ok(geometry) => geometry,
            Err(e) => {
                tracing::debug!("Dropping unparseable geometry in '{}': {}", table.name, e);
                continue;
            }
        };
        if let Some(object) = attributes.as_object_mut() {
            object.remove(&table.geometry_column);
        }
        features.push(LayerFeature {
            geometry,
            attributes,
        });
    }

    let dropped = total - features.len();
    if features.is_empty() {
        tracing::warn!(
            "Table '{}' only has invalid or empty geometries",
            table.name
        );
        return Ok(LayerOutcome {
            layer: table.name.clone(),
            features_written: 0,
            features_dropped: dropped,
            measure_stripped: false,
            skipped: Some(LayerSkipReason::AllInvalid),
        });
    }

    let measure_stripped = features.iter().any(|f| geometry::has_measure(&f.geometry));
    if measure_stripped {
        tracing::warn!("ZM geometries converted to Z in layer '{}'", table.name);
        features = features
            .into_iter()
            .map(|f| LayerFeature {
                geometry: geometry::strip_measure(f.geometry),
                attributes: f.attributes,
            })
            .collect();
    }

    let mut columns = list_attribute_columns(session.pool(), table).await?;
    // "fid" and "geom" are taken by the container's feature table layout.
    columns.retain(|c| {
        let clash = c.eq_ignore_ascii_case("fid") || c.eq_ignore_ascii_case("geom");
        if clash {
            tracing::warn!(
                "Attribute column \"{}\" of '{}' collides with the container layout; dropped",
                c,
                table.name
            );
        }
        !clash
    });
    let written = writer.write_layer(&table.name, &columns, &features).await?;
    tracing::info!("Layer '{}' exported to the GeoPackage", table.name);

    Ok(LayerOutcome {
        layer: table.name.clone(),
        features_written: written,
        features_dropped: dropped,
        measure_stripped,
        skipped: None,
    })
}

fn failed_outcome(layer: &str, error: String) -> LayerOutcome {
    LayerOutcome {
        layer: layer.to_string(),
        features_written: 0,
        features_dropped: 0,
        measure_stripped: false,
        skipped: Some(LayerSkipReason::Failed(error)),
    }
}

fn skipped_outcome(layer: &str, reason: LayerSkipReason) -> LayerOutcome {
    LayerOutcome {
        layer: layer.to_string(),
        features_written: 0,
        features_dropped: 0,
        measure_stripped: false,
        skipped: Some(reason),
    }
}
