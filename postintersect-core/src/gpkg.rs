//! GeoPackage container writer.
//!
//! A GeoPackage is a SQLite database with a fixed metadata schema
//! (`gpkg_spatial_ref_sys`, `gpkg_contents`, `gpkg_geometry_columns`) and
//! one table per vector layer whose geometry column holds the GeoPackage
//! binary encoding. The container is written through sqlx's SQLite driver;
//! geometry blobs are encoded with geozero's GeoPackage WKB dialect.
//!
//! Each layer is written inside its own transaction, so a failed layer
//! leaves previously written layers intact.

use crate::catalog::quote_ident;
use crate::error::PostIntersectError;
use crate::geometry;
use crate::models::WORKING_SRID;
use crate::Result;
use geozero::wkt::WktStr;
use geozero::{CoordDimensions, ToWkb};
use serde_json::Value as JsonValue;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use std::path::{Path, PathBuf};
use wkt::Wkt;

/// GeoPackage application id ("GPKG" as a big-endian u32).
const GPKG_APPLICATION_ID: i64 = 0x4750_4B47;
/// GeoPackage 1.3 user version.
const GPKG_USER_VERSION: i64 = 10_300;

/// SIRGAS 2000 geographic, the working reference system of the pipeline.
const SIRGAS_2000_DEFINITION: &str = "GEOGCS[\"SIRGAS 2000\",\
DATUM[\"Sistema_de_Referencia_Geocentrico_para_las_AmericaS_2000\",\
SPHEROID[\"GRS 1980\",6378137,298.257222101,AUTHORITY[\"EPSG\",\"7019\"]],\
AUTHORITY[\"EPSG\",\"6674\"]],\
PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],\
UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],\
AUTHORITY[\"EPSG\",\"4674\"]]";

const WGS_84_DEFINITION: &str = "GEOGCS[\"WGS 84\",\
DATUM[\"WGS_1984\",\
SPHEROID[\"WGS 84\",6378137,298.257223563,AUTHORITY[\"EPSG\",\"7030\"]],\
AUTHORITY[\"EPSG\",\"6326\"]],\
PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],\
UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],\
AUTHORITY[\"EPSG\",\"4326\"]]";

/// One feature bound for a layer: a sanitized geometry plus its
/// non-geometry attributes as a JSON object.
#[derive(Debug, Clone)]
pub struct LayerFeature {
    /// Geometry, already validity-filtered and measure-free.
    pub geometry: Wkt<f64>,
    /// Attribute values keyed by column name.
    pub attributes: JsonValue,
}

/// Multi-layer GeoPackage writer; layers are write-once per export call.
#[derive(Debug)]
pub struct GeoPackageWriter {
    conn: SqliteConnection,
    path: PathBuf,
    layers: Vec<String>,
}

impl GeoPackageWriter {
    /// Creates a fresh GeoPackage at `path`, replacing any existing file,
    /// and installs the required metadata tables.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(PostIntersectError::io(
                    format!("Failed to replace existing container {}", path.display()),
                    e,
                ))
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);

        let mut conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(|e| PostIntersectError::container_failed(path.display().to_string(), e))?;

        initialize_container(&mut conn)
            .await
            .map_err(|e| PostIntersectError::container_failed(path.display().to_string(), e))?;

        Ok(Self {
            conn,
            path,
            layers: Vec::new(),
        })
    }

    /// Writes one named layer with the given attribute columns.
    ///
    /// The feature set must be non-empty (the export engine skips tables
    /// that sanitize down to nothing) and the layer name must be unused in
    /// this container. Returns the number of features written.
    pub async fn write_layer(
        &mut self,
        name: &str,
        columns: &[String],
        features: &[LayerFeature],
    ) -> Result<usize> {
        if features.is_empty() {
            return Err(PostIntersectError::export_write_failed(
                name,
                "refusing to write an empty layer",
            ));
        }
        if self.layers.iter().any(|l| l == name) {
            return Err(PostIntersectError::export_write_failed(
                name,
                "layer already written to this container",
            ));
        }

        let fail = |e: &dyn std::fmt::Display| PostIntersectError::export_write_failed(name, e);

        let type_name = layer_geometry_type(features);
        let has_z = features
            .iter()
            .any(|f| geometry::dimensions(&f.geometry).z);
        let bbox = layer_bbox(features);

        let mut tx = self.conn.begin().await.map_err(|e| fail(&e))?;

        let column_defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(c), column_affinity(features, c)))
            .collect();
        let create = format!(
            "CREATE TABLE {} (fid INTEGER PRIMARY KEY AUTOINCREMENT, geom BLOB{}{})",
            quote_ident(name),
            if column_defs.is_empty() { "" } else { ", " },
            column_defs.join(", "),
        );
        sqlx::query(&create)
            .execute(&mut *tx)
            .await
            .map_err(|e| fail(&e))?;

        let placeholders: Vec<&str> = std::iter::repeat("?")
            .take(columns.len() + 1)
            .collect();
        let insert = format!(
            "INSERT INTO {} (geom{}{}) VALUES ({})",
            quote_ident(name),
            if columns.is_empty() { "" } else { ", " },
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            placeholders.join(", "),
        );

        for feature in features {
            let blob = encode_geometry(&feature.geometry).map_err(|e| fail(&e))?;

            let mut query = sqlx::query(&insert).bind(blob);
            for column in columns {
                query = bind_attribute(query, feature.attributes.get(column));
            }
            query.execute(&mut *tx).await.map_err(|e| fail(&e))?;
        }

        let last_change = chrono::Utc::now()
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        sqlx::query(
            "INSERT INTO gpkg_contents \
             (table_name, data_type, identifier, description, last_change, \
              min_x, min_y, max_x, max_y, srs_id) \
             VALUES (?, 'features', ?, '', ?, ?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(name)
        .bind(&last_change)
        .bind(bbox.map(|b| b[0]))
        .bind(bbox.map(|b| b[1]))
        .bind(bbox.map(|b| b[2]))
        .bind(bbox.map(|b| b[3]))
        .bind(WORKING_SRID)
        .execute(&mut *tx)
        .await
        .map_err(|e| fail(&e))?;

        sqlx::query(
            "INSERT INTO gpkg_geometry_columns \
             (table_name, column_name, geometry_type_name, srs_id, z, m) \
             VALUES (?, 'geom', ?, ?, ?, 0)",
        )
        .bind(name)
        .bind(type_name)
        .bind(WORKING_SRID)
        .bind(i32::from(has_z))
        .execute(&mut *tx)
        .await
        .map_err(|e| fail(&e))?;

        tx.commit().await.map_err(|e| fail(&e))?;

        self.layers.push(name.to_string());
        Ok(features.len())
    }

    /// Layer names written so far, in write order.
    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    /// Output container path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the container.
    pub async fn finish(self) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| PostIntersectError::container_failed(self.path.display().to_string(), e))
    }
}

/// Creates the GeoPackage metadata schema on a fresh SQLite database.
async fn initialize_container(conn: &mut SqliteConnection) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(&format!("PRAGMA application_id = {}", GPKG_APPLICATION_ID))
        .execute(&mut *conn)
        .await?;
    sqlx::query(&format!("PRAGMA user_version = {}", GPKG_USER_VERSION))
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        "CREATE TABLE gpkg_spatial_ref_sys (\
         srs_name TEXT NOT NULL, \
         srs_id INTEGER NOT NULL PRIMARY KEY, \
         organization TEXT NOT NULL, \
         organization_coordsys_id INTEGER NOT NULL, \
         definition TEXT NOT NULL, \
         description TEXT)",
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "CREATE TABLE gpkg_contents (\
         table_name TEXT NOT NULL PRIMARY KEY, \
         data_type TEXT NOT NULL, \
         identifier TEXT UNIQUE, \
         description TEXT DEFAULT '', \
         last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')), \
         min_x DOUBLE, min_y DOUBLE, max_x DOUBLE, max_y DOUBLE, \
         srs_id INTEGER, \
         CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) \
           REFERENCES gpkg_spatial_ref_sys(srs_id))",
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        "CREATE TABLE gpkg_geometry_columns (\
         table_name TEXT NOT NULL, \
         column_name TEXT NOT NULL, \
         geometry_type_name TEXT NOT NULL, \
         srs_id INTEGER NOT NULL, \
         z TINYINT NOT NULL, \
         m TINYINT NOT NULL, \
         CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name), \
         CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) \
           REFERENCES gpkg_contents(table_name), \
         CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) \
           REFERENCES gpkg_spatial_ref_sys(srs_id))",
    )
    .execute(&mut *conn)
    .await?;

    let srs_rows: [(&str, i64, &str, i64, &str, &str); 4] = [
        (
            "Undefined cartesian SRS",
            -1,
            "NONE",
            -1,
            "undefined",
            "undefined cartesian coordinate reference system",
        ),
        (
            "Undefined geographic SRS",
            0,
            "NONE",
            0,
            "undefined",
            "undefined geographic coordinate reference system",
        ),
        (
            "WGS 84 geodetic",
            4326,
            "EPSG",
            4326,
            WGS_84_DEFINITION,
            "longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid",
        ),
        (
            "SIRGAS 2000",
            i64::from(WORKING_SRID),
            "EPSG",
            i64::from(WORKING_SRID),
            SIRGAS_2000_DEFINITION,
            "SIRGAS 2000 geographic, the pipeline's working reference system",
        ),
    ];

    for (name, srs_id, org, org_id, definition, description) in srs_rows {
        sqlx::query(
            "INSERT INTO gpkg_spatial_ref_sys \
             (srs_name, srs_id, organization, organization_coordsys_id, definition, description) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(srs_id)
        .bind(org)
        .bind(org_id)
        .bind(definition)
        .bind(description)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Encodes one geometry into the GeoPackage binary format at the working
/// SRID.
fn encode_geometry(geometry: &Wkt<f64>) -> std::result::Result<Vec<u8>, geozero::error::GeozeroError> {
    let dims = if geometry::dimensions(geometry).z {
        CoordDimensions::xyz()
    } else {
        CoordDimensions::xy()
    };
    let text = geometry.to_string();
    WktStr(&text).to_gpkg_wkb(dims, Some(WORKING_SRID), Vec::new())
}

/// The layer's declared geometry type: the single WKT kind shared by all
/// features, or the generic GEOMETRY when kinds are mixed.
fn layer_geometry_type(features: &[LayerFeature]) -> String {
    let mut kinds = features
        .iter()
        .map(|f| geometry::geometry_type_name(&f.geometry));
    match kinds.next() {
        None => "GEOMETRY".to_string(),
        Some(first) => {
            if kinds.all(|k| k == first) {
                first.to_string()
            } else {
                "GEOMETRY".to_string()
            }
        }
    }
}

/// X/Y bounding box over every coordinate of every feature.
fn layer_bbox(features: &[LayerFeature]) -> Option<[f64; 4]> {
    let mut bbox: Option<[f64; 4]> = None;
    for feature in features {
        geometry::visit_xy(&feature.geometry, &mut |x, y| {
            bbox = Some(match bbox {
                None => [x, y, x, y],
                Some([min_x, min_y, max_x, max_y]) => {
                    [min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y)]
                }
            });
        });
    }
    bbox
}

/// SQLite column affinity for an attribute, decided by the first non-null
/// value observed for it. SQLite's dynamic typing tolerates stragglers of
/// another kind.
fn column_affinity(features: &[LayerFeature], column: &str) -> &'static str {
    for feature in features {
        match feature.attributes.get(column) {
            None | Some(JsonValue::Null) => continue,
            Some(JsonValue::Bool(_)) => return "INTEGER",
            Some(JsonValue::Number(n)) => {
                return if n.is_f64() { "REAL" } else { "INTEGER" };
            }
            Some(_) => return "TEXT",
        }
    }
    "TEXT"
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Binds one JSON attribute value with its natural SQLite type; structured
/// values are stored as their JSON text.
fn bind_attribute<'q>(query: SqliteQuery<'q>, value: Option<&JsonValue>) -> SqliteQuery<'q> {
    match value {
        None | Some(JsonValue::Null) => query.bind(None::<String>),
        Some(JsonValue::Bool(b)) => query.bind(i64::from(*b)),
        Some(JsonValue::Number(n)) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else {
                query.bind(n.as_f64())
            }
        }
        Some(JsonValue::String(s)) => query.bind(s.clone()),
        Some(other) => query.bind(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::parse_wkt;
    use serde_json::json;

    fn feature(wkt: &str, attributes: JsonValue) -> LayerFeature {
        LayerFeature {
            geometry: parse_wkt(wkt).unwrap(),
            attributes,
        }
    }

    #[test]
    fn test_layer_geometry_type_uniform_and_mixed() {
        let uniform = vec![
            feature("POLYGON ((0 0,1 0,1 1,0 0))", json!({})),
            feature("POLYGON ((2 2,3 2,3 3,2 2))", json!({})),
        ];
        assert_eq!(layer_geometry_type(&uniform), "POLYGON");

        let mixed = vec![
            feature("POLYGON ((0 0,1 0,1 1,0 0))", json!({})),
            feature("POINT (5 5)", json!({})),
        ];
        assert_eq!(layer_geometry_type(&mixed), "GEOMETRY");
    }

    #[test]
    fn test_layer_bbox_spans_all_features() {
        let features = vec![
            feature("POINT (1 2)", json!({})),
            feature("POINT (-3 7)", json!({})),
        ];
        assert_eq!(layer_bbox(&features), Some([-3.0, 2.0, 1.0, 7.0]));
    }

    #[test]
    fn test_column_affinity_from_first_non_null() {
        let features = vec![
            feature("POINT (0 0)", json!({"a": null, "b": 2, "c": 1.5, "d": "x"})),
            feature("POINT (1 1)", json!({"a": "late", "b": 3, "c": 2.5, "d": "y"})),
        ];
        assert_eq!(column_affinity(&features, "a"), "TEXT");
        assert_eq!(column_affinity(&features, "b"), "INTEGER");
        assert_eq!(column_affinity(&features, "c"), "REAL");
        assert_eq!(column_affinity(&features, "d"), "TEXT");
        assert_eq!(column_affinity(&features, "missing"), "TEXT");
    }

    #[test]
    fn test_encode_geometry_has_gpkg_header() {
        let geometry = parse_wkt("POINT (1 2)").unwrap();
        let blob = encode_geometry(&geometry).unwrap();
        // GeoPackage binary starts with the "GP" magic.
        assert_eq!(&blob[0..2], b"GP");
    }
}
