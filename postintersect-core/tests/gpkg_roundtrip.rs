//! Offline integration tests for the GeoPackage writer: a container is
//! written to a temp file and read back through plain SQLite to verify the
//! metadata schema, the geometry encoding, and the layer contents.

use postintersect_core::geometry::parse_wkt;
use postintersect_core::gpkg::{GeoPackageWriter, LayerFeature};
use serde_json::json;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use std::path::Path;

fn polygon_feature(wkt: &str, attributes: serde_json::Value) -> LayerFeature {
    LayerFeature {
        geometry: parse_wkt(wkt).unwrap(),
        attributes,
    }
}

async fn open_readonly(path: &Path) -> SqliteConnection {
    let options = SqliteConnectOptions::new().filename(path).read_only(true);
    SqliteConnection::connect_with(&options).await.unwrap()
}

#[tokio::test]
async fn writes_a_multi_layer_container_with_gpkg_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("saida.gpkg");

    let mut writer = GeoPackageWriter::create(&path).await.unwrap();

    let lotes = vec![
        polygon_feature(
            "POLYGON ((0 0,4 0,4 4,0 0))",
            json!({"id": 1, "owner": "ana", "area": 8.0}),
        ),
        polygon_feature(
            "POLYGON ((10 10,14 10,14 14,10 10))",
            json!({"id": 2, "owner": "bia", "area": 8.0}),
        ),
    ];
    let columns = vec!["id".to_string(), "owner".to_string(), "area".to_string()];
    let written = writer.write_layer("lotes", &columns, &lotes).await.unwrap();
    assert_eq!(written, 2);

    let aoi = vec![polygon_feature("POLYGON ((0 0,1 0,1 1,0 0))", json!({}))];
    writer.write_layer("AOI", &[], &aoi).await.unwrap();

    assert_eq!(writer.layers(), ["lotes".to_string(), "AOI".to_string()]);
    writer.finish().await.unwrap();

    let mut conn = open_readonly(&path).await;

    // GeoPackage application id ("GPKG").
    let application_id: i64 = sqlx::query_scalar("PRAGMA application_id")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(application_id, 0x4750_4B47);

    // Both layers are registered as feature contents.
    let contents: Vec<(String, String, i64)> =
        sqlx::query_as("SELECT table_name, data_type, srs_id FROM gpkg_contents ORDER BY table_name")
            .fetch_all(&mut conn)
            .await
            .unwrap();
    assert_eq!(
        contents,
        vec![
            ("AOI".to_string(), "features".to_string(), 4674),
            ("lotes".to_string(), "features".to_string(), 4674),
        ]
    );

    let geometry_columns: Vec<(String, String, String, i64, i64, i64)> = sqlx::query_as(
        "SELECT table_name, column_name, geometry_type_name, srs_id, z, m \
         FROM gpkg_geometry_columns WHERE table_name = 'lotes'",
    )
    .fetch_all(&mut conn)
    .await
    .unwrap();
    assert_eq!(
        geometry_columns,
        vec![(
            "lotes".to_string(),
            "geom".to_string(),
            "POLYGON".to_string(),
            4674,
            0,
            0
        )]
    );

    // The mandatory spatial reference systems plus the working one.
    let srs_ids: Vec<i64> =
        sqlx::query_scalar("SELECT srs_id FROM gpkg_spatial_ref_sys ORDER BY srs_id")
            .fetch_all(&mut conn)
            .await
            .unwrap();
    assert_eq!(srs_ids, vec![-1, 0, 4326, 4674]);

    // Feature rows carry GeoPackage geometry blobs and typed attributes.
    let rows: Vec<(Vec<u8>, i64, String, f64)> =
        sqlx::query_as("SELECT geom, id, owner, area FROM lotes ORDER BY fid")
            .fetch_all(&mut conn)
            .await
            .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0].0[0..2], b"GP");
    assert_eq!(rows[0].1, 1);
    assert_eq!(rows[0].2, "ana");
    assert!((rows[1].3 - 8.0).abs() < f64::EPSILON);

    // Envelope columns are filled from the written coordinates.
    let (min_x, max_y): (f64, f64) =
        sqlx::query_as("SELECT min_x, max_y FROM gpkg_contents WHERE table_name = 'lotes'")
            .fetch_one(&mut conn)
            .await
            .unwrap();
    assert!((min_x - 0.0).abs() < f64::EPSILON);
    assert!((max_y - 14.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn rejects_duplicate_layer_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dup.gpkg");

    let mut writer = GeoPackageWriter::create(&path).await.unwrap();
    let features = vec![polygon_feature("POINT (1 2)", json!({}))];

    writer.write_layer("camada", &[], &features).await.unwrap();
    let err = writer
        .write_layer("camada", &[], &features)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("camada"));

    // The failed write leaves the container consistent.
    assert_eq!(writer.layers().len(), 1);
    writer.finish().await.unwrap();
}

#[tokio::test]
async fn refuses_to_write_an_empty_layer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.gpkg");

    let mut writer = GeoPackageWriter::create(&path).await.unwrap();
    assert!(writer.write_layer("vazia", &[], &[]).await.is_err());
    assert!(writer.layers().is_empty());
    writer.finish().await.unwrap();

    // No trace of the refused layer in the metadata.
    let mut conn = open_readonly(&path).await;
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gpkg_contents")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn mixed_geometry_layer_is_declared_generic_and_z_flagged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mixed.gpkg");

    let mut writer = GeoPackageWriter::create(&path).await.unwrap();
    let features = vec![
        polygon_feature("POLYGON Z ((0 0 1,4 0 1,4 4 1,0 0 1))", json!({})),
        polygon_feature("POINT (9 9)", json!({})),
    ];
    writer.write_layer("mista", &[], &features).await.unwrap();
    writer.finish().await.unwrap();

    let mut conn = open_readonly(&path).await;
    let (type_name, z): (String, i64) = sqlx::query_as(
        "SELECT geometry_type_name, z FROM gpkg_geometry_columns WHERE table_name = 'mista'",
    )
    .fetch_one(&mut conn)
    .await
    .unwrap();
    assert_eq!(type_name, "GEOMETRY");
    assert_eq!(z, 1);
}

#[tokio::test]
async fn create_replaces_an_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("replace.gpkg");

    let mut writer = GeoPackageWriter::create(&path).await.unwrap();
    let features = vec![polygon_feature("POINT (1 1)", json!({}))];
    writer.write_layer("antiga", &[], &features).await.unwrap();
    writer.finish().await.unwrap();

    // A second export run starts from a fresh container.
    let writer = GeoPackageWriter::create(&path).await.unwrap();
    writer.finish().await.unwrap();

    let mut conn = open_readonly(&path).await;
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM gpkg_contents")
        .fetch_one(&mut conn)
        .await
        .unwrap();
    assert_eq!(count, 0);
}
