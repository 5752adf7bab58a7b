//! Area-of-Interest loading.
//!
//! The AOI comes from a GeoJSON file. Its features are unified into a
//! single geometry and reprojected to the working SRID before anything
//! else runs; the resulting WKT string is the only AOI representation that
//! ever crosses the database boundary.
//!
//! Union and reprojection are delegated to PostGIS (`ST_GeomFromGeoJSON`,
//! `ST_Union`, `ST_Transform`): the session database is already a full
//! geometry engine, so no client-side projection library is required.

use crate::error::PostIntersectError;
use crate::models::WORKING_SRID;
use crate::Result;
use geojson::GeoJson;
use sqlx::PgPool;
use std::path::Path;

/// One unified AOI geometry in the working SRID, immutable for the
/// duration of a diagnostic/export session.
#[derive(Debug, Clone)]
pub struct AreaOfInterest {
    wkt: String,
    source_srid: i32,
    feature_count: usize,
}

impl AreaOfInterest {
    /// Loads an AOI from a GeoJSON file, unifying all features and
    /// reprojecting to SRID 4674.
    ///
    /// The file's `crs` member selects the source reference system when
    /// present; plain RFC 7946 files default to EPSG:4326.
    ///
    /// # Errors
    /// Fails with [`PostIntersectError::AoiSource`] when the file is
    /// unreadable, carries no geometry, or unifies to an empty geometry.
    pub async fn from_geojson_file(pool: &PgPool, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            PostIntersectError::io(format!("Failed to read AOI file {}", path.display()), e)
        })?;

        let geojson: GeoJson = data.parse().map_err(|e| {
            PostIntersectError::aoi_source(format!(
                "Failed to parse {} as GeoJSON: {}",
                path.display(),
                e
            ))
        })?;

        let (geometries, source_srid) = geometry_payloads(&geojson)?;
        Self::unify(pool, geometries, source_srid).await
    }

    /// Unifies the given GeoJSON geometry payloads into one geometry at the
    /// working SRID.
    async fn unify(pool: &PgPool, geometries: Vec<String>, source_srid: i32) -> Result<Self> {
        let feature_count = geometries.len();

        let sql = "SELECT ST_AsText(g), ST_IsEmpty(g) \
                   FROM (SELECT ST_Transform(ST_Union(ST_SetSRID(ST_GeomFromGeoJSON(geom), $2)), $3) AS g \
                         FROM unnest($1::text[]) AS geom) unified";

        let (wkt, is_empty): (String, bool) = sqlx::query_as(sql)
            .bind(&geometries)
            .bind(source_srid)
            .bind(WORKING_SRID)
            .fetch_one(pool)
            .await
            .map_err(|e| {
                PostIntersectError::aoi_source(format!(
                    "Failed to unify and reproject the AOI geometry: {}",
                    e
                ))
            })?;

        if is_empty {
            return Err(PostIntersectError::aoi_source(
                "AOI unified to an empty geometry",
            ));
        }

        Ok(Self {
            wkt,
            source_srid,
            feature_count,
        })
    }

    /// The unified AOI geometry as WKT, in the working SRID.
    pub fn wkt(&self) -> &str {
        &self.wkt
    }

    /// SRID the source file was tagged with.
    pub fn source_srid(&self) -> i32 {
        self.source_srid
    }

    /// Number of source features unified into this AOI.
    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// Builds an AOI directly from WKT already in the working SRID.
    ///
    /// Used by callers that re-run an export with a previously loaded AOI.
    pub fn from_wkt(wkt: impl Into<String>) -> Result<Self> {
        let wkt = wkt.into();
        if wkt.trim().is_empty() {
            return Err(PostIntersectError::aoi_source("empty AOI WKT"));
        }
        Ok(Self {
            wkt,
            source_srid: WORKING_SRID,
            feature_count: 1,
        })
    }
}

/// Extracts the geometry JSON payloads and the source SRID from a parsed
/// GeoJSON document.
fn geometry_payloads(geojson: &GeoJson) -> Result<(Vec<String>, i32)> {
    let (geometries, crs_srid) = match geojson {
        GeoJson::FeatureCollection(fc) => {
            let geoms: Vec<String> = fc
                .features
                .iter()
                .filter_map(|f| f.geometry.as_ref())
                .map(geometry_json)
                .collect::<Result<_>>()?;
            (geoms, crs_member_srid(fc.foreign_members.as_ref()))
        }
        GeoJson::Feature(feature) => {
            let geoms = match feature.geometry.as_ref() {
                Some(g) => vec![geometry_json(g)?],
                None => Vec::new(),
            };
            (geoms, crs_member_srid(feature.foreign_members.as_ref()))
        }
        GeoJson::Geometry(geometry) => (
            vec![geometry_json(geometry)?],
            crs_member_srid(geometry.foreign_members.as_ref()),
        ),
    };

    if geometries.is_empty() {
        return Err(PostIntersectError::aoi_source(
            "AOI source contains no geometry",
        ));
    }

    Ok((geometries, crs_srid.unwrap_or(4326)))
}

fn geometry_json(geometry: &geojson::Geometry) -> Result<String> {
    serde_json::to_string(geometry).map_err(|e| PostIntersectError::Serialization {
        context: "Failed to serialize AOI geometry".to_string(),
        source: e,
    })
}

/// Reads the legacy `crs` foreign member (`{"type":"name","properties":
/// {"name":"EPSG:31982"}}` or a `urn:ogc:def:crs:...` name) and resolves it
/// to an SRID.
fn crs_member_srid(foreign_members: Option<&geojson::JsonObject>) -> Option<i32> {
    let name = foreign_members?
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;

    if name.contains("CRS84") {
        // OGC:CRS84 is EPSG:4326 with reversed axis order; coordinates in
        // GeoJSON are lon/lat either way.
        return Some(4326);
    }

    name.rsplit(':').next()?.parse::<i32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> GeoJson {
        s.parse().unwrap()
    }

    #[test]
    fn test_feature_collection_payloads() {
        let geojson = parse(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{},"geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}},
                {"type":"Feature","properties":{},"geometry":{"type":"Polygon","coordinates":[[[2,2],[3,2],[3,3],[2,2]]]}}
            ]}"#,
        );

        let (geometries, srid) = geometry_payloads(&geojson).unwrap();
        assert_eq!(geometries.len(), 2);
        assert_eq!(srid, 4326);
        assert!(geometries[0].contains("\"Polygon\""));
    }

    #[test]
    fn test_crs_member_overrides_default_srid() {
        let geojson = parse(
            r#"{"type":"FeatureCollection",
                "crs":{"type":"name","properties":{"name":"urn:ogc:def:crs:EPSG::31982"}},
                "features":[{"type":"Feature","properties":{},
                    "geometry":{"type":"Point","coordinates":[300000,7500000]}}]}"#,
        );

        let (_, srid) = geometry_payloads(&geojson).unwrap();
        assert_eq!(srid, 31982);
    }

    #[test]
    fn test_crs84_maps_to_4326() {
        let geojson = parse(
            r#"{"type":"FeatureCollection",
                "crs":{"type":"name","properties":{"name":"urn:ogc:def:crs:OGC:1.3:CRS84"}},
                "features":[{"type":"Feature","properties":{},
                    "geometry":{"type":"Point","coordinates":[1,2]}}]}"#,
        );

        let (_, srid) = geometry_payloads(&geojson).unwrap();
        assert_eq!(srid, 4326);
    }

    #[test]
    fn test_bare_geometry_is_accepted() {
        let geojson = parse(r#"{"type":"Point","coordinates":[1,2]}"#);
        let (geometries, srid) = geometry_payloads(&geojson).unwrap();
        assert_eq!(geometries.len(), 1);
        assert_eq!(srid, 4326);
    }

    #[test]
    fn test_geometry_less_document_is_rejected() {
        let geojson = parse(r#"{"type":"FeatureCollection","features":[]}"#);
        assert!(geometry_payloads(&geojson).is_err());
    }

    #[test]
    fn test_from_wkt_rejects_empty() {
        assert!(AreaOfInterest::from_wkt("  ").is_err());
        let aoi = AreaOfInterest::from_wkt("POLYGON((0 0,1 0,1 1,0 0))").unwrap();
        assert_eq!(aoi.source_srid(), WORKING_SRID);
    }
}
