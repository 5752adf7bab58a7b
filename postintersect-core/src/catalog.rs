//! Schema and geometry-table discovery.
//!
//! Discovery is the trust boundary for SQL identifiers: every schema,
//! table, and geometry column name the engines later interpolate into
//! query text originates here, from `information_schema` and the PostGIS
//! `geometry_columns` registry, never from free-form user input.

use crate::error::PostIntersectError;
use crate::models::GeometryTable;
use crate::Result;
use sqlx::PgPool;

/// Schemas that are internal to the server and never diagnostic targets.
const EXCLUDED_SCHEMAS: [&str; 2] = ["pg_catalog", "information_schema"];

/// Lists user-visible schemas, excluding the two system-internal ones,
/// sorted lexicographically.
///
/// # Errors
/// Fails with [`PostIntersectError::Catalog`] when the metadata query
/// itself fails (connection lost, insufficient privilege).
pub async fn list_schemas(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<String> =
        sqlx::query_scalar("SELECT schema_name FROM information_schema.schemata")
            .fetch_all(pool)
            .await
            .map_err(|e| PostIntersectError::catalog_failed("Failed to enumerate schemas", e))?;

    Ok(filter_and_sort_schemas(rows))
}

/// Lists the geometry-bearing tables of one schema from the
/// `geometry_columns` registry, with their designated geometry column.
///
/// A schema without geometry tables yields an empty list, not an error.
pub async fn list_geometry_tables(pool: &PgPool, schema: &str) -> Result<Vec<GeometryTable>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT f_table_name, f_geometry_column \
         FROM geometry_columns \
         WHERE f_table_schema = $1 \
         ORDER BY f_table_name",
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .map_err(|e| {
        PostIntersectError::catalog_failed(
            format!("Failed to enumerate geometry tables in schema \"{}\"", schema),
            e,
        )
    })?;

    Ok(rows
        .into_iter()
        .map(|(name, geometry_column)| GeometryTable::new(schema, name, geometry_column))
        .collect())
}

/// Non-geometry column names of one table, in ordinal order.
///
/// Used to label attribute previews and to lay out export layer columns.
pub async fn list_attribute_columns(pool: &PgPool, table: &GeometryTable) -> Result<Vec<String>> {
    sqlx::query_scalar(
        "SELECT column_name FROM information_schema.columns \
         WHERE table_schema = $1 AND table_name = $2 AND udt_name <> 'geometry' \
         ORDER BY ordinal_position",
    )
    .bind(&table.schema)
    .bind(&table.name)
    .fetch_all(pool)
    .await
    .map_err(|e| {
        PostIntersectError::catalog_failed(
            format!("Failed to enumerate columns of table \"{}\"", table.name),
            e,
        )
    })
}

/// Applies the exclusion set and lexicographic ordering client-side so the
/// result does not depend on the server's collation.
fn filter_and_sort_schemas(mut schemas: Vec<String>) -> Vec<String> {
    schemas.retain(|s| !EXCLUDED_SCHEMAS.contains(&s.as_str()));
    schemas.sort_unstable();
    schemas
}

/// Wraps an identifier in double quotes for interpolation into SQL text,
/// doubling any embedded quote.
///
/// Only identifiers obtained from catalog discovery may be interpolated;
/// values always go through bound parameters.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_schemas_are_excluded_and_rest_sorted() {
        let input = vec![
            "public".to_string(),
            "pg_catalog".to_string(),
            "cadastro".to_string(),
            "information_schema".to_string(),
            "ambiental".to_string(),
        ];

        let result = filter_and_sort_schemas(input);
        assert_eq!(result, vec!["ambiental", "cadastro", "public"]);
    }

    #[test]
    fn test_exactly_two_schemas_are_reserved() {
        assert_eq!(EXCLUDED_SCHEMAS.len(), 2);
    }

    #[test]
    fn test_quote_ident_wraps_and_escapes() {
        assert_eq!(quote_ident("rivers"), "\"rivers\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }
}
