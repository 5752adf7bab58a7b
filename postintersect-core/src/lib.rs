//! Core engines for PostIntersect.
//!
//! This crate provides the spatial intersection diagnostic and export
//! pipeline shared by the PostIntersect CLI: discovery of geometry-bearing
//! tables, validity-guarded `ST_Intersects` queries against an
//! Area-of-Interest, per-table diagnostics with failure isolation, and
//! export of intersecting feature sets into a multi-layer GeoPackage.
//!
//! # Architecture
//! - All PostGIS round-trips go through a `sqlx::PgPool` owned by an
//!   explicit [`SessionContext`]; the engines never hold ambient state.
//! - Table and schema identifiers are interpolated into SQL only after
//!   quoting, and only when they originate from catalog discovery; the AOI
//!   geometry and every other value is always a bound parameter.
//! - A single table's failure is recorded in its diagnostic record and
//!   never aborts the surrounding batch.

pub mod aoi;
pub mod catalog;
pub mod diagnostic;
pub mod error;
pub mod export;
pub mod geometry;
pub mod gpkg;
pub mod logging;
pub mod models;
pub mod report;
pub mod session;

// Re-export commonly used types
pub use aoi::AreaOfInterest;
pub use catalog::{list_geometry_tables, list_schemas};
pub use diagnostic::{run_diagnostic, sample_intersections, DiagnosticOptions};
pub use error::{PostIntersectError, Result};
pub use export::{export_layers, ExportOptions};
pub use logging::init_logging;
pub use models::{
    DiagnosticBatch, DiagnosticRecord, DiagnosticSummary, ExportReport, GeometryTable,
    LayerOutcome, SampleResult, WORKING_SRID,
};
pub use report::write_diagnostic_report;
pub use session::{connect, test_connection, ConnectionSettings, SessionContext};
