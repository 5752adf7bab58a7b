//! Connection settings, pool construction, and the per-run session context.
//!
//! The pipeline never owns ambient state: one [`SessionContext`] is built by
//! the caller (pool + AOI) and passed by reference into each engine
//! operation for the duration of one diagnostic/export session.

use crate::aoi::AreaOfInterest;
use crate::error::PostIntersectError;
use crate::Result;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::path::Path;
use std::time::Duration;

/// Credentials for one PostGIS database, matching the flat JSON credential
/// file (`host`, `port`, `dbname`, `user`, `password`).
///
/// Files written by older tooling carry the port as a string; both string
/// and numeric ports are accepted on read, and the port is written back as
/// a string so round-tripped files keep their shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSettings {
    /// Database host.
    pub host: String,
    /// Database port.
    #[serde(
        serialize_with = "serialize_port_as_string",
        deserialize_with = "deserialize_port"
    )]
    pub port: u16,
    /// Database name.
    pub dbname: String,
    /// Role name.
    pub user: String,
    /// Password; never logged or serialized into log output.
    pub password: String,
}

fn serialize_port_as_string<S: Serializer>(port: &u16, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&port.to_string())
}

fn deserialize_port<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text
            .trim()
            .parse::<u16>()
            .map_err(|_| D::Error::custom(format!("invalid port: {:?}", text))),
    }
}

impl ConnectionSettings {
    /// Reads settings from a flat JSON credential file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            PostIntersectError::io(format!("Failed to read credentials from {}", path.display()), e)
        })?;
        serde_json::from_str(&data).map_err(|e| PostIntersectError::Serialization {
            context: format!("Invalid credential file {}", path.display()),
            source: e,
        })
    }

    /// Writes settings to a flat JSON credential file.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self).map_err(|e| PostIntersectError::Serialization {
            context: "Failed to serialize credentials".to_string(),
            source: e,
        })?;
        std::fs::write(path, data).map_err(|e| {
            PostIntersectError::io(format!("Failed to write credentials to {}", path.display()), e)
        })
    }

    /// Builds sqlx connect options from these settings.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.dbname)
            .username(&self.user)
            .password(&self.password)
    }

    /// Password-free connection target for logging.
    pub fn display_url(&self) -> String {
        format!(
            "postgres://{}@{}:{}/{}",
            self.user, self.host, self.port, self.dbname
        )
    }
}

/// Creates a connection pool for one diagnostic/export session.
///
/// Session settings are applied to every pooled connection: a statement
/// timeout, read-only default transactions (the pipeline only ever reads
/// from PostGIS), a stable application name, and UTC timestamps. Statement
/// timeouts live here, on the connection configuration, not in the engines.
pub fn connect(options: PgConnectOptions) -> PgPool {
    use sqlx::Executor;

    PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET statement_timeout = '300s'").await?;
                conn.execute("SET default_transaction_read_only = on").await?;
                let app_name = format!("postintersect-{}", env!("CARGO_PKG_VERSION"));
                conn.execute(format!("SET application_name = '{}'", app_name).as_str())
                    .await?;
                conn.execute("SET timezone = 'UTC'").await?;
                Ok(())
            })
        })
        .connect_lazy_with(options)
}

/// Tests connectivity and verifies the target is PostGIS-enabled.
///
/// A plain PostgreSQL server without the PostGIS extension fails here with
/// a clear message instead of failing later inside the first spatial query.
pub async fn test_connection(pool: &PgPool) -> Result<String> {
    let one: i32 = sqlx::query_scalar("SELECT 1")
        .fetch_one(pool)
        .await
        .map_err(PostIntersectError::connection_failed)?;

    if one != 1 {
        return Err(PostIntersectError::configuration(
            "Basic connectivity test returned an unexpected result",
        ));
    }

    let postgis_version: String = sqlx::query_scalar("SELECT PostGIS_Version()")
        .fetch_one(pool)
        .await
        .map_err(|e| {
            PostIntersectError::configuration(format!(
                "Target database does not expose PostGIS_Version(); is the PostGIS extension installed? ({})",
                e
            ))
        })?;

    Ok(postgis_version)
}

/// Explicit per-run state passed by reference into each core operation.
///
/// Owns the pool and the reprojected AOI for the duration of one
/// diagnostic/export session; the engines never reach into ambient state.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pool: PgPool,
    aoi: AreaOfInterest,
}

impl SessionContext {
    /// Creates a session from an open pool and a loaded AOI.
    pub fn new(pool: PgPool, aoi: AreaOfInterest) -> Self {
        Self { pool, aoi }
    }

    /// The session's connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The session's Area of Interest.
    pub fn aoi(&self) -> &AreaOfInterest {
        &self.aoi
    }
}
